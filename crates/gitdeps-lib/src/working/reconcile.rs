use super::state::{WorkingFile, WorkingManifest};
use crate::config::OverwriteMode;
use crate::error::GitDepsError;
use crate::extract::INCOMING_FILE_SUFFIX;
use crate::filter::PathFilter;
use crate::manifest::{DependencyFile, TargetState};
use crate::utils::{
    append_suffix, modified_nanos, name_key, remove_file_if_exists, resolve_in_root,
};
use crate::verification::{hash_file, hashes_equal};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Result of diffing the persisted working state against the target state.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// The working state to persist before downloading
    pub new_manifest: WorkingManifest,
    /// Target files whose local content is missing or out of date
    pub files_to_download: Vec<DependencyFile>,
    /// Target files that survived exclusion filtering
    pub filtered_targets: Vec<DependencyFile>,
    /// Tracked, non-excluded files that no filtered target accounts for
    pub stale_files: Vec<WorkingFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunReport {
    pub add: Vec<String>,
    pub update: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemovalPlan {
    pub deletable: Vec<WorkingFile>,
    pub tampered: Vec<WorkingFile>,
}

/// Removes `.incoming` leftovers for entries whose download never finished.
pub fn clean_interrupted_downloads(
    root: &Path,
    current: &WorkingManifest,
) -> Result<(), GitDepsError> {
    for file in current.files.iter().filter(|file| file.timestamp == 0) {
        let incoming_path = append_suffix(&resolve_in_root(root, &file.name), INCOMING_FILE_SUFFIX);
        if incoming_path.exists() {
            tracing::debug!(path = %incoming_path.display(), "Removing partial download");
            remove_file_if_exists(&incoming_path)?;
        }
    }
    Ok(())
}

pub fn reconcile(
    root: &Path,
    current: WorkingManifest,
    target: &TargetState,
    filter: &PathFilter,
) -> Result<Reconciliation, GitDepsError> {
    clean_interrupted_downloads(root, &current)?;

    // Only files that still exist are tracked; re-hash those whose mtime moved.
    let mut current_lookup: BTreeMap<String, WorkingFile> = BTreeMap::new();
    for mut current_file in current.files {
        let path = resolve_in_root(root, &current_file.name);
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let timestamp = modified_nanos(&metadata);
        if timestamp != current_file.timestamp {
            tracing::trace!(file = %current_file.name, "Modification time changed, rehashing");
            current_file.hash =
                hash_file(&path).map_err(|e| GitDepsError::filesystem("hash file", &path, e))?;
            current_file.timestamp = timestamp;
        }
        current_lookup.insert(name_key(&current_file.name), current_file);
    }

    // Adopt untracked files that already sit where a target wants them.
    for target_file in target.files() {
        let key = name_key(&target_file.name);
        if current_lookup.contains_key(&key) {
            continue;
        }
        let path = resolve_in_root(root, &target_file.name);
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        tracing::trace!(file = %target_file.name, "Adopting untracked file");
        let hash = hash_file(&path).map_err(|e| GitDepsError::filesystem("hash file", &path, e))?;
        current_lookup.insert(
            key,
            WorkingFile {
                name: target_file.name.clone(),
                hash,
                timestamp: modified_nanos(&metadata),
                expected_hash: String::new(),
            },
        );
    }

    let filtered_targets = target
        .files()
        .filter(|file| !filter.is_excluded(&file.name))
        .cloned()
        .collect::<Vec<_>>();

    let mut new_manifest = WorkingManifest::default();
    let mut files_to_download = Vec::new();
    for target_file in &filtered_targets {
        let key = name_key(&target_file.name);
        let unchanged = current_lookup
            .get(&key)
            .is_some_and(|current_file| hashes_equal(&current_file.hash, &target_file.hash));

        let new_file = if unchanged {
            let mut current_file = current_lookup
                .remove(&key)
                .ok_or_else(|| eyre::eyre!("working file {} vanished from lookup", target_file.name))?;
            current_file.expected_hash = target_file.hash.clone();
            current_file
        } else {
            files_to_download.push(target_file.clone());
            WorkingFile::pending(target_file.name.clone(), target_file.hash.clone())
        };
        new_manifest.files.push(new_file);
    }

    Ok(Reconciliation {
        new_manifest,
        files_to_download,
        filtered_targets,
        stale_files: current_lookup
            .into_values()
            .filter(|file| !filter.is_excluded(&file.name))
            .collect(),
    })
}

impl Reconciliation {
    pub fn dry_run_report(&self) -> DryRunReport {
        let new_files = self
            .files_to_download
            .iter()
            .map(|file| (name_key(&file.name), file.name.clone()))
            .collect::<BTreeMap<_, _>>();
        let stale_keys = self
            .stale_files
            .iter()
            .map(|file| name_key(&file.name))
            .collect::<BTreeSet<_>>();

        let mut report = DryRunReport::default();
        for stale_file in &self.stale_files {
            if new_files.contains_key(&name_key(&stale_file.name)) {
                report.update.push(stale_file.name.clone());
            } else {
                report.remove.push(stale_file.name.clone());
            }
        }
        report.add = new_files
            .iter()
            .filter(|(key, _)| !stale_keys.contains(*key))
            .map(|(_, name)| name.clone())
            .collect();

        report.add.sort();
        report.update.sort();
        report.remove.sort();
        report
    }

    /// Stops managing the given files: they are dropped from the download
    /// set and recorded as already holding their target content.
    pub fn freeze(&mut self, root: &Path, names: &[String]) -> Result<(), GitDepsError> {
        for name in names {
            let key = name_key(name);
            self.files_to_download
                .retain(|file| name_key(&file.name) != key);

            if let Some(entry) = self
                .new_manifest
                .files
                .iter_mut()
                .find(|file| name_key(&file.name) == key)
            {
                let path = resolve_in_root(root, &entry.name);
                entry.hash = entry.expected_hash.clone();
                entry.timestamp = crate::utils::file_timestamp(&path)?;
            }
        }
        Ok(())
    }
}

/// Splits stale files into those safe to delete and those modified since
/// this tool wrote them.
pub fn plan_removals(stale_files: &[WorkingFile], overwrite: OverwriteMode) -> RemovalPlan {
    let mut plan = RemovalPlan::default();
    for stale_file in stale_files {
        if overwrite != OverwriteMode::Force && stale_file.is_tampered() {
            plan.tampered.push(stale_file.clone());
        } else {
            plan.deletable.push(stale_file.clone());
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ExcludedFolders;
    use crate::manifest::{DependencyBlob, DependencyManifest, DependencyPack};
    use crate::verification::ContentHasher;

    fn sha1_hex(data: &[u8]) -> String {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize_hex()
    }

    fn target_with(files: &[(&str, &[u8])]) -> TargetState {
        let mut manifest = DependencyManifest {
            base_url: "http://cdn".to_string(),
            ..Default::default()
        };
        for (name, content) in files {
            let hash = sha1_hex(content);
            manifest.files.push(DependencyFile {
                name: name.to_string(),
                hash: hash.clone(),
                is_executable: false,
            });
            manifest.blobs.push(DependencyBlob {
                hash,
                pack_hash: "p1".to_string(),
                pack_offset: 0,
                size: content.len() as u64,
            });
        }
        manifest.packs.push(DependencyPack {
            hash: "p1".to_string(),
            size: None,
            compressed_size: 0,
            remote_path: "packs".to_string(),
        });
        let mut target = TargetState::default();
        target.add_manifest(manifest, "").unwrap();
        target
    }

    fn write(root: &Path, name: &str, content: &[u8]) {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn tracked(root: &Path, name: &str, expected: &[u8]) -> WorkingFile {
        let path = root.join(name);
        WorkingFile {
            name: name.to_string(),
            hash: hash_file(&path).unwrap(),
            timestamp: crate::utils::file_timestamp(&path).unwrap(),
            expected_hash: sha1_hex(expected),
        }
    }

    #[test]
    fn test_empty_state_downloads_everything() {
        let root = tempfile::tempdir().unwrap();
        let target = target_with(&[("A/x.bin", b"hello")]);

        let result = reconcile(
            root.path(),
            WorkingManifest::default(),
            &target,
            &PathFilter::default(),
        )
        .unwrap();

        assert_eq!(result.files_to_download.len(), 1);
        assert!(result.stale_files.is_empty());
        assert_eq!(result.new_manifest.files[0].timestamp, 0);
        assert_eq!(result.new_manifest.files[0].expected_hash, sha1_hex(b"hello"));
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "A/x.bin", b"hello");
        let target = target_with(&[("A/x.bin", b"hello")]);

        let mut current = WorkingManifest::default();
        current.upsert(tracked(root.path(), "A/x.bin", b"hello"));

        let result = reconcile(root.path(), current.clone(), &target, &PathFilter::default()).unwrap();
        assert!(result.files_to_download.is_empty());
        assert!(result.stale_files.is_empty());
        assert_eq!(result.new_manifest, current);
    }

    #[test]
    fn test_existing_untracked_file_with_target_content_is_adopted() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "A/x.bin", b"hello");
        let target = target_with(&[("A/x.bin", b"hello")]);

        let result = reconcile(
            root.path(),
            WorkingManifest::default(),
            &target,
            &PathFilter::default(),
        )
        .unwrap();
        assert!(result.files_to_download.is_empty());
        assert_eq!(result.new_manifest.files[0].hash, sha1_hex(b"hello"));
    }

    #[test]
    fn test_changed_target_schedules_update() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "A/x.bin", b"old");
        let target = target_with(&[("A/x.bin", b"new")]);

        let mut current = WorkingManifest::default();
        current.upsert(tracked(root.path(), "A/x.bin", b"old"));

        let result = reconcile(root.path(), current, &target, &PathFilter::default()).unwrap();
        assert_eq!(result.files_to_download.len(), 1);
        assert_eq!(result.stale_files.len(), 1);

        let report = result.dry_run_report();
        assert_eq!(report.update, vec!["A/x.bin".to_string()]);
        assert!(report.add.is_empty());
        assert!(report.remove.is_empty());
    }

    #[test]
    fn test_modified_file_is_rehashed_and_detected_as_tampered() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "old.bin", b"original");
        let mut current = WorkingManifest::default();
        let mut entry = tracked(root.path(), "old.bin", b"original");
        entry.timestamp -= 1;
        current.upsert(entry);
        write(root.path(), "old.bin", b"edited by hand");

        let result = reconcile(
            root.path(),
            current,
            &TargetState::default(),
            &PathFilter::default(),
        )
        .unwrap();
        assert_eq!(result.stale_files.len(), 1);
        assert_eq!(result.stale_files[0].hash, sha1_hex(b"edited by hand"));

        let plan = plan_removals(&result.stale_files, OverwriteMode::Unchanged);
        assert_eq!(plan.tampered.len(), 1);
        assert!(plan.deletable.is_empty());

        let forced = plan_removals(&result.stale_files, OverwriteMode::Force);
        assert!(forced.tampered.is_empty());
        assert_eq!(forced.deletable.len(), 1);
    }

    #[test]
    fn test_removed_target_is_deletable() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "gone.bin", b"data");
        let mut current = WorkingManifest::default();
        current.upsert(tracked(root.path(), "gone.bin", b"data"));

        let result = reconcile(
            root.path(),
            current,
            &TargetState::default(),
            &PathFilter::default(),
        )
        .unwrap();
        assert_eq!(result.dry_run_report().remove, vec!["gone.bin".to_string()]);

        let plan = plan_removals(&result.stale_files, OverwriteMode::Unchanged);
        assert_eq!(plan.deletable.len(), 1);
    }

    #[test]
    fn test_excluded_files_are_neither_downloaded_nor_deleted() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "Mac/stale.bin", b"data");
        let mut current = WorkingManifest::default();
        current.upsert(tracked(root.path(), "Mac/stale.bin", b"data"));
        let target = target_with(&[("Mac/new.bin", b"x"), ("Win/new.bin", b"y")]);
        let filter = PathFilter::new(ExcludedFolders::new(["Mac"]), None);

        let result = reconcile(root.path(), current, &target, &filter).unwrap();
        let names = result
            .files_to_download
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Win/new.bin"]);

        assert!(result.stale_files.is_empty());
    }

    #[test]
    fn test_missing_tracked_files_are_forgotten() {
        let root = tempfile::tempdir().unwrap();
        let mut current = WorkingManifest::default();
        current.upsert(WorkingFile {
            name: "deleted.bin".to_string(),
            hash: "h".to_string(),
            timestamp: 5,
            expected_hash: "h".to_string(),
        });

        let result = reconcile(
            root.path(),
            current,
            &TargetState::default(),
            &PathFilter::default(),
        )
        .unwrap();
        assert!(result.stale_files.is_empty());
    }

    #[test]
    fn test_interrupted_download_leftovers_are_removed() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "A/x.bin.incoming", b"partial");
        let mut current = WorkingManifest::default();
        current.upsert(WorkingFile::pending("A/x.bin", "h1"));

        reconcile(
            root.path(),
            current,
            &TargetState::default(),
            &PathFilter::default(),
        )
        .unwrap();
        assert!(!root.path().join("A/x.bin.incoming").exists());
    }

    #[test]
    fn test_freeze_keeps_current_content() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "A/x.bin", b"local edit");
        let target = target_with(&[("A/x.bin", b"upstream")]);

        let mut result = reconcile(
            root.path(),
            WorkingManifest::default(),
            &target,
            &PathFilter::default(),
        )
        .unwrap();
        assert_eq!(result.files_to_download.len(), 1);

        result.freeze(root.path(), &["A/x.bin".to_string()]).unwrap();
        assert!(result.files_to_download.is_empty());
        let entry = result.new_manifest.get("A/x.bin").unwrap();
        assert_eq!(entry.hash, sha1_hex(b"upstream"));
        assert!(entry.timestamp > 0);
    }
}
