use super::parser::parse_manifest;
use super::types::{DependencyBlob, DependencyFile, DependencyManifest, TargetPack};
use crate::error::GitDepsError;
use crate::utils::{name_key, validate_relative_name};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const MANIFEST_SUFFIX: &str = ".gitdeps.xml";
pub const PLUGIN_DESCRIPTOR_EXTENSION: &str = "uplugin";

/// The merged set of files, blobs and packs declared by every manifest found
/// in the tree. Files are keyed case-insensitively by name; blobs and packs
/// by hash.
#[derive(Debug, Clone, Default)]
pub struct TargetState {
    files: BTreeMap<String, DependencyFile>,
    blobs: HashMap<String, DependencyBlob>,
    packs: HashMap<String, TargetPack>,
}

fn hash_key(hash: &str) -> String {
    hash.to_ascii_lowercase()
}

impl TargetState {
    /// Merges one manifest, prefixing every file name. Later manifests win.
    pub fn add_manifest(
        &mut self,
        manifest: DependencyManifest,
        extract_prefix: &str,
    ) -> Result<(), GitDepsError> {
        let DependencyManifest {
            base_url,
            ignore_proxy,
            files,
            blobs,
            packs,
        } = manifest;

        for mut file in files {
            file.name = format!("{}{}", extract_prefix, file.name.replace('\\', "/"));
            validate_relative_name(&file.name)?;
            self.files.insert(name_key(&file.name), file);
        }
        for blob in blobs {
            self.blobs.insert(hash_key(&blob.hash), blob);
        }
        for pack in packs {
            self.packs.insert(
                hash_key(&pack.hash),
                TargetPack {
                    pack,
                    base_url: base_url.clone(),
                    ignore_proxy,
                },
            );
        }
        Ok(())
    }

    pub fn files(&self) -> impl Iterator<Item = &DependencyFile> {
        self.files.values()
    }

    pub fn blob(&self, hash: &str) -> Option<&DependencyBlob> {
        self.blobs.get(&hash_key(hash))
    }

    pub fn pack(&self, hash: &str) -> Option<&TargetPack> {
        self.packs.get(&hash_key(hash))
    }

    pub fn packs(&self) -> impl Iterator<Item = &TargetPack> {
        self.packs.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Checks that every file resolves to a blob, every blob to a pack, and
    /// that every blob range fits inside its pack.
    pub fn validate(&self) -> Result<(), GitDepsError> {
        for file in self.files.values() {
            if self.blob(&file.hash).is_none() {
                return Err(GitDepsError::DanglingReference {
                    details: format!("file {} refers to unknown blob {}", file.name, file.hash),
                });
            }
        }
        for blob in self.blobs.values() {
            let pack = self
                .pack(&blob.pack_hash)
                .ok_or_else(|| GitDepsError::DanglingReference {
                    details: format!(
                        "blob {} refers to unknown pack {}",
                        blob.hash, blob.pack_hash
                    ),
                })?;
            let end = blob_end(blob)?;
            if let Some(pack_size) = pack.pack.size
                && end > pack_size
            {
                return Err(GitDepsError::InvalidManifest {
                    details: format!(
                        "blob {} ends at offset {} past the end of pack {} ({} bytes)",
                        blob.hash, end, blob.pack_hash, pack_size
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Offset one past the last byte of `blob` inside its pack.
pub fn blob_end(blob: &DependencyBlob) -> Result<u64, GitDepsError> {
    blob.pack_offset
        .checked_add(blob.size)
        .ok_or_else(|| GitDepsError::InvalidManifest {
            details: format!(
                "blob {} range {}+{} overflows",
                blob.hash, blob.pack_offset, blob.size
            ),
        })
}

/// Scans every top-level folder of `root` for `Build/*.gitdeps.xml` and for
/// plugin manifests below `Plugins/`.
pub fn collect_target_state(root: &Path) -> Result<TargetState, GitDepsError> {
    let mut target = TargetState::default();
    for base_folder in visible_subdirectories(root)? {
        add_manifests(&mut target, &base_folder.join("Build"), "")?;

        let base_name = file_name_of(&base_folder);
        add_plugin_manifests(
            &mut target,
            &base_folder.join("Plugins"),
            &format!("{base_name}/Plugins"),
        )?;
    }
    target.validate()?;
    tracing::debug!(
        files = target.files.len(),
        blobs = target.blobs.len(),
        packs = target.packs.len(),
        "Collected target state"
    );
    Ok(target)
}

/// A folder holding a plugin descriptor is a terminal manifest source; any
/// other folder is searched recursively.
fn add_plugin_manifests(
    target: &mut TargetState,
    plugins_folder: &Path,
    extract_prefix: &str,
) -> Result<(), GitDepsError> {
    if !plugins_folder.is_dir() {
        return Ok(());
    }

    if contains_plugin_descriptor(plugins_folder)? {
        return add_manifests(
            target,
            &plugins_folder.join("Build"),
            &format!("{extract_prefix}/"),
        );
    }

    for subfolder in visible_subdirectories(plugins_folder)? {
        let name = file_name_of(&subfolder);
        add_plugin_manifests(target, &subfolder, &format!("{extract_prefix}/{name}"))?;
    }
    Ok(())
}

fn add_manifests(
    target: &mut TargetState,
    build_folder: &Path,
    extract_prefix: &str,
) -> Result<(), GitDepsError> {
    if !build_folder.is_dir() {
        return Ok(());
    }

    let mut manifest_paths = read_dir_sorted(build_folder)?
        .into_iter()
        .filter(|path| {
            let name = file_name_of(path);
            !name.starts_with('.') && name.to_lowercase().ends_with(MANIFEST_SUFFIX) && path.is_file()
        })
        .collect::<Vec<_>>();
    manifest_paths.sort();

    for manifest_path in manifest_paths {
        tracing::debug!(manifest = %manifest_path.display(), prefix = extract_prefix, "Reading manifest");
        let manifest = parse_manifest(&manifest_path)?;
        target.add_manifest(manifest, extract_prefix)?;
    }
    Ok(())
}

fn contains_plugin_descriptor(folder: &Path) -> Result<bool, GitDepsError> {
    Ok(read_dir_sorted(folder)?.iter().any(|path| {
        path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(PLUGIN_DESCRIPTOR_EXTENSION))
    }))
}

fn visible_subdirectories(folder: &Path) -> Result<Vec<PathBuf>, GitDepsError> {
    Ok(read_dir_sorted(folder)?
        .into_iter()
        .filter(|path| path.is_dir() && !file_name_of(path).starts_with('.'))
        .collect())
}

fn read_dir_sorted(folder: &Path) -> Result<Vec<PathBuf>, GitDepsError> {
    let entries = std::fs::read_dir(folder)
        .map_err(|e| GitDepsError::filesystem("list directory", folder, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| GitDepsError::filesystem("list directory", folder, e))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
