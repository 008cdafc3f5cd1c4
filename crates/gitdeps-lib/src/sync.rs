use crate::cache::{CacheStore, EvictionPolicy, purge_cache_files, touch_cache_files};
use crate::config::OverwriteMode;
use crate::download::{
    DownloadOptions, PackFetcher, StatusSink, build_incoming_packs, download_dependencies,
};
use crate::error::GitDepsError;
use crate::filter::{ExcludedFolders, IgnoreFile, PathFilter};
use crate::manifest::{TargetState, collect_target_state};
use crate::prompt::ConflictPrompt;
use crate::utils::{file_timestamp, remove_file_if_exists, resolve_in_root, set_executable};
use crate::working::{
    DryRunReport, Reconciliation, RemovalPlan, WorkingFile, WorkingManifest, WorkingStateStore,
    plan_removals, reconcile,
};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub path: PathBuf,
    pub eviction: EvictionPolicy,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub root: PathBuf,
    pub dry_run: bool,
    pub overwrite: OverwriteMode,
    pub download: DownloadOptions,
    /// `None` disables the pack cache
    pub cache: Option<CacheOptions>,
    pub excluded_folders: Vec<String>,
}

/// Services the pipeline calls out to.
pub struct SyncContext<'a> {
    pub fetcher: &'a dyn PackFetcher,
    pub prompt: &'a dyn ConflictPrompt,
    pub status: &'a dyn StatusSink,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded_files: usize,
    pub deleted_files: usize,
    /// Modified files the user chose to keep
    pub kept_tampered_files: Vec<String>,
    /// Set only for dry runs, which change nothing on disk
    pub dry_run: Option<DryRunReport>,
}

/// Brings the working tree under `options.root` in line with the manifests
/// found in it.
pub fn update_working_tree(
    options: &SyncOptions,
    context: &SyncContext<'_>,
) -> Result<SyncReport, GitDepsError> {
    let root = options.root.as_path();
    tracing::info!(root = %root.display(), "Checking dependencies...");

    let target = collect_target_state(root)?;
    let filter = PathFilter::new(
        ExcludedFolders::new(&options.excluded_folders),
        IgnoreFile::load_from_root(root)?,
    );
    let store = WorkingStateStore::new(root);
    let mut reconciliation = reconcile(root, store.load()?, &target, &filter)?;

    if options.dry_run {
        let report = reconciliation.dry_run_report();
        log_dry_run(&report);
        return Ok(SyncReport {
            dry_run: Some(report),
            ..SyncReport::default()
        });
    }

    let Removals {
        deletable,
        kept: kept_tampered_files,
    } = resolve_conflicts(root, &mut reconciliation, options, context)?;
    let deleted_files = delete_stale_files(root, &deletable)?;

    // Pending entries mark downloads that may be interrupted.
    store.save(&reconciliation.new_manifest)?;

    let cache = options
        .cache
        .as_ref()
        .map(|cache_options| CacheStore::new(&cache_options.path));
    let packs = build_incoming_packs(
        root,
        &reconciliation.files_to_download,
        &target,
        cache.as_ref(),
    )?;
    let summary = download_dependencies(
        packs,
        &options.download,
        context.fetcher,
        cache.as_ref(),
        context.status,
    )?;

    record_downloaded_files(root, &mut reconciliation.new_manifest)?;
    store.save(&reconciliation.new_manifest)?;

    for file in reconciliation
        .filtered_targets
        .iter()
        .filter(|file| file.is_executable)
    {
        let path = resolve_in_root(root, &file.name);
        if path.is_file() {
            set_executable(&path)
                .map_err(|e| GitDepsError::filesystem("set executable bit on", &path, e))?;
        }
    }

    if let Some(cache_options) = &options.cache {
        prune_cache(cache_options, &target);
    }

    tracing::info!(
        downloaded = summary.files,
        deleted = deleted_files,
        cached_bytes = summary.bytes_cached,
        "Dependencies are up to date"
    );
    Ok(SyncReport {
        downloaded_files: summary.files,
        deleted_files,
        kept_tampered_files,
        dry_run: None,
    })
}

/// Stale files cleared for deletion, and the modified ones the user kept.
struct Removals {
    deletable: Vec<WorkingFile>,
    kept: Vec<String>,
}

/// Decides what happens to stale files modified since they were written.
fn resolve_conflicts(
    root: &Path,
    reconciliation: &mut Reconciliation,
    options: &SyncOptions,
    context: &SyncContext<'_>,
) -> Result<Removals, GitDepsError> {
    let RemovalPlan {
        mut deletable,
        tampered,
    } = plan_removals(&reconciliation.stale_files, options.overwrite);
    if tampered.is_empty() {
        return Ok(Removals {
            deletable,
            kept: Vec::new(),
        });
    }

    let names: Vec<String> = tampered
        .iter()
        .map(|file| file.name.clone())
        .sorted()
        .collect();

    match options.overwrite {
        OverwriteMode::Unchanged => {
            for name in &names {
                tracing::error!("Modified: {}", name);
            }
            Err(GitDepsError::TamperedFiles { files: names })
        }
        OverwriteMode::Prompt if !context.prompt.confirm_overwrite(&names) => {
            tracing::info!(count = names.len(), "Keeping modified files");
            reconciliation.freeze(root, &names)?;
            Ok(Removals {
                deletable,
                kept: names,
            })
        }
        OverwriteMode::Prompt | OverwriteMode::Force => {
            deletable.extend(tampered);
            Ok(Removals {
                deletable,
                kept: Vec::new(),
            })
        }
    }
}

fn delete_stale_files(root: &Path, deletable: &[WorkingFile]) -> Result<usize, GitDepsError> {
    for stale_file in deletable {
        let path = resolve_in_root(root, &stale_file.name);
        tracing::debug!(file = %stale_file.name, "Deleting");
        remove_file_if_exists(&path)?;
    }
    Ok(deletable.len())
}

/// Fills in hash and timestamp for entries that were pending a download.
fn record_downloaded_files(root: &Path, manifest: &mut WorkingManifest) -> Result<(), GitDepsError> {
    for file in manifest.files.iter_mut().filter(|file| file.timestamp == 0) {
        let path = resolve_in_root(root, &file.name);
        file.timestamp = file_timestamp(&path)?;
        file.hash = file.expected_hash.clone();
    }
    Ok(())
}

fn prune_cache(cache_options: &CacheOptions, target: &TargetState) {
    let now = SystemTime::now();
    let cache_files: Vec<PathBuf> = target
        .packs()
        .map(|pack| cache_options.path.join(pack.cache_file_name()))
        .collect();
    touch_cache_files(cache_files.iter().map(PathBuf::as_path), now);

    let required_size = target.packs().map(|pack| pack.pack.compressed_size).sum();
    purge_cache_files(&cache_options.path, required_size, cache_options.eviction, now);
}

fn log_dry_run(report: &DryRunReport) {
    for name in &report.add {
        tracing::info!("Add {}", name);
    }
    for name in &report.update {
        tracing::info!("Update {}", name);
    }
    for name in &report.remove {
        tracing::info!("Remove {}", name);
    }
    tracing::info!(
        add = report.add.len(),
        update = report.update.len(),
        remove = report.remove.len(),
        "Dry run complete"
    );
}
