use filetime::FileTime;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Slack added to the age cutoff so files touched at the start of this run
/// are never considered stale.
const STALE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    /// Cache budget as a multiple of the current dependency set's
    /// compressed size
    pub size_multiplier: f64,
    /// Files younger than this are kept regardless of the budget
    pub max_age: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub kept_files: usize,
    pub kept_bytes: u64,
    pub deleted_files: usize,
    pub deleted_bytes: u64,
}

/// Marks cache files as used by setting their modification time to `now`.
pub fn touch_cache_files<'a>(files: impl IntoIterator<Item = &'a Path>, now: SystemTime) {
    let time = FileTime::from_system_time(now);
    for path in files {
        if path.is_file()
            && let Err(e) = filetime::set_file_mtime(path, time)
        {
            tracing::debug!(path = %path.display(), "Failed to touch cached pack: {}", e);
        }
    }
}

/// Walks the cache newest first, accumulating sizes. A file is deleted only
/// once the accumulated size exceeds `required_size * size_multiplier` and
/// the file is older than `max_age`.
pub fn purge_cache_files(
    cache_root: &Path,
    required_size: u64,
    policy: EvictionPolicy,
    now: SystemTime,
) -> EvictionReport {
    let mut report = EvictionReport::default();
    if !cache_root.is_dir() {
        return report;
    }

    let budget = (required_size as f64 * policy.size_multiplier) as u64;
    let stale_time = now
        .checked_sub(policy.max_age + STALE_GRACE)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut entries: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    for entry in walkdir::WalkDir::new(cache_root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%err, "Failed to walk pack cache");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((entry.into_path(), modified, metadata.len()));
    }
    entries.sort_by(|a, b| b.1.cmp(&a.1));

    let mut cache_size = 0u64;
    for (path, modified, len) in entries {
        if cache_size > budget && modified < stale_time {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    report.deleted_files += 1;
                    report.deleted_bytes += len;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to evict cached pack: {}", e);
                }
            }
        }
        cache_size += len;
        report.kept_files += 1;
        report.kept_bytes += len;
    }

    tracing::info!(
        kept_files = report.kept_files,
        deleted_files = report.deleted_files,
        deleted_bytes = report.deleted_bytes,
        "Pruned pack cache"
    );
    report
}
