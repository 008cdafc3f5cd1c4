use super::fetch::PackFetcher;
use super::progress::{DownloadProgress, StatusFormatter};
use super::queue::{PackQueue, WorkerState};
use super::status::StatusSink;
use super::types::{DownloadOptions, IncomingPack};
use crate::cache::CacheStore;
use crate::error::GitDepsError;
use crate::extract::{IncomingFile, PackError, extract_files};
use crate::manifest::{DependencyBlob, DependencyFile, TargetState, blob_end};
use crate::utils::resolve_in_root;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

pub const STATUS_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub files: usize,
    pub bytes_downloaded: i64,
    pub bytes_cached: i64,
}

/// Groups the blobs backing `required_files` by pack, so that only packs
/// holding at least one needed blob are fetched. Packs come out ordered by
/// hash and their ranges ordered by offset.
pub fn build_incoming_packs(
    root: &Path,
    required_files: &[DependencyFile],
    target: &TargetState,
    cache: Option<&CacheStore>,
) -> Result<Vec<IncomingPack>, GitDepsError> {
    let mut files_by_blob: HashMap<String, Vec<&DependencyFile>> = HashMap::new();
    for file in required_files {
        files_by_blob
            .entry(file.hash.to_ascii_lowercase())
            .or_default()
            .push(file);
    }

    let mut blobs_by_pack: BTreeMap<String, Vec<&DependencyBlob>> = BTreeMap::new();
    for blob_hash in files_by_blob.keys() {
        let blob = target
            .blob(blob_hash)
            .ok_or_else(|| GitDepsError::DanglingReference {
                details: format!("no blob with hash {}", blob_hash),
            })?;
        blobs_by_pack
            .entry(blob.pack_hash.to_ascii_lowercase())
            .or_default()
            .push(blob);
    }

    let mut incoming_packs = Vec::with_capacity(blobs_by_pack.len());
    for (pack_hash, mut blobs) in blobs_by_pack {
        let target_pack = target
            .pack(&pack_hash)
            .ok_or_else(|| GitDepsError::DanglingReference {
                details: format!("no pack with hash {}", pack_hash),
            })?;

        blobs.sort_by_key(|blob| blob.pack_offset);
        let files = blobs
            .into_iter()
            .map(|blob| {
                Ok(IncomingFile {
                    names: files_by_blob
                        .get(&blob.hash.to_ascii_lowercase())
                        .map(|files| {
                            files
                                .iter()
                                .map(|file| resolve_in_root(root, &file.name))
                                .collect()
                        })
                        .unwrap_or_default(),
                    hash: blob.hash.clone(),
                    min_pack_offset: blob.pack_offset,
                    max_pack_offset: blob_end(blob)?,
                })
            })
            .collect::<Result<Vec<_>, GitDepsError>>()?;

        incoming_packs.push(IncomingPack {
            url: target_pack.url(),
            hash: target_pack.pack.hash.clone(),
            compressed_size: target_pack.pack.compressed_size,
            ignore_proxy: target_pack.ignore_proxy,
            cache_file: cache.map(|cache| cache.path_for(target_pack)),
            files,
        });
    }
    Ok(incoming_packs)
}

/// Downloads and extracts `packs` on `options.threads` worker threads,
/// reporting progress to `status` until every file has been written or the
/// run fails.
pub fn download_dependencies(
    packs: Vec<IncomingPack>,
    options: &DownloadOptions,
    fetcher: &dyn PackFetcher,
    cache: Option<&CacheStore>,
    status: &dyn StatusSink,
) -> Result<DownloadSummary, GitDepsError> {
    let files_total: usize = packs.iter().map(IncomingPack::file_count).sum();
    if files_total == 0 {
        return Ok(DownloadSummary::default());
    }
    let bytes_total: u64 = packs.iter().map(|pack| pack.compressed_size).sum();
    let threads = options.threads.max(1);

    tracing::info!(
        packs = packs.len(),
        files = files_total,
        bytes = bytes_total,
        threads,
        "Downloading dependencies"
    );

    let progress = DownloadProgress::new(files_total, bytes_total);
    let queue = PackQueue::new(packs, threads);
    let context = WorkerContext {
        queue: &queue,
        progress: &progress,
        fetcher,
        cache,
        max_retries: options.max_retries,
    };

    let outcome = thread::scope(|scope| {
        for worker in 0..threads {
            let context = &context;
            scope.spawn(move || download_worker(worker, context));
        }
        let outcome = supervise(&queue, &progress, status);
        progress.request_stop();
        outcome
    });

    let snapshot = progress.snapshot();
    outcome.map(|()| DownloadSummary {
        files: snapshot.files_read,
        bytes_downloaded: snapshot.bytes_read,
        bytes_cached: snapshot.bytes_cached,
    })
}

fn supervise(
    queue: &PackQueue,
    progress: &DownloadProgress,
    status: &dyn StatusSink,
) -> Result<(), GitDepsError> {
    let mut formatter = StatusFormatter::new(STATUS_INTERVAL.as_millis() as u64);
    loop {
        let queue_status = queue.status();
        let snapshot = progress.snapshot();
        status.update(&formatter.format(&snapshot));

        let outcome = if snapshot.is_complete() {
            Some(Ok(()))
        } else if let Some(message) = progress.fatal_error() {
            Some(Err(GitDepsError::Download { message }))
        } else if queue_status.all_failed() {
            let message = progress
                .last_error()
                .unwrap_or_else(|| "All download workers failed".to_string());
            Some(Err(GitDepsError::Download { message }))
        } else {
            None
        };

        if let Some(outcome) = outcome {
            status.finish();
            return outcome;
        }
        thread::sleep(STATUS_INTERVAL);
    }
}

struct WorkerContext<'a> {
    queue: &'a PackQueue,
    progress: &'a DownloadProgress,
    fetcher: &'a dyn PackFetcher,
    cache: Option<&'a CacheStore>,
    max_retries: usize,
}

enum PackSource {
    Cache,
    Network { transferred: u64 },
}

fn download_worker(worker: usize, context: &WorkerContext<'_>) {
    let progress = context.progress;
    let mut retries = 0usize;
    loop {
        if progress.is_stopped() {
            return;
        }
        let Some(pack) = context.queue.dequeue(worker) else {
            if progress.is_complete() {
                return;
            }
            thread::sleep(IDLE_POLL_INTERVAL);
            continue;
        };
        if progress.is_stopped() {
            context.queue.requeue(worker, pack, WorkerState::Idle);
            return;
        }

        let mut transferred = 0u64;
        match process_pack(context, &pack, &mut transferred) {
            Ok(source) => {
                let compressed_size = to_i64(pack.compressed_size);
                match source {
                    PackSource::Cache => progress.add_bytes_cached(compressed_size),
                    PackSource::Network { transferred } => {
                        progress.adjust_bytes_total(to_i64(transferred) - compressed_size)
                    }
                }
                progress.add_files_read(pack.file_count());
                tracing::debug!(pack = %pack.hash, files = pack.file_count(), "Pack complete");
                retries = 0;
                context.queue.complete(worker);
            }
            Err(e) => {
                progress.add_bytes_read(-to_i64(transferred));
                if progress.is_stopped() {
                    context.queue.requeue(worker, pack, WorkerState::Idle);
                    return;
                }

                let message = format!("Failed to download {}: {}", pack.url, e);
                if !e.is_retryable() {
                    tracing::error!("{}", message);
                    progress.set_fatal_error(message);
                    progress.request_stop();
                    context.queue.requeue(worker, pack, WorkerState::PermanentlyFailed);
                    return;
                }

                retries += 1;
                progress.set_last_error(message.clone());
                if retries > context.max_retries {
                    tracing::warn!(worker, retries, "{}; giving up", message);
                    context.queue.requeue(worker, pack, WorkerState::PermanentlyFailed);
                    return;
                }
                tracing::warn!(worker, attempt = retries, "{}; retrying", message);
                context.queue.requeue(worker, pack, WorkerState::Retrying);
            }
        }
    }
}

/// Serves a pack from the cache when possible, otherwise streams it from
/// the fetcher. `transferred` receives the compressed bytes read from the
/// network, including on failure.
fn process_pack(
    context: &WorkerContext<'_>,
    pack: &IncomingPack,
    transferred: &mut u64,
) -> Result<PackSource, PackError> {
    let cache = context.cache.zip(pack.cache_file.as_deref());
    if let Some((cache, cache_file)) = cache
        && cache.try_extract(cache_file, &pack.files)?
    {
        tracing::trace!(pack = %pack.hash, "Served from cache");
        return Ok(PackSource::Cache);
    }

    let stream = context.fetcher.open(pack)?;
    let mut reader = CountingReader::new(stream, context.progress);
    let result = match cache {
        Some((cache, cache_file)) => cache.extract_through_cache(
            &mut reader,
            cache_file,
            pack.compressed_size,
            &pack.hash,
            &pack.files,
        ),
        None => extract_files(&mut reader, &pack.files),
    };
    *transferred = reader.count;
    result.map(|()| PackSource::Network {
        transferred: *transferred,
    })
}

/// Adds every byte read to the shared progress and stops reading once the
/// run is stopped.
struct CountingReader<'a, R> {
    inner: R,
    progress: &'a DownloadProgress,
    count: u64,
}

impl<'a, R: Read> CountingReader<'a, R> {
    fn new(inner: R, progress: &'a DownloadProgress) -> Self {
        Self {
            inner,
            progress,
            count: 0,
        }
    }
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.progress.is_stopped() {
            return Err(std::io::Error::other("download cancelled"));
        }
        let bytes_read = self.inner.read(buf)?;
        self.count += bytes_read as u64;
        self.progress.add_bytes_read(bytes_read as i64);
        Ok(bytes_read)
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::NoStatus;
    use crate::manifest::{DependencyManifest, DependencyPack};
    use crate::verification::ContentHasher;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sha1_hex(data: &[u8]) -> String {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize_hex()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Serves packs from memory, failing the first `failures` requests.
    struct FakeFetcher {
        packs: HashMap<String, Vec<u8>>,
        failures: AtomicUsize,
        requests: Mutex<Vec<String>>,
        ignore_proxy: Mutex<Vec<bool>>,
    }

    impl FakeFetcher {
        fn new(packs: HashMap<String, Vec<u8>>, failures: usize) -> Self {
            Self {
                packs,
                failures: AtomicUsize::new(failures),
                requests: Mutex::new(Vec::new()),
                ignore_proxy: Mutex::new(Vec::new()),
            }
        }
    }

    impl PackFetcher for FakeFetcher {
        fn open(&self, pack: &IncomingPack) -> Result<Box<dyn Read + Send>, PackError> {
            self.requests.lock().push(pack.hash.clone());
            self.ignore_proxy.lock().push(pack.ignore_proxy);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(PackError::Network {
                    url: pack.url.clone(),
                    reason: "connection reset".to_string(),
                });
            }
            match self.packs.get(&pack.hash) {
                Some(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
                None => Err(PackError::Network {
                    url: pack.url.clone(),
                    reason: "404 Not Found".to_string(),
                }),
            }
        }
    }

    /// One pack holding "hello" at 0 and "world!" at 5, with "hello" wanted
    /// at two paths.
    fn fixture() -> (TargetState, Vec<DependencyFile>, String, Vec<u8>) {
        fixture_with_proxy_setting(false)
    }

    fn fixture_with_proxy_setting(
        ignore_proxy: bool,
    ) -> (TargetState, Vec<DependencyFile>, String, Vec<u8>) {
        let raw = b"helloworld!";
        let pack_hash = sha1_hex(raw);
        let hello = sha1_hex(b"hello");
        let world = sha1_hex(b"world!");
        let compressed = gzip(raw);

        let files = vec![
            DependencyFile {
                name: "A/hello.txt".to_string(),
                hash: hello.clone(),
                is_executable: false,
            },
            DependencyFile {
                name: "B/hello.txt".to_string(),
                hash: hello.clone(),
                is_executable: false,
            },
            DependencyFile {
                name: "A/world.txt".to_string(),
                hash: world.clone(),
                is_executable: false,
            },
        ];
        let manifest = DependencyManifest {
            base_url: "http://cdn.invalid/deps".to_string(),
            ignore_proxy,
            files: files.clone(),
            blobs: vec![
                DependencyBlob {
                    hash: world,
                    pack_hash: pack_hash.clone(),
                    pack_offset: 5,
                    size: 6,
                },
                DependencyBlob {
                    hash: hello,
                    pack_hash: pack_hash.clone(),
                    pack_offset: 0,
                    size: 5,
                },
            ],
            packs: vec![DependencyPack {
                hash: pack_hash.clone(),
                size: Some(raw.len() as u64),
                compressed_size: compressed.len() as u64,
                remote_path: "packs".to_string(),
            }],
        };
        let mut target = TargetState::default();
        target.add_manifest(manifest, "").unwrap();
        (target, files, pack_hash, compressed)
    }

    fn options(threads: usize, max_retries: usize) -> DownloadOptions {
        DownloadOptions {
            threads,
            max_retries,
        }
    }

    #[test]
    fn test_build_incoming_packs_orders_ranges_and_fans_out_names() {
        let dir = tempfile::tempdir().unwrap();
        let (target, files, pack_hash, _) = fixture();

        let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();

        assert_eq!(packs.len(), 1);
        let pack = &packs[0];
        assert_eq!(pack.url, format!("http://cdn.invalid/deps/packs/{}", pack_hash));
        assert_eq!(pack.files[0].min_pack_offset, 0);
        assert_eq!(pack.files[0].names.len(), 2);
        assert_eq!(pack.files[1].min_pack_offset, 5);
        assert_eq!(pack.file_count(), 3);
        assert!(pack.cache_file.is_none());
    }

    #[test]
    fn test_build_incoming_packs_skips_unneeded_packs() {
        let dir = tempfile::tempdir().unwrap();
        let (target, _, _, _) = fixture();
        assert!(build_incoming_packs(dir.path(), &[], &target, None).unwrap().is_empty());
    }

    #[test]
    fn test_build_incoming_packs_rejects_unknown_blob() {
        let dir = tempfile::tempdir().unwrap();
        let (target, _, _, _) = fixture();
        let missing = vec![DependencyFile {
            name: "x".to_string(),
            hash: "0000".to_string(),
            is_executable: false,
        }];
        assert!(matches!(
            build_incoming_packs(dir.path(), &missing, &target, None),
            Err(GitDepsError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_build_incoming_packs_rejects_overflowing_range() {
        let dir = tempfile::tempdir().unwrap();
        let file = DependencyFile {
            name: "x.bin".to_string(),
            hash: "b1".to_string(),
            is_executable: false,
        };
        let manifest = DependencyManifest {
            base_url: "http://cdn.invalid".to_string(),
            ignore_proxy: false,
            files: vec![file.clone()],
            blobs: vec![DependencyBlob {
                hash: "b1".to_string(),
                pack_hash: "p1".to_string(),
                pack_offset: u64::MAX,
                size: 2,
            }],
            packs: vec![DependencyPack {
                hash: "p1".to_string(),
                size: None,
                compressed_size: 1,
                remote_path: "packs".to_string(),
            }],
        };
        let mut target = TargetState::default();
        target.add_manifest(manifest, "").unwrap();

        assert!(matches!(
            build_incoming_packs(dir.path(), &[file], &target, None),
            Err(GitDepsError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_download_extracts_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let (target, files, pack_hash, compressed) = fixture();
        let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();
        let fetcher = FakeFetcher::new(HashMap::from([(pack_hash, compressed.clone())]), 0);

        let summary = download_dependencies(packs, &options(2, 0), &fetcher, None, &NoStatus).unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.bytes_downloaded, compressed.len() as i64);
        assert_eq!(std::fs::read(dir.path().join("A/hello.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dir.path().join("B/hello.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dir.path().join("A/world.txt")).unwrap(), b"world!");
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (target, files, pack_hash, compressed) = fixture();
        let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();
        let fetcher = FakeFetcher::new(HashMap::from([(pack_hash, compressed.clone())]), 2);

        let summary = download_dependencies(packs, &options(1, 4), &fetcher, None, &NoStatus).unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.bytes_downloaded, compressed.len() as i64);
        assert_eq!(fetcher.requests.lock().len(), 3);
    }

    #[test]
    fn test_exhausted_retries_fail_with_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let (target, files, _, _) = fixture();
        let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();
        let fetcher = FakeFetcher::new(HashMap::new(), 0);

        let err = download_dependencies(packs, &options(2, 1), &fetcher, None, &NoStatus).unwrap_err();

        match err {
            GitDepsError::Download { message } => assert!(message.contains("404 Not Found")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("A/hello.txt").exists());
    }

    #[test]
    fn test_corrupt_pack_is_retried_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (target, files, pack_hash, _) = fixture();
        let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();
        let fetcher = FakeFetcher::new(HashMap::from([(pack_hash, gzip(b"hellXworld!"))]), 0);

        let err = download_dependencies(packs, &options(1, 2), &fetcher, None, &NoStatus).unwrap_err();

        assert!(matches!(err, GitDepsError::Download { .. }));
        assert_eq!(fetcher.requests.lock().len(), 3);
    }

    #[test]
    fn test_filesystem_error_aborts_without_retrying() {
        let dir = tempfile::tempdir().unwrap();
        // "A" is a file, so nothing can be created below it.
        std::fs::write(dir.path().join("A"), b"in the way").unwrap();
        let (target, files, pack_hash, compressed) = fixture();
        let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();
        let fetcher = FakeFetcher::new(HashMap::from([(pack_hash, compressed)]), 0);

        let err = download_dependencies(packs, &options(2, 4), &fetcher, None, &NoStatus).unwrap_err();

        assert!(matches!(err, GitDepsError::Download { .. }));
        assert_eq!(fetcher.requests.lock().len(), 1);
    }

    #[test]
    fn test_pack_of_failed_worker_is_finished_by_another() {
        let dir = tempfile::tempdir().unwrap();
        let (target, files, pack_hash, compressed) = fixture();
        let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();
        // No retries: the first worker gives up after one failure.
        let fetcher = FakeFetcher::new(HashMap::from([(pack_hash, compressed)]), 1);

        let summary = download_dependencies(packs, &options(2, 0), &fetcher, None, &NoStatus).unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(fetcher.requests.lock().len(), 2);
        assert_eq!(std::fs::read(dir.path().join("A/world.txt")).unwrap(), b"world!");
    }

    #[test]
    fn test_ignore_proxy_flag_reaches_fetcher() {
        for ignore_proxy in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let (target, files, pack_hash, compressed) = fixture_with_proxy_setting(ignore_proxy);
            let packs = build_incoming_packs(dir.path(), &files, &target, None).unwrap();
            assert!(packs.iter().all(|pack| pack.ignore_proxy == ignore_proxy));
            let fetcher = FakeFetcher::new(HashMap::from([(pack_hash, compressed)]), 0);

            download_dependencies(packs, &options(1, 0), &fetcher, None, &NoStatus).unwrap();

            assert_eq!(*fetcher.ignore_proxy.lock(), vec![ignore_proxy]);
        }
    }

    #[test]
    fn test_second_run_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(cache_dir.path());
        let (target, files, pack_hash, compressed) = fixture();
        let fetcher = FakeFetcher::new(HashMap::from([(pack_hash, compressed.clone())]), 0);

        let packs = build_incoming_packs(dir.path(), &files, &target, Some(&cache)).unwrap();
        download_dependencies(packs, &options(1, 0), &fetcher, Some(&cache), &NoStatus).unwrap();
        std::fs::remove_file(dir.path().join("A/world.txt")).unwrap();

        let packs = build_incoming_packs(dir.path(), &files, &target, Some(&cache)).unwrap();
        let summary =
            download_dependencies(packs, &options(1, 0), &fetcher, Some(&cache), &NoStatus).unwrap();

        assert_eq!(fetcher.requests.lock().len(), 1);
        assert_eq!(summary.bytes_downloaded, 0);
        assert_eq!(summary.bytes_cached, compressed.len() as i64);
        assert_eq!(std::fs::read(dir.path().join("A/world.txt")).unwrap(), b"world!");
    }

    #[test]
    fn test_empty_download_set_does_nothing() {
        let fetcher = FakeFetcher::new(HashMap::new(), 0);
        let summary = download_dependencies(Vec::new(), &options(4, 0), &fetcher, None, &NoStatus).unwrap();
        assert_eq!(summary, DownloadSummary::default());
        assert!(fetcher.requests.lock().is_empty());
    }
}
