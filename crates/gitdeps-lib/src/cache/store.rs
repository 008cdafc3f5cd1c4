use crate::extract::{
    INCOMING_FILE_SUFFIX, IncomingFile, PackError, extract_files, extract_files_from_raw_stream,
};
use crate::manifest::TargetPack;
use crate::utils::{append_suffix, remove_file_quiet};
use crate::verification::{ContentHasher, hashes_equal};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Content-addressed store of compressed packs, sharded by the first two
/// characters of the pack hash.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    instance_id: String,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            instance_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn path_for(&self, pack: &TargetPack) -> PathBuf {
        self.root.join(pack.cache_file_name())
    }

    /// Extracts from a cached copy of the pack. Returns `Ok(false)` when no
    /// usable copy exists; a copy that fails to extract is deleted so the
    /// caller falls back to the network.
    pub fn try_extract(&self, cache_file: &Path, files: &[IncomingFile]) -> Result<bool, PackError> {
        let stream = match File::open(cache_file) {
            Ok(stream) => stream,
            Err(_) => return Ok(false),
        };

        match extract_files(stream, files) {
            Ok(()) => Ok(true),
            Err(e) if e.is_retryable() => {
                tracing::warn!(path = %cache_file.display(), "Discarding corrupt cached pack: {}", e);
                remove_file_quiet(cache_file);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Extracts from a network stream while saving the compressed bytes to
    /// the cache. The cached copy is only kept if the decompressed pack
    /// matches `expected_hash`.
    pub fn extract_through_cache<R: Read>(
        &self,
        input: R,
        cache_file: &Path,
        compressed_size: u64,
        expected_hash: &str,
        files: &[IncomingFile],
    ) -> Result<(), PackError> {
        let incoming = append_suffix(
            cache_file,
            &format!("-{}{}", self.instance_id, INCOMING_FILE_SUFFIX),
        );
        let result = self.write_through(input, &incoming, cache_file, compressed_size, expected_hash, files);
        remove_file_quiet(&incoming);
        result
    }

    fn write_through<R: Read>(
        &self,
        input: R,
        incoming: &Path,
        cache_file: &Path,
        compressed_size: u64,
        expected_hash: &str,
        files: &[IncomingFile],
    ) -> Result<(), PackError> {
        if let Some(parent) = incoming.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PackError::filesystem("create directory", parent, e))?;
        }
        let cache_stream =
            File::create(incoming).map_err(|e| PackError::filesystem("create", incoming, e))?;
        cache_stream
            .set_len(compressed_size)
            .map_err(|e| PackError::filesystem("allocate", incoming, e))?;

        let mut fork = ForkReader::new(input, BufWriter::new(cache_stream));
        let mut pack_hasher = ContentHasher::new();
        extract_files_from_raw_stream(GzDecoder::new(&mut fork), files, Some(&mut pack_hasher))?;

        // Trailing bytes after the gzip member still belong in the cached copy.
        std::io::copy(&mut fork, &mut std::io::sink()).map_err(PackError::Read)?;
        let (cache_stream, written) = fork
            .finish()
            .map_err(|e| PackError::filesystem("write", incoming, e))?;
        cache_stream
            .set_len(written)
            .map_err(|e| PackError::filesystem("truncate", incoming, e))?;
        drop(cache_stream);

        let actual_hash = pack_hasher.finalize_hex();
        if !hashes_equal(&actual_hash, expected_hash) {
            return Err(PackError::corrupt(format!(
                "Incorrect hash for pack - expected {}, got {}",
                expected_hash, actual_hash
            )));
        }

        // Another process may have published the same pack already.
        if let Err(e) = std::fs::rename(incoming, cache_file) {
            tracing::debug!(path = %cache_file.display(), "Could not publish cached pack: {}", e);
        }
        Ok(())
    }
}

/// Passes bytes through while copying everything read into a writer.
struct ForkReader<R, W: Write> {
    inner: R,
    fork: W,
    written: u64,
}

impl<R: Read, W: Write> ForkReader<R, W> {
    fn new(inner: R, fork: W) -> Self {
        Self {
            inner,
            fork,
            written: 0,
        }
    }
}

impl<R: Read> ForkReader<R, BufWriter<File>> {
    fn finish(self) -> std::io::Result<(File, u64)> {
        let file = self.fork.into_inner().map_err(|e| e.into_error())?;
        Ok((file, self.written))
    }
}

impl<R: Read, W: Write> Read for ForkReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.inner.read(buf)?;
        self.fork.write_all(&buf[..bytes_read])?;
        self.written += bytes_read as u64;
        Ok(bytes_read)
    }
}
