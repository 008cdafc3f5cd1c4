use crate::extract::IncomingFile;
use std::path::PathBuf;

/// A pack queued for download, with the ranges to cut out of it.
#[derive(Clone, Debug)]
pub struct IncomingPack {
    pub url: String,
    pub hash: String,
    pub compressed_size: u64,
    pub ignore_proxy: bool,
    /// Location of this pack in the cache, when caching is enabled
    pub cache_file: Option<PathBuf>,
    /// Sorted by pack offset
    pub files: Vec<IncomingFile>,
}

impl IncomingPack {
    /// Number of output files this pack produces, counting every name a
    /// shared blob is written to.
    pub fn file_count(&self) -> usize {
        self.files.iter().map(|file| file.names.len()).sum()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DownloadOptions {
    pub threads: usize,
    pub max_retries: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            max_retries: 4,
        }
    }
}
