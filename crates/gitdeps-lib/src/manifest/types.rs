use serde::Deserialize;
use std::path::PathBuf;

/// A file the target state wants on disk, relative to the root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyFile {
    #[serde(rename = "@Name")]
    pub name: String,
    #[serde(rename = "@Hash")]
    pub hash: String,
    #[serde(rename = "@IsExecutable", default)]
    pub is_executable: bool,
}

/// A contiguous byte range inside the decompressed stream of one pack.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyBlob {
    #[serde(rename = "@Hash")]
    pub hash: String,
    #[serde(rename = "@PackHash")]
    pub pack_hash: String,
    #[serde(rename = "@PackOffset")]
    pub pack_offset: u64,
    #[serde(rename = "@Size")]
    pub size: u64,
}

/// A downloadable, gzip-compressed container of blobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyPack {
    #[serde(rename = "@Hash")]
    pub hash: String,
    /// Decompressed size, when the manifest declares one
    #[serde(rename = "@Size", default)]
    pub size: Option<u64>,
    #[serde(rename = "@CompressedSize")]
    pub compressed_size: u64,
    #[serde(rename = "@RemotePath")]
    pub remote_path: String,
}

/// One parsed `*.gitdeps.xml` document.
#[derive(Debug, Clone, Default)]
pub struct DependencyManifest {
    pub base_url: String,
    pub ignore_proxy: bool,
    pub files: Vec<DependencyFile>,
    pub blobs: Vec<DependencyBlob>,
    pub packs: Vec<DependencyPack>,
}

/// A pack together with the manifest-level settings needed to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPack {
    pub pack: DependencyPack,
    pub base_url: String,
    pub ignore_proxy: bool,
}

impl TargetPack {
    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.pack.remote_path.trim_matches('/'),
            self.pack.hash
        )
    }

    /// Location of this pack inside a cache directory, sharded by the first
    /// two characters of its hash.
    pub fn cache_file_name(&self) -> PathBuf {
        let hash = self.pack.hash.to_ascii_lowercase();
        let shard: String = hash.chars().take(2).collect();
        PathBuf::from(shard).join(hash)
    }
}
