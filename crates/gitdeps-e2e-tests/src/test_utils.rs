use eyre::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use gitdeps_lib::config::OverwriteMode;
use gitdeps_lib::download::{DownloadOptions, IncomingPack, PackFetcher};
use gitdeps_lib::extract::PackError;
use gitdeps_lib::sync::SyncOptions;
use gitdeps_lib::working::{WorkingManifest, WorkingStateStore};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

pub const BASE_URL: &str = "http://deps.invalid/gitdeps";

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("writing to an in-memory encoder cannot fail");
    encoder
        .finish()
        .expect("finishing an in-memory encoder cannot fail")
}

#[derive(Debug, Clone)]
pub struct TestPack {
    pub hash: String,
    pub compressed: Vec<u8>,
}

#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    hash: String,
    is_executable: bool,
}

#[derive(Debug, Clone)]
struct BlobEntry {
    hash: String,
    pack_hash: String,
    offset: usize,
    size: usize,
}

/// Builds a `*.gitdeps.xml` document together with the packs it refers to.
#[derive(Debug, Clone, Default)]
pub struct ManifestBuilder {
    files: Vec<FileEntry>,
    blobs: Vec<BlobEntry>,
    packs: Vec<(TestPack, usize)>,
    ignore_proxy: bool,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_proxy(mut self, ignore_proxy: bool) -> Self {
        self.ignore_proxy = ignore_proxy;
        self
    }

    /// Adds one pack holding `files`. Identical contents share a blob.
    pub fn pack(mut self, files: &[(&str, &[u8])]) -> Self {
        self.add_pack(files, &[]);
        self
    }

    /// Like [`pack`](Self::pack), marking the named files executable.
    pub fn pack_with_executables(mut self, files: &[(&str, &[u8])], executables: &[&str]) -> Self {
        self.add_pack(files, executables);
        self
    }

    fn add_pack(&mut self, files: &[(&str, &[u8])], executables: &[&str]) {
        let mut raw = Vec::new();
        let mut blobs: Vec<BlobEntry> = Vec::new();
        for (name, content) in files {
            let hash = sha1_hex(content);
            if !blobs.iter().any(|blob| blob.hash == hash) {
                blobs.push(BlobEntry {
                    hash: hash.clone(),
                    pack_hash: String::new(),
                    offset: raw.len(),
                    size: content.len(),
                });
                raw.extend_from_slice(content);
            }
            self.files.push(FileEntry {
                name: name.to_string(),
                hash,
                is_executable: executables.contains(name),
            });
        }

        let pack = TestPack {
            hash: sha1_hex(&raw),
            compressed: gzip(&raw),
        };
        for mut blob in blobs {
            blob.pack_hash = pack.hash.clone();
            self.blobs.push(blob);
        }
        self.packs.push((pack, raw.len()));
    }

    pub fn packs(&self) -> Vec<TestPack> {
        self.packs.iter().map(|(pack, _)| pack.clone()).collect()
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        xml.push_str(&format!(
            "<DependencyManifest BaseUrl=\"{}\" IgnoreProxy=\"{}\">\n  <Files>\n",
            BASE_URL, self.ignore_proxy
        ));
        for file in &self.files {
            xml.push_str(&format!(
                "    <File Name=\"{}\" Hash=\"{}\"{} />\n",
                file.name,
                file.hash,
                if file.is_executable {
                    " IsExecutable=\"true\""
                } else {
                    ""
                }
            ));
        }
        xml.push_str("  </Files>\n  <Blobs>\n");
        for blob in &self.blobs {
            xml.push_str(&format!(
                "    <Blob Hash=\"{}\" Size=\"{}\" PackHash=\"{}\" PackOffset=\"{}\" />\n",
                blob.hash, blob.size, blob.pack_hash, blob.offset
            ));
        }
        xml.push_str("  </Blobs>\n  <Packs>\n");
        for (pack, size) in &self.packs {
            xml.push_str(&format!(
                "    <Pack Hash=\"{}\" Size=\"{}\" CompressedSize=\"{}\" RemotePath=\"packs\" />\n",
                pack.hash,
                size,
                pack.compressed.len()
            ));
        }
        xml.push_str("  </Packs>\n</DependencyManifest>\n");
        xml
    }
}

/// Serves packs from memory and counts requests.
#[derive(Debug, Default)]
pub struct InMemoryFetcher {
    packs: Mutex<HashMap<String, Vec<u8>>>,
    requests: AtomicUsize,
    offline: AtomicBool,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, packs: impl IntoIterator<Item = TestPack>) {
        let mut served = self.packs.lock();
        for pack in packs {
            served.insert(pack.hash, pack.compressed);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PackFetcher for InMemoryFetcher {
    fn open(&self, pack: &IncomingPack) -> Result<Box<dyn Read + Send>, PackError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(url = %pack.url, "Serving pack from memory");
        let expected_url = format!("{}/packs/{}", BASE_URL, pack.hash);
        if self.offline.load(Ordering::SeqCst) || pack.url != expected_url {
            return Err(PackError::Network {
                url: pack.url.clone(),
                reason: "connection refused".to_string(),
            });
        }
        match self.packs.lock().get(&pack.hash) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(PackError::Network {
                url: pack.url.clone(),
                reason: "404 Not Found".to_string(),
            }),
        }
    }
}

/// A scratch working tree.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes `<root>/Engine/Build/<name>.gitdeps.xml`.
    pub fn write_manifest(&self, name: &str, manifest: &ManifestBuilder) -> Result<()> {
        let build = self.path("Engine/Build");
        std::fs::create_dir_all(&build)?;
        std::fs::write(build.join(format!("{name}.gitdeps.xml")), manifest.to_xml())?;
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path(name))?)
    }

    pub fn write(&self, name: &str, content: &[u8]) -> Result<()> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overwrites a file and gives it a modification time no download produces.
    pub fn tamper(&self, name: &str, content: &[u8]) -> Result<()> {
        self.write(name, content)?;
        filetime::set_file_mtime(
            self.path(name),
            filetime::FileTime::from_unix_time(1_000_000_000, 0),
        )?;
        Ok(())
    }

    pub fn working_state(&self) -> Result<WorkingManifest> {
        Ok(WorkingStateStore::new(self.root()).load()?)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            root: self.root().to_path_buf(),
            dry_run: false,
            overwrite: OverwriteMode::Unchanged,
            download: DownloadOptions {
                threads: 2,
                max_retries: 1,
            },
            cache: None,
            excluded_folders: Vec::new(),
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("gitdeps_lib=debug,gitdeps_e2e_tests=debug")
        .with_test_writer()
        .try_init()
        .ok();
}
