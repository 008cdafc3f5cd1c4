use crate::error::GitDepsError;
use crate::utils::{append_suffix, names_equal};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const WORKING_MANIFEST_NAME: &str = ".gitdeps-state.json";
pub const TEMP_MANIFEST_EXTENSION: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingFile {
    /// Path relative to the root
    pub name: String,
    /// Hash of the content last observed on disk
    pub hash: String,
    /// Modification time (ns since epoch) when `hash` was observed; zero
    /// while a download for this file is outstanding
    pub timestamp: i64,
    /// Hash this tool intended the file to have when it last wrote it
    #[serde(default)]
    pub expected_hash: String,
}

impl WorkingFile {
    pub fn pending(name: impl Into<String>, expected_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: String::new(),
            timestamp: 0,
            expected_hash: expected_hash.into(),
        }
    }

    /// True when the on-disk content no longer matches what was written.
    pub fn is_tampered(&self) -> bool {
        !self.hash.eq_ignore_ascii_case(&self.expected_hash)
    }
}

/// The persisted record of every file this tool manages under the root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkingManifest {
    /// Version of the state file format
    pub version: u32,
    pub files: Vec<WorkingFile>,
}

impl Default for WorkingManifest {
    fn default() -> Self {
        Self {
            version: Self::VERSION,
            files: Vec::new(),
        }
    }
}

impl WorkingManifest {
    pub const VERSION: u32 = 1;

    /// Replaces an entry with the same name, keeping names unique.
    pub fn upsert(&mut self, file: WorkingFile) {
        match self
            .files
            .iter_mut()
            .find(|existing| names_equal(&existing.name, &file.name))
        {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    pub fn get(&self, name: &str) -> Option<&WorkingFile> {
        self.files
            .iter()
            .find(|file| names_equal(&file.name, name))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, GitDepsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| GitDepsError::WorkingStateLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let manifest: WorkingManifest =
            serde_json::from_str(&content).map_err(|e| GitDepsError::WorkingStateLoad {
                path: path.to_path_buf(),
                reason: format!("JSON parsing failed: {}", e),
            })?;

        if manifest.version != Self::VERSION {
            return Err(GitDepsError::WorkingStateLoad {
                path: path.to_path_buf(),
                reason: format!(
                    "State file version {} is not supported. Expected version {}",
                    manifest.version,
                    Self::VERSION
                ),
            });
        }

        Ok(manifest)
    }
}

/// Owns the location of the working-state file and its temporary sibling.
#[derive(Debug, Clone)]
pub struct WorkingStateStore {
    path: PathBuf,
    temp_path: PathBuf,
}

impl WorkingStateStore {
    pub fn new(root: &Path) -> Self {
        let path = root.join(WORKING_MANIFEST_NAME);
        let temp_path = append_suffix(&path, TEMP_MANIFEST_EXTENSION);
        Self { path, temp_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted state. A missing or unreadable file yields an
    /// empty manifest. A temporary file left behind by an interrupted write
    /// is promoted first if the real file is missing.
    pub fn load(&self) -> Result<WorkingManifest, GitDepsError> {
        if self.temp_path.exists() && !self.path.exists() {
            tracing::info!(path = %self.path.display(), "Recovering working state from interrupted write");
            std::fs::rename(&self.temp_path, &self.path)
                .map_err(|e| GitDepsError::filesystem("rename", &self.temp_path, e))?;
        }

        if !self.path.exists() {
            return Ok(WorkingManifest::default());
        }

        match WorkingManifest::load_from_file(&self.path) {
            Ok(manifest) => Ok(manifest),
            Err(e) => {
                tracing::warn!("{}; starting from an empty working state", e);
                Ok(WorkingManifest::default())
            }
        }
    }

    /// Serialises to the temporary file, marks it hidden, removes the old
    /// state file and renames the temporary file into place.
    pub fn save(&self, manifest: &WorkingManifest) -> Result<(), GitDepsError> {
        let json = serde_json::to_string_pretty(manifest).map_err(|e| {
            GitDepsError::WorkingStateSave {
                path: self.temp_path.clone(),
                reason: format!("JSON serialization failed: {}", e),
            }
        })?;

        let mut file = create_hidden(&self.temp_path).map_err(|e| GitDepsError::WorkingStateSave {
            path: self.temp_path.clone(),
            reason: e.to_string(),
        })?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| GitDepsError::WorkingStateSave {
                path: self.temp_path.clone(),
                reason: e.to_string(),
            })?;
        drop(file);

        crate::utils::remove_file_if_exists(&self.path)?;
        std::fs::rename(&self.temp_path, &self.path)
            .map_err(|e| GitDepsError::filesystem("rename", &self.temp_path, e))?;
        tracing::debug!(path = %self.path.display(), files = manifest.files.len(), "Saved working state");
        Ok(())
    }
}

#[cfg(windows)]
fn create_hidden(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::windows::fs::OpenOptionsExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    // CREATE_ALWAYS fails on an existing hidden file unless the attributes match.
    let _ = std::fs::remove_file(path);
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .attributes(FILE_ATTRIBUTE_HIDDEN)
        .open(path)
}

#[cfg(not(windows))]
fn create_hidden(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}
