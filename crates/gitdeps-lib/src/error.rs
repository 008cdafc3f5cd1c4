use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitDepsError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    #[error("Manifest reference could not be resolved: {details}")]
    DanglingReference { details: String },

    #[error("Invalid manifest entry: {details}")]
    InvalidManifest { details: String },

    #[error("Refusing to write outside the working tree: {name}")]
    UnsafePath { name: String },

    #[error(
        "The following file(s) have been modified:\n  {}\nRe-run with --force to overwrite them.",
        .files.join("\n  ")
    )]
    TamperedFiles { files: Vec<String> },

    #[error("Failed to {action} '{path}': {source}")]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load working state from {path}: {reason}")]
    WorkingStateLoad { path: PathBuf, reason: String },

    #[error("Failed to save working state to {path}: {reason}")]
    WorkingStateSave { path: PathBuf, reason: String },

    #[error("Download error: {message}")]
    Download { message: String },

    #[error("Invalid command line arguments: {details}")]
    CliArgumentValidation { details: String },

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] eyre::Report),
}

impl GitDepsError {
    pub fn filesystem(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }
}
