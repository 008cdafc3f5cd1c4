use std::path::PathBuf;
use thiserror::Error;

/// Failure while fetching or unpacking a single pack.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("Corrupt pack: {message}")]
    Corrupt { message: String },

    #[error("Can't read from pack stream: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to fetch {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Failed to {action} '{path}': {source}")]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PackError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    /// Network and integrity failures are retried by re-queueing the pack;
    /// local filesystem failures abort the run.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Filesystem { .. })
    }
}
