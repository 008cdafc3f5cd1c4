mod loader;
mod model;

pub use loader::{ENV_PREFIX, load_settings};
pub use model::{OverwriteMode, Settings};

use crate::error::GitDepsError;
use std::path::{Path, PathBuf};
use url::Url;

pub const CACHE_FOLDER_NAME: &str = "gitdeps-cache";

/// `<repo>/.git/gitdeps-cache` for the nearest ancestor of `root` that holds
/// a `.git` directory.
pub fn default_cache_path(root: &Path) -> Option<PathBuf> {
    root.ancestors()
        .map(|dir| dir.join(".git"))
        .find(|git_dir| git_dir.is_dir())
        .map(|git_dir| git_dir.join(CACHE_FOLDER_NAME))
}

/// The cache directory to use for this run, or `None` when caching is off.
pub fn resolve_cache_path(settings: &Settings, root: &Path) -> Option<PathBuf> {
    if settings.no_cache {
        return None;
    }
    settings
        .cache_path
        .clone()
        .or_else(|| default_cache_path(root))
}

/// The configured proxy, falling back to `HTTP_PROXY`/`http_proxy`.
/// Credentials embedded in the URL take precedence over `proxy_user` and
/// `proxy_password`.
pub fn resolve_proxy(settings: &Settings) -> Result<Option<Url>, GitDepsError> {
    let proxy = settings
        .proxy
        .clone()
        .or_else(|| std::env::var("HTTP_PROXY").ok())
        .or_else(|| std::env::var("http_proxy").ok())
        .filter(|proxy| !proxy.trim().is_empty());
    let Some(proxy) = proxy else {
        return Ok(None);
    };

    let mut url = Url::parse(proxy.trim()).map_err(|e| GitDepsError::CliArgumentValidation {
        details: format!("Invalid proxy URL '{}': {}", proxy, e),
    })?;

    if url.username().is_empty()
        && let Some(user) = settings.proxy_user.as_deref()
    {
        let invalid = |_| GitDepsError::CliArgumentValidation {
            details: format!("Proxy URL '{}' cannot carry credentials", proxy),
        };
        url.set_username(user).map_err(invalid)?;
        url.set_password(settings.proxy_password.as_deref())
            .map_err(invalid)?;
    }
    Ok(Some(url))
}

pub fn validate_settings(settings: &Settings) -> Result<(), GitDepsError> {
    if settings.threads == 0 {
        return Err(GitDepsError::CliArgumentValidation {
            details: "threads must be greater than 0.".to_string(),
        });
    }
    if !(settings.cache_size_multiplier.is_finite() && settings.cache_size_multiplier >= 0.0) {
        return Err(GitDepsError::CliArgumentValidation {
            details: "cache-size-multiplier must be a non-negative number.".to_string(),
        });
    }
    Ok(())
}
