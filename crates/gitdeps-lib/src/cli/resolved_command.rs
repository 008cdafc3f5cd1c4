use crate::cache::EvictionPolicy;
use crate::cli::args::{Command, SettingsOverrides};
use crate::cli::params::SyncParams;
use crate::config::{
    OverwriteMode, Settings, load_settings, resolve_cache_path, resolve_proxy, validate_settings,
};
use crate::download::DownloadOptions;
use crate::error::GitDepsError;
use crate::sync::{CacheOptions, SyncOptions};
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub enum ResolvedCommand {
    Sync(SyncParams),
}

pub fn resolve_command(command: Command) -> Result<ResolvedCommand, GitDepsError> {
    match command {
        Command::Sync {
            root,
            config_path,
            dry_run,
            overrides,
        } => {
            let root = match root {
                Some(root) => root,
                None => std::env::current_dir()
                    .map_err(|e| GitDepsError::filesystem("read", "current directory", e))?,
            };
            let root = std::path::absolute(&root)
                .map_err(|e| GitDepsError::filesystem("resolve", &root, e))?;
            if !root.is_dir() {
                return Err(GitDepsError::CliArgumentValidation {
                    details: format!("Root directory {} does not exist.", root.display()),
                });
            }

            let mut settings = load_settings(config_path.as_deref())?;
            apply_overrides(&mut settings, overrides);
            validate_settings(&settings)?;

            let proxy = resolve_proxy(&settings)?;
            let cache = resolve_cache_path(&settings, &root).map(|path| CacheOptions {
                path,
                eviction: EvictionPolicy {
                    size_multiplier: settings.cache_size_multiplier,
                    max_age: Duration::from_secs(settings.cache_days.saturating_mul(SECONDS_PER_DAY)),
                },
            });
            match &cache {
                Some(cache) => tracing::debug!(path = %cache.path.display(), "Using pack cache"),
                None => tracing::debug!("Pack cache disabled"),
            }

            Ok(ResolvedCommand::Sync(SyncParams {
                options: SyncOptions {
                    root,
                    dry_run,
                    overwrite: settings.overwrite,
                    download: DownloadOptions {
                        threads: settings.threads,
                        max_retries: settings.max_retries,
                    },
                    cache,
                    excluded_folders: settings.exclude,
                },
                proxy,
            }))
        }
    }
}

/// Applies command-line values on top of the layered settings. Excluded
/// folders accumulate; everything else replaces.
pub fn apply_overrides(settings: &mut Settings, overrides: SettingsOverrides) {
    let SettingsOverrides {
        threads,
        max_retries,
        cache_path,
        no_cache,
        cache_size_multiplier,
        cache_days,
        proxy,
        proxy_user,
        proxy_password,
        exclude,
        force,
        prompt,
    } = overrides;

    if let Some(threads) = threads {
        settings.threads = threads;
    }
    if let Some(max_retries) = max_retries {
        settings.max_retries = max_retries;
    }
    if let Some(cache_path) = cache_path {
        settings.cache_path = Some(cache_path);
    }
    settings.no_cache |= no_cache;
    if let Some(cache_size_multiplier) = cache_size_multiplier {
        settings.cache_size_multiplier = cache_size_multiplier;
    }
    if let Some(cache_days) = cache_days {
        settings.cache_days = cache_days;
    }
    if proxy.is_some() {
        settings.proxy = proxy;
    }
    if proxy_user.is_some() {
        settings.proxy_user = proxy_user;
        settings.proxy_password = proxy_password;
    }
    settings.exclude.extend(exclude);
    if force {
        settings.overwrite = OverwriteMode::Force;
    } else if prompt {
        settings.overwrite = OverwriteMode::Prompt;
    }
}
