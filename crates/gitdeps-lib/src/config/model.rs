use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to treat files that were modified since this tool last wrote them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Abort and list the modified files
    #[default]
    Unchanged,
    /// Ask whether to overwrite them
    Prompt,
    /// Overwrite them without asking
    Force,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub threads: usize,
    pub max_retries: usize,
    pub cache_size_multiplier: f64,
    pub cache_days: u64,
    pub cache_path: Option<PathBuf>,
    pub no_cache: bool,
    pub proxy: Option<String>,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<String>,
    pub exclude: Vec<String>,
    pub overwrite: OverwriteMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: 4,
            max_retries: 4,
            cache_size_multiplier: 2.0,
            cache_days: 7,
            cache_path: None,
            no_cache: false,
            proxy: None,
            proxy_user: None,
            proxy_password: None,
            exclude: Vec::new(),
            overwrite: OverwriteMode::Unchanged,
        }
    }
}
