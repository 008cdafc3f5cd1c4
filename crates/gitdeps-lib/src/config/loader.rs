use super::Settings;
use crate::error::GitDepsError;
use config::{Config as ConfigBuilder, Environment, File};
use std::path::Path;

pub const ENV_PREFIX: &str = "GITDEPS";

/// Layers built-in defaults, an optional settings file and `GITDEPS_*`
/// environment variables, later sources winning.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings, GitDepsError> {
    let mut builder =
        ConfigBuilder::builder().add_source(ConfigBuilder::try_from(&Settings::default())?);

    if let Some(config_path) = config_path {
        builder = builder.add_source(File::from(config_path));
    }

    let config_builder = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exclude"),
        )
        .build()?;

    config_builder.try_deserialize().map_err(Into::into)
}
