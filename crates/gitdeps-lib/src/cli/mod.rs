mod args;
mod params;
mod resolved_command;
mod sync;

pub use args::{Args, Command, SettingsOverrides, parse_args};
pub use params::SyncParams;
pub use resolved_command::{ResolvedCommand, apply_overrides, resolve_command};
pub use sync::run_sync;
