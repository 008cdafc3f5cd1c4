pub mod cache;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod filter;
pub mod manifest;
pub mod prompt;
pub mod sync;
pub mod utils;
pub mod verification;
pub mod working;

pub use config::Settings;
pub use error::GitDepsError;
pub use sync::{SyncContext, SyncOptions, SyncReport, update_working_tree};
