use super::params::SyncParams;
use crate::download::{ConsoleStatus, HttpPackFetcher};
use crate::error::GitDepsError;
use crate::prompt::StdinPrompt;
use crate::sync::{SyncContext, SyncReport, update_working_tree};

/// Runs the blocking sync pipeline off the async runtime. The HTTP client
/// is created and dropped on the blocking thread.
pub async fn run_sync(params: SyncParams) -> Result<SyncReport, GitDepsError> {
    tokio::task::spawn_blocking(move || {
        let fetcher =
            HttpPackFetcher::new(params.proxy.as_ref(), params.options.download.threads)?;
        let status = ConsoleStatus::new();
        let context = SyncContext {
            fetcher: &fetcher,
            prompt: &StdinPrompt,
            status: &status,
        };
        update_working_tree(&params.options, &context)
    })
    .await
    .map_err(|e| eyre::eyre!("Sync task failed: {}", e))?
}
