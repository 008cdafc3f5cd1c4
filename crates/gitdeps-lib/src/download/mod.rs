pub mod fetch;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod types;

pub use fetch::{HttpPackFetcher, PackFetcher};
pub use progress::{DownloadProgress, ProgressSnapshot, StatusFormatter, format_megabytes};
pub use queue::{PackQueue, QueueStatus, WorkerState};
pub use scheduler::{DownloadSummary, build_incoming_packs, download_dependencies};
pub use status::{ConsoleStatus, NoStatus, StatusSink};
pub use types::{DownloadOptions, IncomingPack};
