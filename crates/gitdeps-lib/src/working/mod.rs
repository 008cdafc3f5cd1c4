mod reconcile;
mod state;

pub use reconcile::{
    DryRunReport, Reconciliation, RemovalPlan, clean_interrupted_downloads, plan_removals,
    reconcile,
};
pub use state::{
    TEMP_MANIFEST_EXTENSION, WORKING_MANIFEST_NAME, WorkingFile, WorkingManifest,
    WorkingStateStore,
};
