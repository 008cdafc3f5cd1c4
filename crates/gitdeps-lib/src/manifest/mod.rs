mod aggregator;
mod parser;
mod types;

pub use aggregator::{
    MANIFEST_SUFFIX, PLUGIN_DESCRIPTOR_EXTENSION, TargetState, blob_end, collect_target_state,
};
pub use parser::{parse_manifest, parse_manifest_str};
pub use types::{DependencyBlob, DependencyFile, DependencyManifest, DependencyPack, TargetPack};
