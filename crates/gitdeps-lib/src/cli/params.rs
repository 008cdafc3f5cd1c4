use crate::sync::SyncOptions;
use url::Url;

#[derive(Debug, Clone)]
pub struct SyncParams {
    pub options: SyncOptions,
    pub proxy: Option<Url>,
}
