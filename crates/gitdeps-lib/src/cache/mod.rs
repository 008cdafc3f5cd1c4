pub mod eviction;
pub mod store;

pub use eviction::{EvictionPolicy, EvictionReport, purge_cache_files, touch_cache_files};
pub use store::CacheStore;
