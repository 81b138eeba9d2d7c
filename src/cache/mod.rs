// Gateway module for cache - follows the Train Station Pattern
// All external access must go through this gateway

mod file_cache;
mod store;
mod types;

pub use file_cache::FileCache;
pub use store::CacheStore;
pub use types::{cache_key, CacheEntry, CachePayload, CacheStats, CleanupReport, SetOutcome};
