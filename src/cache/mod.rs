//! Offline read cache.
//!
//! This module keeps the last successful read of each read model:
//! - Snapshots are compressed and stored under `namespace[:id]` keys
//! - One current snapshot per key, overwritten on every successful read
//! - Served when the live read fails (offline mode)
//! - Corrupt snapshots degrade to a miss instead of an error

mod layer;
mod traits;

pub use layer::{OfflineCache, CACHE_NAMESPACE};
pub use traits::{CacheEntry, CacheKey, CacheResult, CacheSource};
