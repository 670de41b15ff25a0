//! Local object cache.
//!
//! The engine treats the cache as a black-box store of complete objects. See
//! [`LocalCache`] for the interface and [`providers`] for the implementations.

pub mod providers;
mod traits;

pub use providers::{DiskCache, MemoryCache};
pub use traits::{
    CacheCompletion, CacheCompletionSender, CacheKey, CacheLoadResult, CacheLookup, CacheTaskId,
    CachedObject, LocalCache, StorageKind,
};
