//! In-memory cache provider using moka.
//!
//! Wraps `moka::sync::Cache` with byte-weighted LRU eviction. Lookups are
//! always synchronous, so this provider never starts cooperative loads.

use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache as MokaCache;
use tracing::debug;

use crate::cache::traits::{CacheKey, CacheLookup, CachedObject, LocalCache, StorageKind};

/// In-memory object cache.
pub struct MemoryCache {
    /// The underlying moka cache.
    cache: MokaCache<CacheKey, CachedObject>,

    /// Maximum size in bytes.
    max_size_bytes: u64,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a new memory cache.
    ///
    /// # Arguments
    ///
    /// * `max_size_bytes` - Maximum total size of cached objects in bytes
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            // Weight each entry by its data size
            .weigher(|_key: &CacheKey, value: &CachedObject| -> u32 {
                // moka uses u32 for weights, cap at u32::MAX for very large entries
                value.bytes.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            cache,
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Maximum configured size in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Current weighted size in bytes (eventually consistent).
    pub fn size_bytes(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    /// Current number of entries (eventually consistent).
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that missed.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl LocalCache for MemoryCache {
    fn lookup(&mut self, key: &CacheKey) -> CacheLookup {
        match self.cache.get(key) {
            Some(object) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Found(object)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::NotFound
            }
        }
    }

    fn store(&mut self, key: &CacheKey, bytes: &[u8], kind: StorageKind) {
        debug!(key = %key, size = bytes.len(), kind = kind.as_str(), "Memory cache store");
        self.cache.insert(
            key.clone(),
            CachedObject::new(bytes.to_vec(), Some(kind)),
        );
    }
}
