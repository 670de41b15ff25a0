//! Core traits for the local object cache.
//!
//! The download engine consults the cache before touching the network and
//! hands every freshly materialized object back to it. The cache is a
//! black-box key-value store keyed by [`CacheKey`]; it never sees partial
//! objects.
//!
//! # Lookup Outcomes
//!
//! - `Found`: the complete object is available right now
//! - `NotFound`: nothing cached (or nothing the cache can answer synchronously)
//! - `InProgress`: a load for this key is already running; the result arrives
//!   later as a [`CacheCompletion`] carrying the same [`CacheTaskId`]
//!
//! Caches backed by slow storage may additionally start a *cooperative load*
//! after a synchronous miss. The engine waits for that task exactly as it
//! waits for an `InProgress` answer.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Key of a complete object in the local cache.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a derived key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage class of a cached object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Image,
    Video,
    Audio,
    Document,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Image => "image",
            StorageKind::Video => "video",
            StorageKind::Audio => "audio",
            StorageKind::Document => "document",
        }
    }
}

/// A complete object held by the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedObject {
    /// The object bytes.
    pub bytes: Bytes,
    /// Storage class recorded at store time, if the backend keeps it.
    pub kind: Option<StorageKind>,
}

impl CachedObject {
    pub fn new(bytes: impl Into<Bytes>, kind: Option<StorageKind>) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
        }
    }
}

/// Handle of an asynchronous (cooperative) cache load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheTaskId(pub u64);

impl fmt::Display for CacheTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache-task#{}", self.0)
    }
}

/// Synchronous answer to a cache lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLookup {
    Found(CachedObject),
    NotFound,
    InProgress(CacheTaskId),
}

/// Final outcome of a cooperative load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLoadResult {
    Found(CachedObject),
    NotFound,
}

/// Delivered when a cooperative load finishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheCompletion {
    pub task: CacheTaskId,
    pub result: CacheLoadResult,
}

/// Channel on which cooperative loads report their completion.
pub type CacheCompletionSender = mpsc::UnboundedSender<CacheCompletion>;

/// Local cache interface consumed by the download engine.
///
/// All methods are called from the engine's single event-loop context, so
/// implementations only need to be `Send` (the loop may live on a tokio
/// worker), not `Sync`.
pub trait LocalCache: Send {
    /// Look up a complete object.
    fn lookup(&mut self, key: &CacheKey) -> CacheLookup;

    /// Persist a complete object. Fire-and-forget: failures are logged by the
    /// implementation, never reported back.
    fn store(&mut self, key: &CacheKey, bytes: &[u8], kind: StorageKind);

    /// Start an asynchronous load after a synchronous miss.
    ///
    /// Returns `None` when the backend has nothing to load (or loads
    /// synchronously only), in which case the miss stands.
    fn start_cooperative_load(&mut self, _key: &CacheKey) -> Option<CacheTaskId> {
        None
    }

    /// Abandon interest in a cooperative load. Best effort.
    fn cancel_cooperative_load(&mut self, _task: CacheTaskId) {}
}
