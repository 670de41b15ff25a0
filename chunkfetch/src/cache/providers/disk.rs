//! On-disk cache provider.
//!
//! Each complete object is one file. The file name is the SHA-256 of the
//! cache key, fanned out into 256 sub-directories by its first two hex digits:
//!
//! ```text
//! {directory}/3f/3fa2...c9
//! ```
//!
//! # Modes
//!
//! - **Synchronous** ([`DiskCache::new`]): `lookup` reads the file inline.
//! - **Cooperative** ([`DiskCache::with_loader`]): `lookup` only reports loads
//!   already running; `start_cooperative_load` reads the file with `tokio::fs`
//!   and reports through the completion channel. Must be used from within a
//!   tokio runtime.
//!
//! Stores are always synchronous and atomic (temp file + rename).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::traits::{
    CacheCompletion, CacheCompletionSender, CacheKey, CacheLoadResult, CacheLookup, CacheTaskId,
    CachedObject, LocalCache, StorageKind,
};

/// Loads currently running, keyed by cache key.
type LoadingMap = Arc<Mutex<HashMap<CacheKey, CacheTaskId>>>;

struct CooperativeLoader {
    completions: CacheCompletionSender,
    next_task: u64,
    loading: LoadingMap,
    handles: HashMap<CacheTaskId, (CacheKey, JoinHandle<()>)>,
}

/// File-per-object disk cache.
pub struct DiskCache {
    directory: PathBuf,
    loader: Option<CooperativeLoader>,
}

impl DiskCache {
    /// Create a synchronous disk cache rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            loader: None,
        }
    }

    /// Create a disk cache that loads asynchronously and reports on `completions`.
    pub fn with_loader(directory: impl Into<PathBuf>, completions: CacheCompletionSender) -> Self {
        Self {
            directory: directory.into(),
            loader: Some(CooperativeLoader {
                completions,
                next_task: 1,
                loading: Arc::new(Mutex::new(HashMap::new())),
                handles: HashMap::new(),
            }),
        }
    }

    /// Root directory of the cache.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File that holds (or would hold) the object for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(key.as_str().as_bytes()));
        self.directory.join(&digest[..2]).join(digest)
    }

    fn read_sync(&self, key: &CacheKey) -> CacheLookup {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => CacheLookup::Found(CachedObject::new(bytes, None)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => CacheLookup::NotFound,
            Err(e) => {
                warn!(key = %key, path = %path.display(), error = %e, "Disk cache read failed");
                CacheLookup::NotFound
            }
        }
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    }
}

impl LocalCache for DiskCache {
    fn lookup(&mut self, key: &CacheKey) -> CacheLookup {
        match &self.loader {
            None => self.read_sync(key),
            Some(loader) => match loader.loading.lock().get(key) {
                Some(task) => CacheLookup::InProgress(*task),
                None => CacheLookup::NotFound,
            },
        }
    }

    fn store(&mut self, key: &CacheKey, bytes: &[u8], kind: StorageKind) {
        let path = self.path_for(key);
        match Self::write_atomic(&path, bytes) {
            Ok(()) => debug!(
                key = %key,
                size = bytes.len(),
                kind = kind.as_str(),
                "Disk cache store"
            ),
            Err(e) => warn!(key = %key, path = %path.display(), error = %e, "Disk cache store failed"),
        }
    }

    fn start_cooperative_load(&mut self, key: &CacheKey) -> Option<CacheTaskId> {
        let path = self.path_for(key);
        let loader = self.loader.as_mut()?;
        if !path.is_file() {
            return None;
        }

        loader.handles.retain(|_, (_, handle)| !handle.is_finished());

        let task = CacheTaskId(loader.next_task);
        loader.next_task += 1;
        loader.loading.lock().insert(key.clone(), task);

        let loading = Arc::clone(&loader.loading);
        let completions = loader.completions.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = match tokio::fs::read(&path).await {
                Ok(bytes) => CacheLoadResult::Found(CachedObject::new(bytes, None)),
                Err(e) => {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(key = %task_key, error = %e, "Disk cache load failed");
                    }
                    CacheLoadResult::NotFound
                }
            };
            loading.lock().remove(&task_key);
            // Receiver gone means the engine shut down.
            let _ = completions.send(CacheCompletion { task, result });
        });
        loader.handles.insert(task, (key.clone(), handle));

        debug!(key = %key, task = %task, "Disk cache load started");
        Some(task)
    }

    fn cancel_cooperative_load(&mut self, task: CacheTaskId) {
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        if let Some((key, handle)) = loader.handles.remove(&task) {
            handle.abort();
            let mut loading = loader.loading.lock();
            if loading.get(&key) == Some(&task) {
                loading.remove(&key);
            }
        }
    }
}
