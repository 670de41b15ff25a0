//! Scenario tests for the download manager.
//!
//! The remote reader and local cache are scripted doubles that record what
//! the manager asks of them; tests answer requests by hand, in any order.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use proptest::prelude::*;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::*;
use crate::cache::{
    CacheCompletion, CacheKey, CacheLoadResult, CacheLookup, CacheTaskId, CachedObject,
    LocalCache, StorageKind,
};
use crate::config::EngineConfig;
use crate::error::{DownloadError, EngineError, RemoteErrorKind};
use crate::locator::{Locator, MediaKind, TierId, KEYED_CHUNK_SIZE, LEGACY_CHUNK_SIZE};
use crate::remote::{ReadRequest, RemoteReader, RequestId};

const CS: u64 = KEYED_CHUNK_SIZE as u64;
const LCS: u64 = LEGACY_CHUNK_SIZE as u64;
const KEYED_TIER: TierId = TierId(1);

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Default)]
struct ReaderLog {
    next: u64,
    issued: Vec<(RequestId, ReadRequest)>,
    cancelled: Vec<RequestId>,
}

struct FakeReader(Arc<Mutex<ReaderLog>>);

impl RemoteReader for FakeReader {
    fn issue(&mut self, request: ReadRequest) -> RequestId {
        let mut log = self.0.lock();
        log.next += 1;
        let id = RequestId(log.next);
        log.issued.push((id, request));
        id
    }

    fn cancel(&mut self, request: RequestId) {
        self.0.lock().cancelled.push(request);
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CachedObject>,
    in_progress: HashMap<CacheKey, CacheTaskId>,
    cooperative: HashMap<CacheKey, CacheTaskId>,
    stored: Vec<(CacheKey, Vec<u8>, StorageKind)>,
    cancelled: Vec<CacheTaskId>,
}

struct ScriptedCache(Arc<Mutex<CacheState>>);

impl LocalCache for ScriptedCache {
    fn lookup(&mut self, key: &CacheKey) -> CacheLookup {
        let state = self.0.lock();
        if let Some(object) = state.entries.get(key) {
            return CacheLookup::Found(object.clone());
        }
        match state.in_progress.get(key) {
            Some(task) => CacheLookup::InProgress(*task),
            None => CacheLookup::NotFound,
        }
    }

    fn store(&mut self, key: &CacheKey, bytes: &[u8], kind: StorageKind) {
        self.0
            .lock()
            .stored
            .push((key.clone(), bytes.to_vec(), kind));
    }

    fn start_cooperative_load(&mut self, key: &CacheKey) -> Option<CacheTaskId> {
        self.0.lock().cooperative.get(key).copied()
    }

    fn cancel_cooperative_load(&mut self, task: CacheTaskId) {
        self.0.lock().cancelled.push(task);
    }
}

struct Harness {
    manager: DownloadManager,
    reader: Arc<Mutex<ReaderLog>>,
    cache: Arc<Mutex<CacheState>>,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    answered: HashSet<RequestId>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let reader = Arc::new(Mutex::new(ReaderLog::default()));
        let cache = Arc::new(Mutex::new(CacheState::default()));
        let mut manager = DownloadManager::new(
            config,
            Box::new(FakeReader(Arc::clone(&reader))),
            Box::new(ScriptedCache(Arc::clone(&cache))),
        );
        let events = manager.subscribe();
        Self {
            manager,
            reader,
            cache,
            events,
            answered: HashSet::new(),
        }
    }

    fn issued(&self) -> Vec<(RequestId, ReadRequest)> {
        self.reader.lock().issued.clone()
    }

    fn issued_count(&self) -> usize {
        self.reader.lock().issued.len()
    }

    fn cancelled(&self) -> Vec<RequestId> {
        self.reader.lock().cancelled.clone()
    }

    /// Issued requests not yet answered or cancelled, oldest first.
    fn outstanding(&self) -> Vec<(RequestId, ReadRequest)> {
        let log = self.reader.lock();
        log.issued
            .iter()
            .filter(|(id, _)| !self.answered.contains(id) && !log.cancelled.contains(id))
            .cloned()
            .collect()
    }

    fn request(&self, id: RequestId) -> ReadRequest {
        self.issued()
            .into_iter()
            .find(|(r, _)| *r == id)
            .map(|(_, req)| req)
            .unwrap()
    }

    /// Answer a request with its window of `body`.
    fn serve(&mut self, id: RequestId, body: &[u8]) {
        let req = self.request(id);
        let start = (req.offset as usize).min(body.len());
        let end = (start + req.length as usize).min(body.len());
        self.answered.insert(id);
        self.manager
            .on_chunk(id, req.offset, Bytes::copy_from_slice(&body[start..end]));
    }

    fn fail_request(&mut self, id: RequestId, error: RemoteErrorKind) {
        self.answered.insert(id);
        self.manager.on_read_error(id, error);
    }

    /// Serve outstanding requests oldest first until none remain.
    fn serve_all(&mut self, body: &[u8]) {
        while let Some((id, _)) = self.outstanding().first().cloned() {
            self.serve(id, body);
        }
    }

    fn events(&mut self) -> Vec<DownloadEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn status(&self, job: JobId) -> JobStatus {
        self.manager.status(job).unwrap()
    }
}

fn data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn keyed(id: u64) -> Locator {
    Locator::keyed(KEYED_TIER, MediaKind::Video, id, 0)
}

fn legacy(local_id: i32) -> Locator {
    Locator::legacy(TierId(2), 7, local_id, 99)
}

fn completion(events: &[DownloadEvent], job: JobId) -> Option<CompletedDownload> {
    events.iter().find_map(|e| match e {
        DownloadEvent::Complete { job: j, output } if *j == job => Some(output.clone()),
        _ => None,
    })
}

fn failure(events: &[DownloadEvent], job: JobId) -> Option<(bool, DownloadError)> {
    events.iter().find_map(|e| match e {
        DownloadEvent::Failed {
            job: j,
            had_partial_data,
            error,
        } if *j == job => Some((*had_partial_data, error.clone())),
        _ => None,
    })
}

fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 32]);
    bytes
}

// =============================================================================
// Network path
// =============================================================================

#[test]
fn test_known_size_download_completes_in_memory() {
    let mut h = Harness::new();
    let body = data(300 * 1024);
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(body.len() as u64));

    h.manager.start(job, false, false).unwrap();
    assert_eq!(h.issued_count(), 3);
    assert_eq!(h.status(job), JobStatus::Active);
    assert_eq!(h.manager.queue_order(KEYED_TIER), vec![job]);

    h.serve_all(&body);

    assert_eq!(h.status(job), JobStatus::Complete);
    let events = h.events();
    let output = completion(&events, job).unwrap();
    assert_eq!(output.bytes.unwrap().as_ref(), body.as_slice());
    assert_eq!(output.size, body.len() as u64);
    assert!(!output.from_cache);
    assert!(output.path.is_none());

    let stored = h.cache.lock().stored.clone();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0, keyed(1).cache_key());
    assert_eq!(stored[0].1, body);
    assert_eq!(stored[0].2, StorageKind::Video);

    assert_eq!(h.manager.in_flight_count(KEYED_TIER), 0);
    assert!(h.manager.queue_order(KEYED_TIER).is_empty());
}

#[test]
fn test_out_of_order_chunks_written_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("video.bin");
    let mut h = Harness::new();
    let body = data(3 * CS as usize);
    let job = h.manager.create(
        JobRequest::new(keyed(1))
            .with_destination(&path)
            .with_expected_size(body.len() as u64),
    );
    h.manager.start(job, false, false).unwrap();

    let pending = h.outstanding();
    assert_eq!(pending.len(), 3);
    // Third chunk first, then second, then first
    h.serve(pending[2].0, &body);
    h.serve(pending[1].0, &body);
    assert_eq!(h.status(job), JobStatus::Active);
    h.serve(pending[0].0, &body);

    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(fs::read(&path).unwrap(), body);

    let output = completion(&h.events(), job).unwrap();
    assert_eq!(output.path, Some(path));
    assert!(output.bytes.is_none());
    // File-only downloads stay out of the cache
    assert!(h.cache.lock().stored.is_empty());
}

#[test]
fn test_destination_with_cache_copy_writes_both() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.bin");
    let mut h = Harness::new();
    let body = data(5000);
    let job = h.manager.create(
        JobRequest::new(keyed(4))
            .with_destination(&path)
            .with_cache_copy(true),
    );
    h.manager.start(job, false, false).unwrap();
    h.serve_all(&body);

    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(fs::read(&path).unwrap(), body);
    assert_eq!(h.cache.lock().stored.len(), 1);
}

#[test]
fn test_progress_reports_received_bytes() {
    let mut h = Harness::new();
    let body = data(2 * CS as usize);
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(body.len() as u64));
    h.manager.start(job, false, false).unwrap();

    let pending = h.outstanding();
    h.serve(pending[1].0, &body);

    let snapshot = h.manager.snapshot(job).unwrap();
    assert_eq!(snapshot.expected_size, Some(2 * CS));
    assert_eq!(snapshot.total_size, Some(2 * CS));
    assert_eq!(snapshot.bytes_received, CS);
    assert_eq!(snapshot.contiguous_bytes, 0);
    assert_eq!(snapshot.in_flight, 1);
    assert_eq!(snapshot.progress, 0.5);
    assert!(snapshot.queued);

    h.serve(pending[0].0, &body);
    let progress: Vec<u64> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress { bytes_so_far, .. } => Some(*bytes_so_far),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![CS, 2 * CS]);
}

#[test]
fn test_session_slots_balance_requests() {
    let mut h = Harness::with_config(EngineConfig::default().with_session_slots(2));
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(3 * CS));
    h.manager.start(job, false, false).unwrap();

    let slots: Vec<usize> = h.issued().iter().map(|(_, r)| r.slot).collect();
    assert_eq!(slots, vec![0, 1, 0]);
    assert_eq!(h.manager.session_loads(KEYED_TIER), vec![2 * CS, CS]);

    let first = h.outstanding()[0].0;
    h.serve(first, &data(3 * CS as usize));
    assert_eq!(h.manager.session_loads(KEYED_TIER), vec![CS, CS]);
}

// =============================================================================
// Terminal chunk detection
// =============================================================================

#[test]
fn test_short_chunk_completes_unknown_size() {
    let mut h = Harness::new();
    let body = data(LCS as usize + 5000);
    let job = h.manager.create(JobRequest::new(legacy(1)));
    h.manager.start(job, false, false).unwrap();

    // Unknown size: one request at a time
    assert_eq!(h.outstanding().len(), 1);
    h.serve_all(&body);

    assert_eq!(h.status(job), JobStatus::Complete);
    let offsets: Vec<u64> = h.issued().iter().map(|(_, r)| r.offset).collect();
    assert_eq!(offsets, vec![0, LCS]);

    let output = completion(&h.events(), job).unwrap();
    assert_eq!(output.size, body.len() as u64);
    assert_eq!(output.bytes.unwrap().as_ref(), body.as_slice());
}

#[test]
fn test_empty_terminal_chunk_completes_aligned_object() {
    let mut h = Harness::new();
    let body = data(2 * LCS as usize);
    let job = h.manager.create(JobRequest::new(legacy(2)));
    h.manager.start(job, false, false).unwrap();
    h.serve_all(&body);

    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(h.issued_count(), 3);
    assert_eq!(completion(&h.events(), job).unwrap().size, 2 * LCS);
}

#[test]
fn test_misaligned_chunk_is_terminal() {
    let mut h = Harness::new();
    let job = h.manager.create(JobRequest::new(legacy(3)));
    h.manager.start(job, false, false).unwrap();

    let (id, req) = h.outstanding()[0].clone();
    h.answered.insert(id);
    h.manager
        .on_chunk(id, req.offset, Bytes::from(vec![1u8; LCS as usize - 1]));

    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(h.issued_count(), 1);
}

#[test]
fn test_declared_size_disagreeing_with_terminal_chunk_fails() {
    let mut h = Harness::new();
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(2 * CS));
    h.manager.start(job, false, false).unwrap();
    let pending = h.outstanding();

    h.serve(pending[1].0, &data(2 * CS as usize));
    h.answered.insert(pending[0].0);
    h.manager
        .on_chunk(pending[0].0, 0, Bytes::from(vec![0u8; 1000]));

    assert_eq!(h.status(job), JobStatus::Failed);
    let (had_partial, error) = failure(&h.events(), job).unwrap();
    assert!(had_partial);
    assert!(matches!(error, DownloadError::SizeMismatch { .. }));
}

#[test]
fn test_chunk_past_declared_size_is_protocol_mismatch() {
    let mut h = Harness::new();
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(1000));
    h.manager.start(job, false, false).unwrap();

    let id = h.outstanding()[0].0;
    h.answered.insert(id);
    h.manager.on_chunk(id, 0, Bytes::from(vec![0u8; 2048]));

    assert_eq!(h.status(job), JobStatus::Failed);
    let (_, error) = failure(&h.events(), job).unwrap();
    assert!(matches!(
        error,
        DownloadError::Remote(RemoteErrorKind::ProtocolMismatch(_))
    ));
}

#[test]
fn test_wrong_offset_is_protocol_mismatch() {
    let mut h = Harness::new();
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();

    let id = h.outstanding()[0].0;
    h.answered.insert(id);
    h.manager.on_chunk(id, CS, Bytes::from(vec![0u8; 10]));

    assert_eq!(h.status(job), JobStatus::Failed);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_fatal_error_fails_and_removes_partial_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.bin");
    let mut h = Harness::new();
    let body = data(3 * CS as usize);
    let job = h.manager.create(
        JobRequest::new(keyed(1))
            .with_destination(&path)
            .with_expected_size(body.len() as u64),
    );
    h.manager.start(job, false, false).unwrap();

    let pending = h.outstanding();
    h.serve(pending[0].0, &body);
    assert!(path.exists());
    h.fail_request(pending[1].0, RemoteErrorKind::RemoteObjectUnavailable);

    assert_eq!(h.status(job), JobStatus::Failed);
    assert!(!path.exists());
    assert_eq!(h.cancelled(), vec![pending[2].0]);
    assert_eq!(h.manager.in_flight_count(KEYED_TIER), 0);
    assert_eq!(h.manager.session_loads(KEYED_TIER), vec![0, 0]);

    let (had_partial, error) = failure(&h.events(), job).unwrap();
    assert!(had_partial);
    assert!(matches!(
        error,
        DownloadError::Remote(RemoteErrorKind::RemoteObjectUnavailable)
    ));
}

#[test]
fn test_failure_without_data_reports_no_partial() {
    let mut h = Harness::new();
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();

    let id = h.outstanding()[0].0;
    h.fail_request(id, RemoteErrorKind::Other("boom".into()));

    let (had_partial, _) = failure(&h.events(), job).unwrap();
    assert!(!had_partial);
}

#[test]
fn test_unopenable_destination_fails_with_local_io() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::new();
    // A directory path cannot be created as a file
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_destination(dir.path()));
    h.manager.start(job, false, false).unwrap();

    assert_eq!(h.status(job), JobStatus::Failed);
    assert_eq!(h.issued_count(), 0);
    let (_, error) = failure(&h.events(), job).unwrap();
    assert!(matches!(error, DownloadError::LocalIo { .. }));
}

#[test]
fn test_rate_limited_chunk_is_requested_again() {
    let mut h = Harness::new();
    let body = data(3 * CS as usize);
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(body.len() as u64));
    h.manager.start(job, false, false).unwrap();

    let pending = h.outstanding();
    h.fail_request(pending[1].0, RemoteErrorKind::TransientRateLimited);

    assert_eq!(h.status(job), JobStatus::Active);
    let retried = h.issued().last().cloned().unwrap();
    assert_eq!(retried.1.offset, CS);

    h.serve_all(&body);

    assert_eq!(h.status(job), JobStatus::Complete);
    let events = h.events();
    assert!(failure(&events, job).is_none());
    assert_eq!(
        completion(&events, job).unwrap().bytes.unwrap().as_ref(),
        body.as_slice()
    );
}

#[test]
fn test_rate_limited_chunk_waits_for_start_without_requeue() {
    let mut h =
        Harness::with_config(EngineConfig::default().with_requeue_rate_limited(false));
    let body = data(3 * CS as usize);
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(body.len() as u64));
    h.manager.start(job, false, false).unwrap();

    let pending = h.outstanding();
    h.fail_request(pending[1].0, RemoteErrorKind::TransientRateLimited);
    h.serve_all(&body);

    // Stalled with a gap: never reported complete
    assert_eq!(h.status(job), JobStatus::Active);
    assert!(h.events().iter().all(|e| !e.is_terminal()));
    assert_eq!(h.issued_count(), 3);

    h.manager.start(job, false, false).unwrap();
    let retried = h.outstanding();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].1.offset, CS);

    h.serve_all(&body);
    assert_eq!(h.status(job), JobStatus::Complete);
}

#[test]
fn test_failed_job_restarts_from_scratch() {
    let mut h = Harness::new();
    let body = data(1000);
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();
    let id = h.outstanding()[0].0;
    h.fail_request(id, RemoteErrorKind::Other("reset".into()));
    assert_eq!(h.status(job), JobStatus::Failed);

    h.manager.start(job, false, false).unwrap();
    let retry = h.outstanding();
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].1.offset, 0);

    h.serve_all(&body);
    assert_eq!(h.status(job), JobStatus::Complete);
}

// =============================================================================
// Cache integration
// =============================================================================

#[test]
fn test_cache_hit_short_circuits_network() {
    let mut h = Harness::new();
    h.cache.lock().entries.insert(
        keyed(1).cache_key(),
        CachedObject::new(b"cached".to_vec(), Some(StorageKind::Video)),
    );
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();

    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(h.issued_count(), 0);
    let output = completion(&h.events(), job).unwrap();
    assert!(output.from_cache);
    assert_eq!(output.bytes.unwrap().as_ref(), b"cached");
    assert!(h.cache.lock().stored.is_empty());
}

#[test]
fn test_cache_hit_is_written_to_destination() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out").join("cached.bin");
    let mut h = Harness::new();
    h.cache.lock().entries.insert(
        keyed(1).cache_key(),
        CachedObject::new(b"cached".to_vec(), None),
    );
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_destination(&path));
    h.manager.start(job, false, false).unwrap();

    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(fs::read(&path).unwrap(), b"cached");
}

#[test]
fn test_unrenderable_legacy_cache_entry_falls_through() {
    let mut h = Harness::new();
    h.cache.lock().entries.insert(
        legacy(5).cache_key(),
        CachedObject::new(b"not an image".to_vec(), Some(StorageKind::Image)),
    );
    let job = h.manager.create(JobRequest::new(legacy(5)));
    h.manager.start(job, false, false).unwrap();

    assert_eq!(h.status(job), JobStatus::Active);
    assert_eq!(h.issued_count(), 1);
}

#[test]
fn test_renderable_legacy_cache_entry_is_used() {
    let mut h = Harness::new();
    h.cache.lock().entries.insert(
        legacy(6).cache_key(),
        CachedObject::new(png_bytes(), Some(StorageKind::Image)),
    );
    let job = h.manager.create(JobRequest::new(legacy(6)));
    h.manager.start(job, false, false).unwrap();

    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(h.issued_count(), 0);
}

#[test]
fn test_empty_cache_entry_is_a_miss() {
    let mut h = Harness::new();
    h.cache
        .lock()
        .entries
        .insert(keyed(1).cache_key(), CachedObject::new(Vec::new(), None));
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();

    assert_eq!(h.issued_count(), 1);
}

#[test]
fn test_cooperative_load_hit() {
    let mut h = Harness::new();
    h.cache
        .lock()
        .cooperative
        .insert(keyed(1).cache_key(), CacheTaskId(7));
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, true, false).unwrap();

    assert_eq!(h.status(job), JobStatus::CacheLookupPending);
    assert_eq!(h.issued_count(), 0);

    h.manager.on_cache_completion(CacheCompletion {
        task: CacheTaskId(7),
        result: CacheLoadResult::Found(CachedObject::new(b"disk".to_vec(), None)),
    });

    assert_eq!(h.status(job), JobStatus::Complete);
    assert!(completion(&h.events(), job).unwrap().from_cache);
}

#[test]
fn test_in_progress_miss_enqueues_all_waiters() {
    let mut h = Harness::new();
    h.cache
        .lock()
        .in_progress
        .insert(keyed(1).cache_key(), CacheTaskId(9));
    let a = h.manager.create(JobRequest::new(keyed(1)));
    let b = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(a, false, false).unwrap();
    h.manager.start(b, false, false).unwrap();

    h.manager.on_cache_completion(CacheCompletion {
        task: CacheTaskId(9),
        result: CacheLoadResult::NotFound,
    });

    assert_eq!(h.status(a), JobStatus::Active);
    assert_eq!(h.status(b), JobStatus::Active);
    assert_eq!(h.issued_count(), 2);

    // A repeated completion finds no waiters
    h.manager.on_cache_completion(CacheCompletion {
        task: CacheTaskId(9),
        result: CacheLoadResult::NotFound,
    });
    assert_eq!(h.issued_count(), 2);
}

#[test]
fn test_cancel_abandons_cooperative_load() {
    let mut h = Harness::new();
    h.cache
        .lock()
        .cooperative
        .insert(keyed(1).cache_key(), CacheTaskId(3));
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();

    h.manager.cancel(job).unwrap();

    assert_eq!(h.status(job), JobStatus::Cancelled);
    assert_eq!(h.cache.lock().cancelled, vec![CacheTaskId(3)]);

    // Late result is ignored
    h.manager.on_cache_completion(CacheCompletion {
        task: CacheTaskId(3),
        result: CacheLoadResult::NotFound,
    });
    assert_eq!(h.status(job), JobStatus::Cancelled);
    assert_eq!(h.issued_count(), 0);
}

#[test]
fn test_pause_during_cache_lookup_stays_idle_on_miss() {
    let mut h = Harness::new();
    h.cache
        .lock()
        .cooperative
        .insert(keyed(1).cache_key(), CacheTaskId(4));
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();
    h.manager.pause(job).unwrap();

    h.manager.on_cache_completion(CacheCompletion {
        task: CacheTaskId(4),
        result: CacheLoadResult::NotFound,
    });
    assert_eq!(h.status(job), JobStatus::Idle);
    assert_eq!(h.issued_count(), 0);

    h.manager.start(job, false, false).unwrap();
    assert_eq!(h.status(job), JobStatus::Active);
    assert_eq!(h.issued_count(), 1);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_cancel_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cancel.bin");
    let mut h = Harness::new();
    let body = data(2 * CS as usize);
    let job = h.manager.create(
        JobRequest::new(keyed(1))
            .with_destination(&path)
            .with_expected_size(body.len() as u64),
    );
    h.manager.start(job, false, false).unwrap();
    let pending = h.outstanding();
    h.serve(pending[0].0, &body);

    h.manager.cancel(job).unwrap();
    assert_eq!(h.status(job), JobStatus::Cancelled);
    assert!(!path.exists());
    assert_eq!(h.cancelled(), vec![pending[1].0]);
    assert_eq!(h.manager.in_flight_count(KEYED_TIER), 0);
    assert_eq!(h.manager.session_loads(KEYED_TIER), vec![0, 0]);

    h.manager.cancel(job).unwrap();
    assert_eq!(h.cancelled().len(), 1);
    assert_eq!(h.manager.in_flight_count(KEYED_TIER), 0);

    // Late response for the cancelled request is discarded
    h.serve(pending[1].0, &body);
    assert_eq!(h.status(job), JobStatus::Cancelled);
    assert!(!path.exists());

    // Cancel never notifies
    assert!(h.events().iter().all(|e| !e.is_terminal()));
}

#[test]
fn test_cancel_after_complete_is_noop() {
    let mut h = Harness::new();
    let job = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(job, false, false).unwrap();
    h.serve_all(&data(100));
    assert_eq!(h.status(job), JobStatus::Complete);

    h.manager.cancel(job).unwrap();
    assert_eq!(h.status(job), JobStatus::Complete);
    assert!(h.cancelled().is_empty());

    h.manager.start(job, false, false).unwrap();
    assert_eq!(h.issued_count(), 1);
}

#[test]
fn test_pause_stops_issuing_and_resume_continues() {
    let mut h = Harness::with_config(EngineConfig::default().with_max_concurrent_chunks(1));
    let body = data(3 * CS as usize);
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(body.len() as u64));
    h.manager.start(job, false, false).unwrap();
    assert_eq!(h.issued_count(), 1);

    h.manager.pause(job).unwrap();
    assert_eq!(h.status(job), JobStatus::Idle);
    assert!(h.manager.queue_order(KEYED_TIER).is_empty());

    // In-flight response is still written, but nothing new is requested
    let first = h.outstanding()[0].0;
    h.serve(first, &body);
    assert_eq!(h.issued_count(), 1);
    assert_eq!(h.manager.snapshot(job).unwrap().bytes_received, CS);

    h.manager.start(job, false, false).unwrap();
    assert_eq!(h.status(job), JobStatus::Active);
    assert_eq!(h.outstanding()[0].1.offset, CS);

    h.serve_all(&body);
    assert_eq!(h.status(job), JobStatus::Complete);
    assert_eq!(
        completion(&h.events(), job).unwrap().bytes.unwrap().as_ref(),
        body.as_slice()
    );
}

#[test]
fn test_release_cancels_and_forgets() {
    let mut h = Harness::new();
    let job = h
        .manager
        .create(JobRequest::new(keyed(1)).with_expected_size(2 * CS));
    h.manager.start(job, false, false).unwrap();

    h.manager.release(job).unwrap();

    assert_eq!(h.manager.job_count(), 0);
    assert_eq!(h.cancelled().len(), 2);
    assert_eq!(h.manager.in_flight_count(KEYED_TIER), 0);
    assert!(matches!(
        h.manager.status(job),
        Err(EngineError::UnknownJob(id)) if id == job
    ));
    assert!(h.manager.release(job).is_err());
}

#[test]
fn test_unknown_job_is_rejected() {
    let mut h = Harness::new();
    assert!(h.manager.start(JobId(99), false, false).is_err());
    assert!(h.manager.pause(JobId(99)).is_err());
    assert!(h.manager.cancel(JobId(99)).is_err());
    assert!(h.manager.snapshot(JobId(99)).is_err());
}

// =============================================================================
// Scheduling
// =============================================================================

#[test]
fn test_newer_epoch_and_boost_win_the_free_slot() {
    let mut h = Harness::with_config(EngineConfig::default().with_max_concurrent_chunks(1));
    let body = data(1000);

    let blocker = h.manager.create(JobRequest::new(keyed(100)));
    h.manager.start(blocker, false, false).unwrap();

    h.manager.bump_priority_epoch();
    let a = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(a, false, false).unwrap();

    h.manager.bump_priority_epoch();
    let b = h.manager.create(JobRequest::new(keyed(2)));
    h.manager.start(b, false, false).unwrap();
    let c = h.manager.create(JobRequest::new(keyed(3)));
    h.manager.start(c, false, true).unwrap();

    assert_eq!(h.manager.queue_order(KEYED_TIER), vec![c, b, a, blocker]);
    assert_eq!(h.issued_count(), 1);

    let mut served = Vec::new();
    for _ in 0..4 {
        let pending = h.outstanding();
        assert_eq!(pending.len(), 1);
        served.push(pending[0].1.locator.clone());
        h.serve(pending[0].0, &body);
    }

    assert_eq!(served, vec![keyed(100), keyed(3), keyed(2), keyed(1)]);
    for job in [a, b, c, blocker] {
        assert_eq!(h.status(job), JobStatus::Complete);
    }
}

#[test]
fn test_load_first_jumps_the_queue() {
    let mut h = Harness::with_config(EngineConfig::default().with_max_concurrent_chunks(1));
    let body = data(1000);

    let a = h.manager.create(JobRequest::new(keyed(1)));
    let b = h.manager.create(JobRequest::new(keyed(2)));
    let c = h.manager.create(JobRequest::new(keyed(3)));
    h.manager.start(a, false, false).unwrap();
    h.manager.start(b, false, false).unwrap();
    h.manager.start(c, true, false).unwrap();

    assert_eq!(h.manager.queue_order(KEYED_TIER), vec![c, a, b]);

    let first = h.outstanding()[0].0;
    h.serve(first, &body);
    assert_eq!(h.outstanding()[0].1.locator, keyed(3));
}

#[test]
fn test_tiers_are_scheduled_independently() {
    let mut h = Harness::with_config(EngineConfig::default().with_max_concurrent_chunks(1));
    let a = h.manager.create(JobRequest::new(keyed(1)));
    let b = h.manager.create(JobRequest::new(legacy(1)));
    h.manager.start(a, false, false).unwrap();
    h.manager.start(b, false, false).unwrap();

    assert_eq!(h.manager.in_flight_count(KEYED_TIER), 1);
    assert_eq!(h.manager.in_flight_count(TierId(2)), 1);
}

#[test]
fn test_duplicate_key_jobs_both_run() {
    let mut h = Harness::new();
    let a = h.manager.create(JobRequest::new(keyed(1)));
    let b = h.manager.create(JobRequest::new(keyed(1)));
    h.manager.start(a, false, false).unwrap();
    h.manager.start(b, false, false).unwrap();

    h.serve_all(&data(10));
    assert_eq!(h.status(a), JobStatus::Complete);
    assert_eq!(h.status(b), JobStatus::Complete);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_any_response_order_reassembles(
        size in 1usize..(4 * CS as usize),
        keys in prop::collection::vec(any::<u32>(), 4),
    ) {
        let mut h = Harness::new();
        let body = data(size);
        let job = h
            .manager
            .create(JobRequest::new(keyed(1)).with_expected_size(size as u64));
        h.manager.start(job, false, false).unwrap();

        let pending = h.outstanding();
        prop_assert_eq!(pending.len(), (size + CS as usize - 1) / CS as usize);

        let mut order: Vec<(u32, RequestId)> = pending
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (keys[i], *id))
            .collect();
        order.sort();
        for (_, id) in order {
            h.serve(id, &body);
        }

        prop_assert_eq!(h.status(job), JobStatus::Complete);
        let events = h.events();
        let last_progress = events.iter().rev().find_map(|e| match e {
            DownloadEvent::Progress { bytes_so_far, .. } => Some(*bytes_so_far),
            _ => None,
        });
        prop_assert_eq!(last_progress, Some(size as u64));
        let output = completion(&events, job).unwrap();
        let bytes = output.bytes.unwrap();
        prop_assert_eq!(bytes.as_ref(), body.as_slice());
    }

    #[test]
    fn prop_in_flight_never_exceeds_cap(
        cap in 1usize..5,
        jobs in 1usize..6,
        slots in 1usize..4,
    ) {
        let mut h = Harness::with_config(
            EngineConfig::default()
                .with_max_concurrent_chunks(cap)
                .with_session_slots(slots),
        );
        let body = data(3 * CS as usize);

        let mut ids = Vec::new();
        for i in 0..jobs {
            let id = h
                .manager
                .create(JobRequest::new(keyed(i as u64 + 1)).with_expected_size(3 * CS));
            h.manager.start(id, false, false).unwrap();
            prop_assert!(h.manager.in_flight_count(KEYED_TIER) <= cap);
            ids.push(id);
        }

        let mut steps = 0;
        loop {
            let pending = h.outstanding();
            prop_assert!(pending.len() <= cap);
            prop_assert_eq!(h.manager.in_flight_count(KEYED_TIER), pending.len());
            let load: u64 = h.manager.session_loads(KEYED_TIER).iter().sum();
            prop_assert_eq!(load, pending.len() as u64 * CS);
            if pending.is_empty() {
                break;
            }
            h.serve(pending[0].0, &body);
            steps += 1;
            prop_assert!(steps <= jobs * 3);
        }

        for id in ids {
            prop_assert_eq!(h.status(id), JobStatus::Complete);
        }
    }
}
