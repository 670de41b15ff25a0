//! Per-object download state.
//!
//! A [`DownloadJob`] holds everything the manager needs to drive one object
//! from cache lookup to completion: the sink, byte accounting, the requests
//! in flight and the offsets still owed.
//!
//! # Offset bookkeeping
//!
//! - `next_offset` advances by one chunk per fresh request
//! - `retry_offsets` are chunks that must be requested again before any
//!   fresh offset (rate-limited chunks, when re-requests are enabled)
//! - `dropped` are rate-limited chunks parked until the next `start()`
//! - `received` maps each written chunk offset to its length
//!
//! A job can only complete when nothing is in flight, retried or dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use super::sink::Sink;
use super::JobId;
use crate::cache::{CacheKey, CacheTaskId};
use crate::locator::Locator;
use crate::remote::RequestId;

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Created or paused. Not in any queue.
    Idle,
    /// Waiting for the local cache to answer.
    CacheLookupPending,
    /// In its tier's queue, nothing requested yet.
    Queued,
    /// Has issued at least one chunk request.
    Active,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// No further requests or notifications.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::CacheLookupPending => "cache-lookup",
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a new job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRequest {
    pub locator: Locator,

    /// Write the object to this file.
    pub destination: Option<PathBuf>,

    /// Also keep a copy in the local cache.
    pub also_cache: bool,

    /// Size announced by the caller, when known.
    pub expected_size: Option<u64>,
}

impl JobRequest {
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            destination: None,
            also_cache: false,
            expected_size: None,
        }
    }

    pub fn with_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    pub fn with_cache_copy(mut self, also_cache: bool) -> Self {
        self.also_cache = also_cache;
        self
    }

    /// Announce the object size. Zero means unknown.
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = (size > 0).then_some(size);
        self
    }
}

/// Admission arguments remembered across a cache lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AdmissionArgs {
    pub load_first: bool,
    pub boosted: bool,
}

/// One outstanding chunk request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct InFlightChunk {
    pub offset: u64,
    pub length: u32,
    pub slot: usize,
}

/// State of one object download.
#[derive(Debug)]
pub(crate) struct DownloadJob {
    pub id: JobId,
    pub locator: Locator,
    pub cache_key: CacheKey,
    pub destination: Option<PathBuf>,
    pub also_cache: bool,

    pub status: JobStatus,
    /// Size announced at creation.
    pub expected_size: Option<u64>,
    pub total_size: Option<u64>,
    pub next_offset: u64,
    pub sink: Option<Sink>,

    pub in_flight: HashMap<RequestId, InFlightChunk>,
    pub retry_offsets: BTreeSet<u64>,
    pub dropped: BTreeSet<u64>,
    pub received: BTreeMap<u64, u64>,
    pub received_bytes: u64,

    pub last_chunk_seen: bool,
    /// End offset reported by the terminal (short) chunk.
    pub terminal_end: Option<u64>,

    pub cache_checked: bool,
    pub cache_task: Option<CacheTaskId>,
    pub pending_admission: Option<AdmissionArgs>,
    pub from_cache: bool,
}

impl DownloadJob {
    pub fn new(id: JobId, request: JobRequest) -> Self {
        let cache_key = request.locator.cache_key();
        Self {
            id,
            locator: request.locator,
            cache_key,
            destination: request.destination,
            also_cache: request.also_cache,
            status: JobStatus::Idle,
            expected_size: request.expected_size,
            total_size: request.expected_size,
            next_offset: 0,
            sink: None,
            in_flight: HashMap::new(),
            retry_offsets: BTreeSet::new(),
            dropped: BTreeSet::new(),
            received: BTreeMap::new(),
            received_bytes: 0,
            last_chunk_seen: false,
            terminal_end: None,
            cache_checked: false,
            cache_task: None,
            pending_admission: None,
            from_cache: false,
        }
    }

    /// Bytes go to memory unless a destination file is wanted on its own.
    pub fn wants_memory_sink(&self) -> bool {
        self.destination.is_none() || self.also_cache
    }

    /// Whether another chunk may be requested, capacity permitting.
    pub fn ready_to_request(&self) -> bool {
        if !matches!(self.status, JobStatus::Queued | JobStatus::Active) {
            return false;
        }
        // Without a known size the end is only learned from a short chunk,
        // so requests go one at a time.
        if self.total_size.is_none() && !self.in_flight.is_empty() {
            return false;
        }
        if !self.retry_offsets.is_empty() {
            return true;
        }
        if self.last_chunk_seen {
            return false;
        }
        match self.total_size {
            Some(total) => self.next_offset < total,
            None => true,
        }
    }

    /// Nothing in flight and no offset owed.
    pub fn is_drained(&self) -> bool {
        self.in_flight.is_empty() && self.retry_offsets.is_empty() && self.dropped.is_empty()
    }

    /// Requested range reached the end of the object.
    pub fn reached_end(&self) -> bool {
        self.last_chunk_seen
            || self
                .total_size
                .map_or(false, |total| self.next_offset >= total)
    }

    pub fn record_received(&mut self, offset: u64, len: u64) {
        if let Some(previous) = self.received.insert(offset, len) {
            self.received_bytes -= previous;
        }
        self.received_bytes += len;
    }

    /// Length of the gap-free prefix of received bytes.
    pub fn contiguous_bytes(&self) -> u64 {
        let mut frontier = 0;
        for (&offset, &len) in &self.received {
            if offset > frontier {
                break;
            }
            frontier = frontier.max(offset + len);
        }
        frontier
    }

    /// Bytes requested but not received, minus bytes received past the
    /// contiguous frontier.
    pub fn skipped_bytes(&self) -> i64 {
        let requested: u64 = self.in_flight.values().map(|c| c.length as u64).sum();
        let beyond = self.received_bytes.saturating_sub(self.contiguous_bytes());
        requested as i64 - beyond as i64
    }

    /// Received fraction of a known size, else 0.
    pub fn progress(&self) -> f64 {
        if self.status == JobStatus::Complete {
            return 1.0;
        }
        match self.total_size {
            Some(total) if total > 0 => (self.received_bytes as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }

    /// Move parked rate-limited offsets back into the retry set.
    pub fn requeue_dropped(&mut self) {
        let dropped = std::mem::take(&mut self.dropped);
        self.retry_offsets.extend(dropped);
    }

    /// Forget all progress ahead of a fresh attempt. Resources must already
    /// have been released.
    pub fn reset_for_retry(&mut self) {
        self.status = JobStatus::Idle;
        self.total_size = self.expected_size;
        self.next_offset = 0;
        self.sink = None;
        self.in_flight.clear();
        self.retry_offsets.clear();
        self.dropped.clear();
        self.received.clear();
        self.received_bytes = 0;
        self.last_chunk_seen = false;
        self.terminal_end = None;
        self.cache_checked = false;
        self.cache_task = None;
        self.pending_admission = None;
        self.from_cache = false;
    }

    pub fn snapshot(&self, queued: bool) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            locator: self.locator.clone(),
            status: self.status,
            expected_size: self.expected_size,
            total_size: self.total_size,
            bytes_received: self.received_bytes,
            contiguous_bytes: self.contiguous_bytes(),
            skipped_bytes: self.skipped_bytes(),
            in_flight: self.in_flight.len(),
            progress: self.progress(),
            queued,
            from_cache: self.from_cache,
        }
    }
}

/// Point-in-time view of a job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub locator: Locator,
    pub status: JobStatus,
    /// Size announced at creation.
    pub expected_size: Option<u64>,
    pub total_size: Option<u64>,
    pub bytes_received: u64,
    /// Gap-free prefix length, for resumability checks.
    pub contiguous_bytes: u64,
    pub skipped_bytes: i64,
    pub in_flight: usize,
    /// UI-facing fraction in `[0, 1]`.
    pub progress: f64,
    /// Linked in its tier's queue.
    pub queued: bool,
    pub from_cache: bool,
}
