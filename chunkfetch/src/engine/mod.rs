//! Chunked download engine.
//!
//! [`DownloadManager`] owns every [`JobId`]'s state, one [`DownloadQueue`] and
//! [`SessionPool`] per tier, the remote reader and the local cache. It is
//! single-threaded and sans-IO: callers feed it API calls and completions, and
//! it reacts synchronously. The [`service`](crate::service) module wraps it in
//! a tokio task.
//!
//! # Job lifecycle
//!
//! ```text
//!            start()                 miss               admitted + issued
//!   Idle ─────────────► CacheLookup ──────► Queued ─────────────────► Active
//!    ▲                       │ hit                                      │
//!    │ pause()               ▼                                          │ drained + end seen
//!    └──────────────── Complete ◄───────────────────────────────────────┘
//!
//!   any non-terminal ── fatal error ──► Failed    (start() retries from scratch)
//!   any non-terminal ── cancel() ─────► Cancelled
//! ```
//!
//! # Scheduling
//!
//! A job may issue chunk requests while it is linked in its tier's queue, is
//! ready (see `DownloadJob::ready_to_request`) and the tier is below its
//! in-flight cap. Whenever capacity frees up or ordering changes, the queue is
//! pumped from the head, so the best-ranked waiting job gets the slot.

mod events;
mod job;
mod queue;
mod session;
mod sink;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheCompletion, CacheLoadResult, CacheLookup, CacheTaskId, CachedObject, LocalCache,
};
use crate::config::EngineConfig;
use crate::error::{DownloadError, EngineError, EngineResult, RemoteErrorKind};
use crate::locator::{Locator, TierId, CHUNK_ALIGNMENT};
use crate::remote::{ReadCompletion, ReadRequest, RemoteReader, RequestId};

pub use events::{CompletedDownload, DownloadEvent, EventHub};
pub use job::{JobRequest, JobSnapshot, JobStatus};
pub use queue::{Admission, DownloadQueue, Priority};
pub use session::SessionPool;

use job::{AdmissionArgs, DownloadJob, InFlightChunk};
use sink::{remove_partial, write_whole, Sink, SinkOutput};

/// Handle of a download job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Scheduling state of one tier.
#[derive(Debug)]
struct TierState {
    queue: DownloadQueue,
    sessions: SessionPool,
}

impl TierState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            queue: DownloadQueue::new(config.max_concurrent_chunks),
            sessions: SessionPool::new(config.session_slots),
        }
    }
}

/// Whether a cached object may stand in for a download.
fn is_usable(locator: &Locator, object: &CachedObject) -> bool {
    if object.bytes.is_empty() {
        return false;
    }
    !locator.requires_renderable() || image::guess_format(&object.bytes).is_ok()
}

/// The download engine.
pub struct DownloadManager {
    config: EngineConfig,
    reader: Box<dyn RemoteReader>,
    cache: Box<dyn LocalCache>,

    jobs: HashMap<JobId, DownloadJob>,
    tiers: HashMap<TierId, TierState>,
    requests: HashMap<RequestId, JobId>,
    cache_waiters: HashMap<CacheTaskId, Vec<JobId>>,

    events: EventHub,
    epoch: u64,
    next_job: u64,
}

impl DownloadManager {
    pub fn new(
        config: EngineConfig,
        reader: Box<dyn RemoteReader>,
        cache: Box<dyn LocalCache>,
    ) -> Self {
        Self {
            config,
            reader,
            cache,
            jobs: HashMap::new(),
            tiers: HashMap::new(),
            requests: HashMap::new(),
            cache_waiters: HashMap::new(),
            events: EventHub::new(),
            epoch: 0,
            next_job: 1,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Caller API
    // =========================================================================

    /// Create an idle job. Nothing happens until [`start`](Self::start).
    pub fn create(&mut self, request: JobRequest) -> JobId {
        let id = JobId(self.next_job);
        self.next_job += 1;

        let key = request.locator.cache_key();
        if let Some(owner) = self
            .jobs
            .values()
            .find(|j| j.cache_key == key && !j.status.is_terminal())
        {
            warn!(
                job = %id,
                existing = %owner.id,
                key = %key,
                "Object already has a live download job"
            );
        }

        debug!(job = %id, locator = %request.locator, "Download job created");
        self.jobs.insert(id, DownloadJob::new(id, request));
        id
    }

    /// Start or resume a job, or change its admission.
    ///
    /// `load_first` puts it at the head of its queue; `boosted` ahead of the
    /// plain jobs of the current priority epoch. A failed job starts over
    /// from the cache lookup. Complete and cancelled jobs are left alone.
    pub fn start(&mut self, id: JobId, load_first: bool, boosted: bool) -> EngineResult<()> {
        let args = AdmissionArgs {
            load_first,
            boosted,
        };
        let job = self.jobs.get_mut(&id).ok_or(EngineError::UnknownJob(id))?;

        match job.status {
            JobStatus::Complete | JobStatus::Cancelled => {
                debug!(job = %id, status = %job.status, "Start ignored");
            }
            JobStatus::Failed => {
                info!(job = %id, "Retrying failed download");
                job.reset_for_retry();
                self.begin_cache_lookup(id, args);
            }
            JobStatus::CacheLookupPending => {
                job.pending_admission = Some(args);
            }
            JobStatus::Idle if !job.cache_checked => {
                info!(job = %id, locator = %job.locator, "Download started");
                self.begin_cache_lookup(id, args);
            }
            JobStatus::Idle | JobStatus::Queued | JobStatus::Active => {
                job.requeue_dropped();
                if job.status == JobStatus::Idle {
                    info!(job = %id, "Download resumed");
                    job.status = if job.in_flight.is_empty() && job.received_bytes == 0 {
                        JobStatus::Queued
                    } else {
                        JobStatus::Active
                    };
                }
                self.admit(id, args);
            }
        }
        Ok(())
    }

    /// Unlink a job from its queue, keeping all progress.
    ///
    /// Responses already in flight are still accepted. A job paused during
    /// its cache lookup stays idle on a miss.
    pub fn pause(&mut self, id: JobId) -> EngineResult<()> {
        let job = self.jobs.get_mut(&id).ok_or(EngineError::UnknownJob(id))?;

        match job.status {
            JobStatus::CacheLookupPending => job.pending_admission = None,
            JobStatus::Queued | JobStatus::Active => {
                job.status = JobStatus::Idle;
                if let Some(state) = self.tiers.get_mut(&job.locator.tier()) {
                    state.queue.remove(id);
                }
                info!(job = %id, bytes = job.received_bytes, "Download paused");
            }
            _ => {}
        }
        Ok(())
    }

    /// Stop a job for good and drop partial data. No event is emitted.
    /// Cancelling a terminal job does nothing.
    pub fn cancel(&mut self, id: JobId) -> EngineResult<()> {
        let job = self.jobs.get(&id).ok_or(EngineError::UnknownJob(id))?;
        if job.status.is_terminal() {
            debug!(job = %id, status = %job.status, "Cancel ignored");
            return Ok(());
        }
        let tier = job.locator.tier();

        self.teardown(id);
        if let Some(job) = self.jobs.get_mut(&id) {
            job.status = JobStatus::Cancelled;
        }
        info!(job = %id, "Download cancelled");
        self.pump(tier);
        Ok(())
    }

    /// Forget a job, cancelling it first if still live.
    pub fn release(&mut self, id: JobId) -> EngineResult<()> {
        let job = self.jobs.get(&id).ok_or(EngineError::UnknownJob(id))?;
        let tier = job.locator.tier();
        let live = !job.status.is_terminal();

        if live {
            self.teardown(id);
        }
        self.jobs.remove(&id);
        debug!(job = %id, "Download job released");
        if live {
            self.pump(tier);
        }
        Ok(())
    }

    /// Advance the priority epoch. Jobs admitted afterwards outrank those
    /// admitted before.
    pub fn bump_priority_epoch(&mut self) -> u64 {
        self.epoch += 1;
        debug!(epoch = self.epoch, "Priority epoch bumped");

        let tiers: Vec<TierId> = self.tiers.keys().copied().collect();
        for tier in tiers {
            self.pump(tier);
        }
        self.epoch
    }

    pub fn priority_epoch(&self) -> u64 {
        self.epoch
    }

    // =========================================================================
    // Completions
    // =========================================================================

    /// Feed a completion from the remote reader.
    pub fn on_read_completion(&mut self, completion: ReadCompletion) {
        match completion {
            ReadCompletion::Chunk {
                request,
                offset,
                bytes,
            } => self.on_chunk(request, offset, bytes),
            ReadCompletion::Failed { request, error } => self.on_read_error(request, error),
        }
    }

    /// A ranged read returned bytes.
    pub fn on_chunk(&mut self, request: RequestId, offset: u64, bytes: Bytes) {
        let Some((id, chunk)) = self.take_request(request) else {
            debug!(request = %request, offset, "Discarding response for unknown request");
            return;
        };
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let tier = job.locator.tier();

        match Self::accept_chunk(job, chunk, offset, &bytes) {
            Ok(()) => {
                debug!(
                    job = %id,
                    request = %request,
                    offset,
                    len = bytes.len(),
                    slot = chunk.slot,
                    "Chunk received"
                );
                let event = DownloadEvent::Progress {
                    job: id,
                    bytes_so_far: job.received_bytes,
                    total_size: job.total_size,
                };
                self.events.emit(event);

                if !self.try_complete(id) {
                    self.fill_job(id);
                }
                self.pump(tier);
            }
            Err(error) => self.fail(id, error),
        }
    }

    /// A ranged read failed.
    pub fn on_read_error(&mut self, request: RequestId, error: RemoteErrorKind) {
        let Some((id, chunk)) = self.take_request(request) else {
            debug!(request = %request, error = %error, "Discarding error for unknown request");
            return;
        };

        if !error.is_transient() {
            self.fail(id, DownloadError::Remote(error));
            return;
        }

        let requeue = self.config.requeue_rate_limited;
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let tier = job.locator.tier();
        if requeue {
            job.retry_offsets.insert(chunk.offset);
        } else {
            job.dropped.insert(chunk.offset);
        }
        warn!(
            job = %id,
            offset = chunk.offset,
            requeue,
            "Chunk dropped by remote flood control"
        );

        self.fill_job(id);
        self.pump(tier);
    }

    /// Feed a finished cooperative cache load.
    pub fn on_cache_completion(&mut self, completion: CacheCompletion) {
        let Some(waiters) = self.cache_waiters.remove(&completion.task) else {
            debug!(task = %completion.task, "Cache load finished with no waiters");
            return;
        };
        let found = match completion.result {
            CacheLoadResult::Found(object) => Some(object),
            CacheLoadResult::NotFound => None,
        };

        for id in waiters {
            let waiting = self.jobs.get(&id).map_or(false, |j| {
                j.status == JobStatus::CacheLookupPending && j.cache_task == Some(completion.task)
            });
            if waiting {
                self.apply_cache_result(id, found.clone());
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn status(&self, id: JobId) -> EngineResult<JobStatus> {
        self.jobs
            .get(&id)
            .map(|j| j.status)
            .ok_or(EngineError::UnknownJob(id))
    }

    pub fn snapshot(&self, id: JobId) -> EngineResult<JobSnapshot> {
        let job = self.jobs.get(&id).ok_or(EngineError::UnknownJob(id))?;
        let queued = self
            .tiers
            .get(&job.locator.tier())
            .map_or(false, |s| s.queue.contains(id));
        Ok(job.snapshot(queued))
    }

    /// Chunk requests in flight on a tier.
    pub fn in_flight_count(&self, tier: TierId) -> usize {
        self.tiers.get(&tier).map_or(0, |s| s.queue.in_flight())
    }

    /// In-flight bytes per session slot of a tier.
    pub fn session_loads(&self, tier: TierId) -> Vec<u64> {
        self.tiers
            .get(&tier)
            .map(|s| s.sessions.loads().to_vec())
            .unwrap_or_default()
    }

    /// Queue members of a tier in service order.
    pub fn queue_order(&self, tier: TierId) -> Vec<JobId> {
        self.tiers
            .get(&tier)
            .map(|s| s.queue.jobs())
            .unwrap_or_default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    // =========================================================================
    // Cache lookup
    // =========================================================================

    fn begin_cache_lookup(&mut self, id: JobId, args: AdmissionArgs) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        job.status = JobStatus::CacheLookupPending;
        job.pending_admission = Some(args);
        let key = job.cache_key.clone();

        match self.cache.lookup(&key) {
            CacheLookup::Found(object) => self.apply_cache_result(id, Some(object)),
            CacheLookup::InProgress(task) => self.wait_for_cache(id, task),
            CacheLookup::NotFound => match self.cache.start_cooperative_load(&key) {
                Some(task) => self.wait_for_cache(id, task),
                None => self.apply_cache_result(id, None),
            },
        }
    }

    fn wait_for_cache(&mut self, id: JobId, task: CacheTaskId) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.cache_task = Some(task);
        }
        self.cache_waiters.entry(task).or_default().push(id);
        debug!(job = %id, task = %task, "Waiting for cache load");
    }

    fn apply_cache_result(&mut self, id: JobId, found: Option<CachedObject>) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        job.cache_task = None;

        if let Some(object) = found {
            if is_usable(&job.locator, &object) {
                self.complete_from_cache(id, object);
                return;
            }
            warn!(
                job = %id,
                key = %job.cache_key,
                size = object.bytes.len(),
                "Cached object is corrupted, fetching from remote"
            );
        }
        self.on_cache_miss(id);
    }

    fn on_cache_miss(&mut self, id: JobId) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        job.cache_checked = true;

        let sink = match (&job.destination, job.wants_memory_sink()) {
            (Some(path), false) => Sink::create_file(path),
            _ => Ok(Sink::memory()),
        };
        match sink {
            Ok(sink) => job.sink = Some(sink),
            Err(error) => {
                self.fail(id, error);
                return;
            }
        }

        debug!(job = %id, key = %job.cache_key, "Cache miss");
        match job.pending_admission.take() {
            Some(args) => {
                job.status = JobStatus::Queued;
                self.admit(id, args);
            }
            None => job.status = JobStatus::Idle,
        }
    }

    fn complete_from_cache(&mut self, id: JobId, object: CachedObject) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let size = object.bytes.len() as u64;

        if let Some(path) = &job.destination {
            if let Err(error) = write_whole(path, &object.bytes) {
                remove_partial(path);
                self.fail(id, error);
                return;
            }
        }

        job.status = JobStatus::Complete;
        job.cache_checked = true;
        job.from_cache = true;
        job.pending_admission = None;
        job.total_size = Some(size);
        job.record_received(0, size);
        let path = job.destination.clone();

        info!(job = %id, size, "Download served from local cache");
        self.events.emit(DownloadEvent::Complete {
            job: id,
            output: CompletedDownload {
                path,
                bytes: Some(object.bytes),
                size,
                from_cache: true,
            },
        });
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    fn admit(&mut self, id: JobId, args: AdmissionArgs) {
        let Some(job) = self.jobs.get(&id) else {
            return;
        };
        let tier = job.locator.tier();
        let priority = Priority::new(self.epoch, args.boosted);

        let config = &self.config;
        let state = self
            .tiers
            .entry(tier)
            .or_insert_with(|| TierState::new(config));
        let placement = state.queue.admit(id, priority, args.load_first);
        debug!(
            job = %id,
            tier = %tier,
            epoch = priority.epoch,
            boosted = args.boosted,
            load_first = args.load_first,
            ?placement,
            "Job admitted"
        );

        if self.try_complete(id) {
            return;
        }
        self.fill_job(id);
        self.pump(tier);
    }

    /// Issue chunks for queue members from the head until the tier is saturated.
    fn pump(&mut self, tier: TierId) {
        let order = match self.tiers.get(&tier) {
            Some(state) => state.queue.jobs(),
            None => return,
        };
        for id in order {
            if !self
                .tiers
                .get(&tier)
                .map_or(false, |s| s.queue.has_capacity())
            {
                break;
            }
            self.fill_job(id);
        }
    }

    /// Issue chunks for one job while it is ready and the tier has capacity.
    fn fill_job(&mut self, id: JobId) {
        while self.can_issue(id) {
            self.issue_next_chunk(id);
        }
    }

    fn can_issue(&self, id: JobId) -> bool {
        let Some(job) = self.jobs.get(&id) else {
            return false;
        };
        job.ready_to_request()
            && self
                .tiers
                .get(&job.locator.tier())
                .map_or(false, |s| s.queue.contains(id) && s.queue.has_capacity())
    }

    fn issue_next_chunk(&mut self, id: JobId) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let tier = job.locator.tier();
        let Some(state) = self.tiers.get_mut(&tier) else {
            return;
        };

        let length = job.locator.chunk_size();
        let offset = match job.retry_offsets.pop_first() {
            Some(offset) => offset,
            None => {
                let offset = job.next_offset;
                job.next_offset += length as u64;
                offset
            }
        };
        let slot = state.sessions.least_loaded();

        let request = self.reader.issue(ReadRequest {
            locator: job.locator.clone(),
            offset,
            length,
            slot,
        });
        state.sessions.acquire(slot, length as u64);
        state.queue.acquire();
        job.in_flight.insert(
            request,
            InFlightChunk {
                offset,
                length,
                slot,
            },
        );
        job.status = JobStatus::Active;
        self.requests.insert(request, id);

        debug!(
            job = %id,
            request = %request,
            tier = %tier,
            offset,
            slot,
            in_flight = state.queue.in_flight(),
            "Chunk requested"
        );
    }

    /// Resolve a request and release its counters.
    fn take_request(&mut self, request: RequestId) -> Option<(JobId, InFlightChunk)> {
        let id = self.requests.remove(&request)?;
        let job = self.jobs.get_mut(&id)?;
        let chunk = job.in_flight.remove(&request)?;
        if let Some(state) = self.tiers.get_mut(&job.locator.tier()) {
            state.sessions.release(chunk.slot, chunk.length as u64);
            state.queue.release();
        }
        Some((id, chunk))
    }

    /// Validate a response and write it into the sink.
    fn accept_chunk(
        job: &mut DownloadJob,
        chunk: InFlightChunk,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), DownloadError> {
        let len = bytes.len() as u64;
        if offset != chunk.offset {
            return Err(DownloadError::protocol(format!(
                "response for offset {} answered request for offset {}",
                offset, chunk.offset
            )));
        }
        if len > chunk.length as u64 {
            return Err(DownloadError::protocol(format!(
                "received {} bytes for a {} byte request",
                len, chunk.length
            )));
        }
        if let Some(total) = job.total_size {
            if offset + len > total {
                return Err(DownloadError::protocol(format!(
                    "chunk at {} runs past declared size {}",
                    offset, total
                )));
            }
        }
        if let Some(end) = job.terminal_end {
            if offset + len > end {
                return Err(DownloadError::protocol(format!(
                    "chunk at {} runs past object end {}",
                    offset, end
                )));
            }
        }

        if len > 0 {
            if let Some(sink) = job.sink.as_mut() {
                sink.write_at(offset, bytes)?;
            }
            job.record_received(offset, len);
        }

        let short = len < chunk.length as u64 || len % CHUNK_ALIGNMENT as u64 != 0;
        if short {
            let end = offset + len;
            if let Some(previous) = job.terminal_end {
                if previous != end {
                    return Err(DownloadError::protocol(format!(
                        "conflicting object end: {} then {}",
                        previous, end
                    )));
                }
            }
            job.terminal_end = Some(end);
            job.last_chunk_seen = true;
        }
        Ok(())
    }

    // =========================================================================
    // Completion and teardown
    // =========================================================================

    /// Complete (or fail the integrity check of) a drained job at its end.
    fn try_complete(&mut self, id: JobId) -> bool {
        let Some(job) = self.jobs.get(&id) else {
            return false;
        };
        if job.status.is_terminal() || job.sink.is_none() {
            return false;
        }
        if !job.is_drained() || !job.reached_end() {
            return false;
        }

        match Self::verify_coverage(job) {
            Ok(size) => self.complete(id, size),
            Err(error) => self.fail(id, error),
        }
        true
    }

    /// Received chunks must cover `[0, size)` with no gaps.
    fn verify_coverage(job: &DownloadJob) -> Result<u64, DownloadError> {
        if let (Some(total), Some(end)) = (job.total_size, job.terminal_end) {
            if total != end {
                return Err(DownloadError::SizeMismatch {
                    expected: total,
                    actual: end,
                });
            }
        }
        let expected = job.terminal_end.or(job.total_size).unwrap_or(0);
        if job.contiguous_bytes() != expected || job.received_bytes != expected {
            return Err(DownloadError::SizeMismatch {
                expected,
                actual: job.received_bytes,
            });
        }
        Ok(expected)
    }

    fn complete(&mut self, id: JobId, size: u64) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let tier = job.locator.tier();
        if let Some(state) = self.tiers.get_mut(&tier) {
            state.queue.remove(id);
        }
        let Some(sink) = job.sink.take() else {
            return;
        };

        let destination = job.destination.clone();
        let outcome = sink.finish().and_then(|output| match output {
            SinkOutput::Memory(bytes) => {
                if let Some(path) = &destination {
                    write_whole(path, &bytes)?;
                }
                Ok((destination.clone(), Some(bytes)))
            }
            SinkOutput::File(path) => Ok((Some(path), None)),
        });
        let (path, bytes) = match outcome {
            Ok(output) => output,
            Err(error) => {
                if let Some(path) = &destination {
                    remove_partial(path);
                }
                self.fail(id, error);
                return;
            }
        };

        // Objects that passed through memory are kept in the local cache.
        if let Some(bytes) = &bytes {
            self.cache
                .store(&job.cache_key, bytes, job.locator.storage_kind());
        }
        job.status = JobStatus::Complete;
        job.total_size = Some(size);

        info!(job = %id, size, "Download complete");
        self.events.emit(DownloadEvent::Complete {
            job: id,
            output: CompletedDownload {
                path,
                bytes,
                size,
                from_cache: false,
            },
        });
        self.pump(tier);
    }

    fn fail(&mut self, id: JobId, error: DownloadError) {
        let Some(job) = self.jobs.get(&id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }
        let tier = job.locator.tier();
        let had_partial_data = job.received_bytes > 0;

        self.teardown(id);
        if let Some(job) = self.jobs.get_mut(&id) {
            job.status = JobStatus::Failed;
        }

        warn!(job = %id, error = %error, had_partial_data, "Download failed");
        self.events.emit(DownloadEvent::Failed {
            job: id,
            had_partial_data,
            error,
        });
        self.pump(tier);
    }

    /// Cancel requests, release counters, unlink, abandon the cache load and
    /// discard partial data. Leaves the status to the caller.
    fn teardown(&mut self, id: JobId) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let tier = job.locator.tier();

        for (request, chunk) in job.in_flight.drain() {
            self.reader.cancel(request);
            self.requests.remove(&request);
            if let Some(state) = self.tiers.get_mut(&tier) {
                state.sessions.release(chunk.slot, chunk.length as u64);
                state.queue.release();
            }
        }
        if let Some(state) = self.tiers.get_mut(&tier) {
            state.queue.remove(id);
        }

        if let Some(task) = job.cache_task.take() {
            let abandoned = match self.cache_waiters.get_mut(&task) {
                Some(waiters) => {
                    waiters.retain(|w| *w != id);
                    waiters.is_empty()
                }
                None => false,
            };
            if abandoned {
                self.cache_waiters.remove(&task);
                self.cache.cancel_cooperative_load(task);
            }
        }

        if let Some(sink) = job.sink.take() {
            sink.discard();
        }
        job.retry_offsets.clear();
        job.dropped.clear();
        job.pending_admission = None;
    }
}
