//! Async service around the download engine.
//!
//! [`DownloadService`] owns a [`DownloadManager`] inside one tokio task and
//! serialises every mutation through its event loop: caller commands, ranged
//! read completions and cooperative cache-load completions are handled one at
//! a time, so the engine itself needs no locking. [`DownloadHandle`] is the
//! cloneable front used by callers.
//!
//! # Example
//!
//! ```ignore
//! use chunkfetch::service::DownloadService;
//!
//! let (service, handle) = DownloadService::with_http(&config_file)?;
//! let shutdown = CancellationToken::new();
//! service.spawn(shutdown.clone());
//!
//! let mut events = handle.subscribe().await?;
//! let job = handle.create(JobRequest::new(locator)).await?;
//! handle.start(job, false, false).await?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{CacheCompletion, DiskCache, LocalCache, MemoryCache};
use crate::config::{ConfigFile, EngineConfig};
use crate::engine::{DownloadEvent, DownloadManager, JobId, JobRequest, JobSnapshot};
use crate::error::{EngineError, EngineResult, RemoteErrorKind};
use crate::remote::{completion_channel, CompletionReceiver, HttpRangeReader, RemoteReader};

/// Receiving half of the cooperative cache-load channel.
pub type CacheCompletionReceiver = mpsc::UnboundedReceiver<CacheCompletion>;

/// A caller request carried to the service loop.
#[derive(Debug)]
enum Command {
    Create {
        request: JobRequest,
        reply: oneshot::Sender<JobId>,
    },
    Start {
        job: JobId,
        load_first: bool,
        boosted: bool,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Pause {
        job: JobId,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Cancel {
        job: JobId,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Release {
        job: JobId,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    BumpEpoch {
        reply: oneshot::Sender<u64>,
    },
    Subscribe {
        reply: oneshot::Sender<mpsc::UnboundedReceiver<DownloadEvent>>,
    },
    Snapshot {
        job: JobId,
        reply: oneshot::Sender<EngineResult<JobSnapshot>>,
    },
}

/// Event loop owning the download engine.
pub struct DownloadService {
    manager: DownloadManager,
    commands: mpsc::UnboundedReceiver<Command>,
    reads: CompletionReceiver,
    cache_loads: Option<CacheCompletionReceiver>,
}

impl DownloadService {
    /// Create the service and its handle.
    ///
    /// # Arguments
    ///
    /// * `reads` - Receiver paired with the reader's completion sender
    /// * `cache_loads` - Receiver for cooperative cache loads, if the cache starts any
    pub fn new(
        config: EngineConfig,
        reader: Box<dyn RemoteReader>,
        cache: Box<dyn LocalCache>,
        reads: CompletionReceiver,
        cache_loads: Option<CacheCompletionReceiver>,
    ) -> (Self, DownloadHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let service = Self {
            manager: DownloadManager::new(config, reader, cache),
            commands,
            reads,
            cache_loads,
        };
        (service, DownloadHandle { commands: command_tx })
    }

    /// Create a service that reads over HTTP from the configured tiers.
    ///
    /// With a cache directory configured, objects are cached on disk and
    /// loaded cooperatively; otherwise a memory cache is used.
    pub fn with_http(config: &ConfigFile) -> Result<(Self, DownloadHandle), RemoteErrorKind> {
        let (read_tx, reads) = completion_channel();
        let reader = HttpRangeReader::new(config.tiers.clone(), read_tx)?;

        let (cache, cache_loads) = match &config.cache.directory {
            Some(directory) => {
                let (load_tx, load_rx) = mpsc::unbounded_channel();
                let cache: Box<dyn LocalCache> =
                    Box::new(DiskCache::with_loader(directory, load_tx));
                (cache, Some(load_rx))
            }
            None => {
                let cache: Box<dyn LocalCache> =
                    Box::new(MemoryCache::new(config.cache.memory_max_bytes));
                (cache, None)
            }
        };

        Ok(Self::new(
            config.engine.clone(),
            Box::new(reader),
            cache,
            reads,
            cache_loads,
        ))
    }

    /// Run on a new tokio task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until shutdown is signalled or every handle is dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Download service starting");

        let Self {
            mut manager,
            mut commands,
            mut reads,
            mut cache_loads,
        } = self;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Download service shutting down");
                    break;
                }

                command = commands.recv() => match command {
                    Some(command) => Self::handle_command(&mut manager, command),
                    None => {
                        debug!("All download handles dropped");
                        break;
                    }
                },

                Some(completion) = reads.recv() => {
                    manager.on_read_completion(completion);
                }

                Some(completion) = next_cache_load(&mut cache_loads) => {
                    manager.on_cache_completion(completion);
                }
            }
        }

        info!(jobs = manager.job_count(), "Download service stopped");
    }

    fn handle_command(manager: &mut DownloadManager, command: Command) {
        // A dropped reply receiver means the caller stopped waiting.
        match command {
            Command::Create { request, reply } => {
                let _ = reply.send(manager.create(request));
            }
            Command::Start {
                job,
                load_first,
                boosted,
                reply,
            } => {
                let _ = reply.send(manager.start(job, load_first, boosted));
            }
            Command::Pause { job, reply } => {
                let _ = reply.send(manager.pause(job));
            }
            Command::Cancel { job, reply } => {
                let _ = reply.send(manager.cancel(job));
            }
            Command::Release { job, reply } => {
                let _ = reply.send(manager.release(job));
            }
            Command::BumpEpoch { reply } => {
                let _ = reply.send(manager.bump_priority_epoch());
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(manager.subscribe());
            }
            Command::Snapshot { job, reply } => {
                let _ = reply.send(manager.snapshot(job));
            }
        }
    }
}

/// Next cooperative cache completion, or never when the cache starts none.
async fn next_cache_load(
    receiver: &mut Option<CacheCompletionReceiver>,
) -> Option<CacheCompletion> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable async front of a running [`DownloadService`].
///
/// Every method fails with [`EngineError::ServiceStopped`] once the service
/// loop has exited.
#[derive(Clone, Debug)]
pub struct DownloadHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl DownloadHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> EngineResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| EngineError::ServiceStopped)?;
        response.await.map_err(|_| EngineError::ServiceStopped)
    }

    pub async fn create(&self, request: JobRequest) -> EngineResult<JobId> {
        self.request(|reply| Command::Create { request, reply }).await
    }

    pub async fn start(&self, job: JobId, load_first: bool, boosted: bool) -> EngineResult<()> {
        self.request(|reply| Command::Start {
            job,
            load_first,
            boosted,
            reply,
        })
        .await?
    }

    pub async fn pause(&self, job: JobId) -> EngineResult<()> {
        self.request(|reply| Command::Pause { job, reply }).await?
    }

    pub async fn cancel(&self, job: JobId) -> EngineResult<()> {
        self.request(|reply| Command::Cancel { job, reply }).await?
    }

    pub async fn release(&self, job: JobId) -> EngineResult<()> {
        self.request(|reply| Command::Release { job, reply }).await?
    }

    /// Advance the priority epoch; returns the new epoch.
    pub async fn bump_priority_epoch(&self) -> EngineResult<u64> {
        self.request(|reply| Command::BumpEpoch { reply }).await
    }

    /// Receive every event emitted after the service handles this call.
    pub async fn subscribe(&self) -> EngineResult<mpsc::UnboundedReceiver<DownloadEvent>> {
        self.request(|reply| Command::Subscribe { reply }).await
    }

    pub async fn snapshot(&self, job: JobId) -> EngineResult<JobSnapshot> {
        self.request(|reply| Command::Snapshot { job, reply }).await?
    }

    /// Whether the service loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }
}
