//! Observer notifications.
//!
//! Download outcomes are never returned from API calls; they are broadcast
//! to every subscriber as [`DownloadEvent`]s. Subscribers whose receiver was
//! dropped are pruned on the next emit.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::JobId;
use crate::error::DownloadError;

/// Where a completed object can be found.
#[derive(Clone, Debug)]
pub struct CompletedDownload {
    /// Destination file, when one was requested.
    pub path: Option<PathBuf>,

    /// Object bytes, when they were held in memory.
    pub bytes: Option<Bytes>,

    /// Final size in bytes.
    pub size: u64,

    /// Served by the local cache without network traffic.
    pub from_cache: bool,
}

/// Notification about one job.
#[derive(Clone, Debug)]
pub enum DownloadEvent {
    /// Bytes received so far, after each chunk.
    Progress {
        job: JobId,
        bytes_so_far: u64,
        total_size: Option<u64>,
    },

    Complete {
        job: JobId,
        output: CompletedDownload,
    },

    /// Terminal failure. `had_partial_data` tells whether any bytes arrived.
    Failed {
        job: JobId,
        had_partial_data: bool,
        error: DownloadError,
    },
}

impl DownloadEvent {
    /// Job the event is about.
    pub fn job(&self) -> JobId {
        match self {
            DownloadEvent::Progress { job, .. }
            | DownloadEvent::Complete { job, .. }
            | DownloadEvent::Failed { job, .. } => *job,
        }
    }

    /// Whether no further events follow for this job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress { .. })
    }
}

/// Fan-out of events to subscribers.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Vec<mpsc::UnboundedSender<DownloadEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. It sees events emitted from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: DownloadEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
