//! Error types for the download engine.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::engine::JobId;

/// Result type for engine API calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by the remote read primitive for one chunk request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteErrorKind {
    /// Flood control on the remote side. The chunk is dropped, not fatal.
    #[error("rate limited by remote tier")]
    TransientRateLimited,

    /// The object no longer exists or access was revoked.
    #[error("remote object unavailable")]
    RemoteObjectUnavailable,

    /// The remote answered with something the engine cannot interpret.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Any other remote or transport error.
    #[error("remote error: {0}")]
    Other(String),
}

impl RemoteErrorKind {
    /// Whether the error only drops the affected chunk.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteErrorKind::TransientRateLimited)
    }
}

/// Terminal failure of a download job, delivered through `DownloadEvent::Failed`.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// A chunk request failed with a non-retriable error.
    #[error(transparent)]
    Remote(#[from] RemoteErrorKind),

    /// Opening or writing the destination failed.
    #[error("local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The received chunks do not add up to the expected object.
    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DownloadError::LocalIo {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        DownloadError::Remote(RemoteErrorKind::ProtocolMismatch(reason.into()))
    }
}

/// Caller-side misuse of the engine API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// No job with this id exists (never created, or already released).
    #[error("unknown download job {0}")]
    UnknownJob(JobId),

    /// The async service has shut down.
    #[error("download service stopped")]
    ServiceStopped,
}
