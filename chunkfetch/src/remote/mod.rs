//! Remote ranged-read primitive.
//!
//! The engine never performs I/O itself. It asks a [`RemoteReader`] to issue
//! a ranged read and later receives exactly one [`ReadCompletion`] for every
//! request that was not cancelled. Completions travel over an unbounded
//! channel so the reader can finish requests on any task.
//!
//! Cancellation is best effort: a completion for a cancelled request may still
//! arrive, and the engine discards it.

mod http;

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RemoteErrorKind;
use crate::locator::Locator;

pub use http::HttpRangeReader;

/// Handle of one issued ranged read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// One ranged read: `length` bytes of `locator` starting at `offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub locator: Locator,
    pub offset: u64,
    pub length: u32,
    /// Session slot (transport channel) of the tier to use.
    pub slot: usize,
}

/// Terminal outcome of a ranged read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadCompletion {
    /// Bytes starting at `offset`. Fewer than requested marks end-of-object.
    Chunk {
        request: RequestId,
        offset: u64,
        bytes: Bytes,
    },
    Failed {
        request: RequestId,
        error: RemoteErrorKind,
    },
}

impl ReadCompletion {
    pub fn request(&self) -> RequestId {
        match self {
            ReadCompletion::Chunk { request, .. } | ReadCompletion::Failed { request, .. } => {
                *request
            }
        }
    }
}

/// Channel on which readers deliver completions.
pub type CompletionSender = mpsc::UnboundedSender<ReadCompletion>;

/// Receiving half of the completion channel.
pub type CompletionReceiver = mpsc::UnboundedReceiver<ReadCompletion>;

/// Create a completion channel for a reader and the loop that drives the engine.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

/// Issues ranged reads against remote tiers.
pub trait RemoteReader: Send {
    /// Start a ranged read. Must not deliver its completion synchronously
    /// into the engine; completions go through the reader's channel.
    fn issue(&mut self, request: ReadRequest) -> RequestId;

    /// Abandon a request. No acknowledgement is delivered.
    fn cancel(&mut self, request: RequestId);
}
