//! chunkfetch - Chunked, prioritised downloads of remote media objects
//!
//! Large objects (images, videos, documents, voice notes) are fetched from a
//! remote storage tier in bounded, aligned chunks, reassembled out of order
//! into memory or a destination file, and handed to a local cache. Many jobs
//! share a small pool of transport sessions per tier; a per-tier priority
//! queue decides which job gets the next free request slot.
//!
//! # Modules
//!
//! - [`engine`]: the single-threaded [`DownloadManager`](engine::DownloadManager)
//! - [`service`]: a tokio task and cloneable handle around the engine
//! - [`remote`]: the ranged-read primitive and its HTTP implementation
//! - [`cache`]: the local cache interface with memory and disk providers
//! - [`locator`]: how objects are addressed, chunked and keyed
//! - [`config`], [`logging`], [`error`]: the ambient plumbing

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod locator;
pub mod logging;
pub mod remote;
pub mod service;

pub use engine::{DownloadEvent, DownloadManager, JobId, JobRequest, JobSnapshot, JobStatus};
pub use error::{DownloadError, EngineError, RemoteErrorKind};
pub use locator::{Locator, MediaKind, TierId};
pub use service::{DownloadHandle, DownloadService};
