//! Destination of received chunk bytes.
//!
//! Chunks arrive in any order, so both sink kinds write at absolute offsets.
//! A memory sink grows (zero-filled) to cover the furthest write. A file sink
//! seeks within a truncate-created file.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::warn;

use crate::error::DownloadError;

/// Where a finished sink left the object.
#[derive(Debug)]
pub enum SinkOutput {
    Memory(Bytes),
    File(PathBuf),
}

/// Growable buffer or open file receiving an object's bytes.
#[derive(Debug)]
pub enum Sink {
    Memory(Vec<u8>),
    File { path: PathBuf, file: File },
}

impl Sink {
    pub fn memory() -> Self {
        Sink::Memory(Vec::new())
    }

    /// Truncate-create `path`, creating parent directories.
    pub fn create_file(path: &Path) -> Result<Self, DownloadError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| DownloadError::io(path, e))?;
            }
        }
        let file = File::create(path).map_err(|e| DownloadError::io(path, e))?;
        Ok(Sink::File {
            path: path.to_path_buf(),
            file,
        })
    }

    /// File backing the sink, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Sink::Memory(_) => None,
            Sink::File { path, .. } => Some(path),
        }
    }

    /// Write `bytes` at absolute `offset`.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), DownloadError> {
        match self {
            Sink::Memory(buffer) => {
                let start = offset as usize;
                let end = start + bytes.len();
                if buffer.len() < end {
                    buffer.resize(end, 0);
                }
                buffer[start..end].copy_from_slice(bytes);
                Ok(())
            }
            Sink::File { path, file } => file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(bytes))
                .map_err(|e| DownloadError::io(path.as_path(), e)),
        }
    }

    /// Flush and close.
    pub fn finish(self) -> Result<SinkOutput, DownloadError> {
        match self {
            Sink::Memory(buffer) => Ok(SinkOutput::Memory(Bytes::from(buffer))),
            Sink::File { path, mut file } => {
                file.flush()
                    .and_then(|_| file.sync_all())
                    .map_err(|e| DownloadError::io(path.as_path(), e))?;
                Ok(SinkOutput::File(path))
            }
        }
    }

    /// Drop buffered bytes, or close and remove the partial file.
    pub fn discard(self) {
        if let Sink::File { path, file } = self {
            drop(file);
            remove_partial(&path);
        }
    }
}

/// Remove a partially written file. Already-gone is fine.
pub(crate) fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}

/// Write a complete object to `path` in one go.
pub(crate) fn write_whole(path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::io(path, e))?;
        }
    }
    fs::write(path, bytes).map_err(|e| DownloadError::io(path, e))
}
