//! CLI error type.

use std::error::Error;
use std::fmt;

use chunkfetch::config::ConfigError;
use chunkfetch::{DownloadError, EngineError, RemoteErrorKind};

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid or incomplete configuration.
    Config(String),
    /// Configuration file could not be read or written.
    ConfigFile(ConfigError),
    /// Object address arguments do not describe exactly one locator.
    Locator(String),
    /// The HTTP reader could not be created.
    Remote(RemoteErrorKind),
    /// The download service stopped or rejected a request.
    Service(EngineError),
    /// The download itself failed.
    Download(DownloadError),
    /// Interrupted by the user.
    Interrupted,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Locator(msg) => write!(f, "Invalid object address: {}", msg),
            CliError::Remote(e) => write!(f, "Failed to set up remote reader: {}", e),
            CliError::Service(e) => write!(f, "Download service error: {}", e),
            CliError::Download(e) => write!(f, "Download failed: {}", e),
            CliError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Remote(e) => Some(e),
            CliError::Service(e) => Some(e),
            CliError::Download(e) => Some(e),
            CliError::Config(_) | CliError::Locator(_) | CliError::Interrupted => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Service(e)
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        CliError::Download(e)
    }
}
