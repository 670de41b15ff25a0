//! Tracing subscriber setup.
//!
//! Logs go to stderr in compact form. When a log directory is configured they
//! are also written, without ANSI colours, to a daily-rolling file
//! (`chunkfetch.YYYY-MM-DD.log`) through a non-blocking writer.
//!
//! `RUST_LOG` takes precedence over the configured filter.

use std::path::PathBuf;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Prefix of rolling log file names.
const LOG_FILE_PREFIX: &str = "chunkfetch";

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingSettings {
    /// `EnvFilter` directive string, e.g. `info` or `chunkfetch=debug`.
    pub filter: String,

    /// Directory for rolling log files. `None` logs to stderr only.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            directory: None,
        }
    }
}

impl LoggingSettings {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Keeps the file writer flushing. Drop it only at process exit.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether a log file is being written.
    pub fn has_file(&self) -> bool {
        self._file.is_some()
    }
}

fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Installing twice is harmless: the second call leaves the first subscriber
/// in place.
pub fn init_logging(settings: &LoggingSettings) -> LoggingGuard {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let mut file_error = None;
    let (file_layer, guard) = match &settings.directory {
        Some(dir) => match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir)
        {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_ansi(false).with_writer(writer);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                file_error = Some((dir.clone(), e));
                (None, None)
            }
        },
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(build_filter(settings))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if let Some((dir, e)) = file_error {
        warn!(directory = %dir.display(), error = %e, "Failed to open log directory, logging to stderr only");
    }

    LoggingGuard { _file: guard }
}
