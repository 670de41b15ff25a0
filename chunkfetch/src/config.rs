//! Engine and application configuration.
//!
//! [`EngineConfig`] carries the scheduling knobs the download engine needs.
//! [`ConfigFile`] is the on-disk INI configuration used by the CLI:
//!
//! ```ini
//! [engine]
//! max_concurrent_chunks = 16
//! session_slots = 2
//! requeue_rate_limited = true
//!
//! [tiers]
//! 1 = https://dc1.example.net, https://dc1-mirror.example.net
//! 2 = https://dc2.example.net
//!
//! [cache]
//! directory = /home/user/.cache/chunkfetch
//! memory_max_bytes = 268435456
//!
//! [logging]
//! filter = info
//! directory = /home/user/.local/state/chunkfetch
//! ```
//!
//! A missing file yields the defaults. Unknown keys are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

use crate::locator::TierId;
use crate::logging::LoggingSettings;

/// Default cap on in-flight chunk requests per tier.
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 16;

/// Default number of parallel session slots per tier.
pub const DEFAULT_SESSION_SLOTS: usize = 2;

/// Default in-memory cache budget (256 MiB).
pub const DEFAULT_MEMORY_CACHE_BYTES: u64 = 256 * 1024 * 1024;

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for [{section}] {key}: {value:?}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// Scheduling configuration of the download engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Queue-wide cap on simultaneously in-flight chunk requests per tier.
    pub max_concurrent_chunks: usize,

    /// Parallel transport channels per tier.
    pub session_slots: usize,

    /// Re-issue chunks dropped by flood control without waiting for `start()`.
    pub requeue_rate_limited: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
            session_slots: DEFAULT_SESSION_SLOTS,
            requeue_rate_limited: true,
        }
    }
}

impl EngineConfig {
    /// Set the per-tier in-flight cap (at least 1).
    pub fn with_max_concurrent_chunks(mut self, max: usize) -> Self {
        self.max_concurrent_chunks = max.max(1);
        self
    }

    /// Set the number of session slots per tier (at least 1).
    pub fn with_session_slots(mut self, slots: usize) -> Self {
        self.session_slots = slots.max(1);
        self
    }

    /// Enable or disable automatic re-requests of rate-limited chunks.
    pub fn with_requeue_rate_limited(mut self, requeue: bool) -> Self {
        self.requeue_rate_limited = requeue;
        self
    }
}

/// Base URLs per tier. Each tier has one or more mirrors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TierEndpoints {
    tiers: BTreeMap<TierId, Vec<String>>,
}

impl TierEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mirrors of a tier, replacing any previous entry.
    pub fn insert(&mut self, tier: TierId, mirrors: Vec<String>) {
        self.tiers.insert(tier, mirrors);
    }

    /// Mirrors of a tier.
    pub fn mirrors(&self, tier: TierId) -> Option<&[String]> {
        self.tiers.get(&tier).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TierId, &[String])> {
        self.tiers.iter().map(|(tier, urls)| (*tier, urls.as_slice()))
    }
}

/// Local cache settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    /// Disk cache root. `None` disables the disk cache.
    pub directory: Option<PathBuf>,

    /// In-memory cache budget in bytes.
    pub memory_max_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: dirs::cache_dir().map(|d| d.join("chunkfetch")),
            memory_max_bytes: DEFAULT_MEMORY_CACHE_BYTES,
        }
    }
}

/// Contents of `config.ini`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub tiers: TierEndpoints,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

/// Default location of the configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chunkfetch")
        .join("config.ini")
}

impl ConfigFile {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_ini_str(&text)
    }

    /// Parse INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        if let Some(engine) = ini.section(Some("engine")) {
            if let Some(v) = engine.get("max_concurrent_chunks") {
                let max: usize = parse_value("engine", "max_concurrent_chunks", v)?;
                config.engine = config.engine.with_max_concurrent_chunks(max);
            }
            if let Some(v) = engine.get("session_slots") {
                let slots: usize = parse_value("engine", "session_slots", v)?;
                config.engine = config.engine.with_session_slots(slots);
            }
            if let Some(v) = engine.get("requeue_rate_limited") {
                config.engine.requeue_rate_limited =
                    parse_bool("engine", "requeue_rate_limited", v)?;
            }
        }

        if let Some(tiers) = ini.section(Some("tiers")) {
            for (key, value) in tiers.iter() {
                let tier = TierId(parse_value("tiers", key, key)?);
                let mirrors: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(String::from)
                    .collect();
                if mirrors.is_empty() {
                    return Err(invalid("tiers", key, value));
                }
                config.tiers.insert(tier, mirrors);
            }
        }

        if let Some(cache) = ini.section(Some("cache")) {
            if let Some(v) = cache.get("directory") {
                config.cache.directory = non_empty_path(v);
            }
            if let Some(v) = cache.get("memory_max_bytes") {
                config.cache.memory_max_bytes = parse_value("cache", "memory_max_bytes", v)?;
            }
        }

        if let Some(logging) = ini.section(Some("logging")) {
            if let Some(v) = logging.get("filter") {
                config.logging.filter = v.trim().to_string();
            }
            if let Some(v) = logging.get("directory") {
                config.logging.directory = non_empty_path(v);
            }
        }

        Ok(config)
    }

    /// Render as INI text.
    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new();

        ini.with_section(Some("engine"))
            .set(
                "max_concurrent_chunks",
                self.engine.max_concurrent_chunks.to_string(),
            )
            .set("session_slots", self.engine.session_slots.to_string())
            .set(
                "requeue_rate_limited",
                self.engine.requeue_rate_limited.to_string(),
            );

        for (tier, mirrors) in self.tiers.iter() {
            ini.with_section(Some("tiers"))
                .set(tier.0.to_string(), mirrors.join(", "));
        }

        ini.with_section(Some("cache")).set(
            "memory_max_bytes",
            self.cache.memory_max_bytes.to_string(),
        );
        if let Some(dir) = &self.cache.directory {
            ini.with_section(Some("cache"))
                .set("directory", dir.display().to_string());
        }

        ini.with_section(Some("logging"))
            .set("filter", self.logging.filter.clone());
        if let Some(dir) = &self.logging.directory {
            ini.with_section(Some("logging"))
                .set("directory", dir.display().to_string());
        }

        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = ini.write_to(&mut out);

        let mut text = String::from(
            "; chunkfetch configuration\n\
             ; [tiers] maps a tier id to one or more comma-separated base URLs,\n\
             ; e.g. 1 = https://dc1.example.net, https://dc1-mirror.example.net\n\n",
        );
        text.push_str(&String::from_utf8_lossy(&out));
        text
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_ini_string()).map_err(io_err)
    }
}

fn invalid(section: &str, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_value<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value)),
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}
