//! Remote object addressing.
//!
//! A [`Locator`] names one object on one storage tier. The variant decides how
//! the object is chunked and how its local cache key is derived:
//!
//! | Variant   | Namespace        | Chunk size | Cache key                         |
//! |-----------|------------------|------------|-----------------------------------|
//! | `Legacy`  | image "storage"  | 64 KiB     | `storage:{volume}:{local}:{secret}` |
//! | `Keyed`   | media by id      | 128 KiB    | `{kind}:{object_id}`              |

use std::fmt;

use crate::cache::{CacheKey, StorageKind};

/// Chunk size for legacy (image storage) locations.
pub const LEGACY_CHUNK_SIZE: u32 = 64 * 1024;

/// Chunk size for keyed media locations.
pub const KEYED_CHUNK_SIZE: u32 = 128 * 1024;

/// Every non-terminal chunk is a multiple of this many bytes.
pub const CHUNK_ALIGNMENT: u32 = 1024;

/// Identifier of a remote storage tier (a group of endpoints).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TierId(pub u32);

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.0)
    }
}

/// Media class of a keyed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Lowercase name used in cache keys and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    /// Parse from the lowercase name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            "document" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image stored in the legacy volume/local-id namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LegacyLocation {
    pub tier: TierId,
    pub volume_id: u64,
    pub local_id: i32,
    pub secret: u64,
}

/// Media stored under an opaque 64-bit id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyedLocation {
    pub tier: TierId,
    pub kind: MediaKind,
    pub object_id: u64,
    pub access_token: u64,
}

/// Addressing information for one remote object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locator {
    Legacy(LegacyLocation),
    Keyed(KeyedLocation),
}

impl Locator {
    /// Create a legacy image locator.
    pub fn legacy(tier: TierId, volume_id: u64, local_id: i32, secret: u64) -> Self {
        Locator::Legacy(LegacyLocation {
            tier,
            volume_id,
            local_id,
            secret,
        })
    }

    /// Create a keyed media locator.
    pub fn keyed(tier: TierId, kind: MediaKind, object_id: u64, access_token: u64) -> Self {
        Locator::Keyed(KeyedLocation {
            tier,
            kind,
            object_id,
            access_token,
        })
    }

    /// The tier the object is fetched from.
    pub fn tier(&self) -> TierId {
        match self {
            Locator::Legacy(l) => l.tier,
            Locator::Keyed(k) => k.tier,
        }
    }

    /// Bytes requested per chunk.
    pub fn chunk_size(&self) -> u32 {
        match self {
            Locator::Legacy(_) => LEGACY_CHUNK_SIZE,
            Locator::Keyed(_) => KEYED_CHUNK_SIZE,
        }
    }

    /// Key under which the complete object lives in the local cache.
    pub fn cache_key(&self) -> CacheKey {
        match self {
            Locator::Legacy(l) => CacheKey::new(format!(
                "storage:{}:{}:{}",
                l.volume_id, l.local_id, l.secret
            )),
            Locator::Keyed(k) => CacheKey::new(format!("{}:{}", k.kind, k.object_id)),
        }
    }

    /// Storage class reported to the cache on store.
    pub fn storage_kind(&self) -> StorageKind {
        match self {
            Locator::Legacy(_) => StorageKind::Image,
            Locator::Keyed(k) => match k.kind {
                MediaKind::Video => StorageKind::Video,
                MediaKind::Audio => StorageKind::Audio,
                MediaKind::Document => StorageKind::Document,
            },
        }
    }

    /// Legacy locations hold images; a cached copy must decode as one.
    pub fn requires_renderable(&self) -> bool {
        matches!(self, Locator::Legacy(_))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Legacy(l) => write!(
                f,
                "{}/storage/{}/{}",
                l.tier, l.volume_id, l.local_id
            ),
            Locator::Keyed(k) => write!(f, "{}/{}/{}", k.tier, k.kind, k.object_id),
        }
    }
}
