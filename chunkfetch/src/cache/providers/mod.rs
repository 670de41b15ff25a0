//! Cache provider implementations.
//!
//! # Available Providers
//!
//! - [`MemoryCache`]: in-memory LRU cache using moka
//! - [`DiskCache`]: one file per object, optionally loaded cooperatively

mod disk;
mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;
