//! CLI subcommands.

pub mod cache_key;
pub mod common;
pub mod fetch;
pub mod init;
