//! KV Cache Keeper Library
//!
//! Keeps the KV caches of a llama.cpp server's slots on disk: periodic
//! multi-slot snapshots, deduplicated backups, retention and restore.

pub mod catalog;
pub mod client;
pub mod config;
pub mod context;
pub mod control;
pub mod coordinator;
pub mod daemon;
pub mod discovery;
pub mod fingerprint;
pub mod fs;
pub mod naming;
pub mod restore;
pub mod retention;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::KeeperError;
pub type Result<T> = std::result::Result<T, KeeperError>;
