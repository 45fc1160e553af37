//! Utility modules for the cache keeper.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{KeeperError, Result};
