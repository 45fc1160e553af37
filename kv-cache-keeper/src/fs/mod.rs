//! Storage directory access.

pub mod walker;

pub use walker::{scan_storage, StoredFile};
