//! Flat scan of the storage directory.
//!
//! Snapshot files live directly in the storage directory, so the walk is
//! limited to depth 1 and only regular `.bin` files are reported.

use crate::naming::SNAPSHOT_EXTENSION;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// A snapshot-like file found in the storage directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Full path to the file
    pub path: PathBuf,

    /// File name (no directory)
    pub name: String,

    /// File size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,
}

impl StoredFile {
    fn from_entry(entry: &DirEntry) -> io::Result<Self> {
        let metadata = entry.metadata()?;
        Ok(Self {
            path: entry.path().to_path_buf(),
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Read metadata for a single path.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }
}

/// List every `.bin` file directly inside `dir`.
///
/// A missing directory is an empty store, not an error.
pub fn scan_storage(dir: &Path) -> io::Result<Vec<StoredFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false);

    for entry in walker {
        let entry = entry?;

        if !entry.file_type().is_file() || !is_snapshot_like(&entry) {
            continue;
        }

        // Files can disappear between listing and stat; skip them.
        match StoredFile::from_entry(&entry) {
            Ok(file) => files.push(file),
            Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
        }
    }

    Ok(files)
}

fn is_snapshot_like(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.ends_with(SNAPSHOT_EXTENSION))
}
