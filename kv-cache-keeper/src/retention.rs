//! Oldest-first rotation of snapshot and backup files.

use crate::fingerprint;
use crate::fs::StoredFile;
use std::io;
use tracing::{info, warn};

/// Outcome of one rotation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Names of deleted files, oldest first
    pub deleted: Vec<String>,

    /// Names of surplus files that could not be deleted
    pub failed: Vec<String>,
}

/// Keep the newest `max_count` of `files`, deleting the rest oldest-first.
///
/// Ordering is by modification time, ties broken by name. Each deletion is
/// independent: a failure is logged and the pass continues. The fingerprint
/// sidecar goes with its file.
pub fn rotate(mut files: Vec<StoredFile>, max_count: usize) -> RotationReport {
    let mut report = RotationReport::default();
    if files.len() <= max_count {
        return report;
    }

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    let surplus = files.len() - max_count;

    for file in files.into_iter().take(surplus) {
        match remove(&file) {
            Ok(()) => {
                info!("Removed old file: {}", file.name);
                report.deleted.push(file.name);
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", file.name, e);
                report.failed.push(file.name);
            }
        }
    }

    report
}

fn remove(file: &StoredFile) -> io::Result<()> {
    match std::fs::remove_file(&file.path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    if let Err(e) = fingerprint::remove_sidecar(&file.path) {
        warn!("Failed to remove fingerprint of {}: {}", file.name, e);
    }
    Ok(())
}
