//! Snapshot coordinator - runs save cycles and backup cycles.
//!
//! A save cycle snapshots every slot that holds state under one shared
//! timestamp, then rotates the session's snapshots. A backup cycle copies the
//! newest snapshot group under a backup label, skipping the copy when the
//! scheduled backup would be identical to the previous one.
//!
//! Both cycles are best-effort per item: one slot or one file failing is
//! logged and never stops its siblings.

use crate::catalog::{Catalog, Group};
use crate::client::LlamaClient;
use crate::config::Config;
use crate::context::Context;
use crate::discovery::SlotDiscovery;
use crate::fingerprint;
use crate::fs::StoredFile;
use crate::naming::{backup_file_name, encode, BackupLabel, Session, Timestamp};
use crate::retention::{self, RotationReport};
use crate::utils::errors::{KeeperError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Suffix of a backup copy still being written; never matches `*.bin`.
const PARTIAL_SUFFIX: &str = ".partial";

/// Save cycle result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Discovery found no slot with state
    NothingToSave,
    Completed(SaveReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub timestamp: Timestamp,
    pub saved: Vec<u32>,
    pub failed: Vec<u32>,
    pub total_bytes: u64,
    pub rotation: RotationReport,
}

impl SaveReport {
    /// At least one slot made it to disk.
    pub fn is_success(&self) -> bool {
        !self.saved.is_empty()
    }
}

impl SaveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SaveOutcome::Completed(report) if report.is_success())
    }
}

/// What kind of backup to take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupRequest {
    /// Interval-driven, default label, skipped when nothing changed
    Scheduled,
    /// Operator-requested point-in-time copy, always taken
    Named(BackupLabel),
}

impl BackupRequest {
    fn label(&self) -> BackupLabel {
        match self {
            BackupRequest::Scheduled => BackupLabel::default(),
            BackupRequest::Named(label) => label.clone(),
        }
    }
}

/// Backup cycle result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// No snapshot of the session exists
    NothingToBackup,
    /// Newest group is identical to the last backup
    Unchanged { timestamp: Timestamp },
    Created(BackupReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub label: BackupLabel,
    pub timestamp: Timestamp,
    pub copied: Vec<String>,
    pub failed: Vec<String>,
    pub rotation: RotationReport,
}

/// Orchestrates save and backup cycles against one storage directory
pub struct SnapshotCoordinator {
    client: LlamaClient,
    storage_dir: PathBuf,
    max_snapshots: usize,
    max_backups: usize,
    max_slots_to_check: u32,
}

impl SnapshotCoordinator {
    pub fn new(client: LlamaClient, config: &Config) -> Self {
        Self {
            client,
            storage_dir: config.storage.dir.clone(),
            max_snapshots: config.retention.max_snapshots,
            max_backups: config.retention.max_backups,
            max_slots_to_check: config.slots.max_slots_to_check,
        }
    }

    pub fn client(&self) -> &LlamaClient {
        &self.client
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Run one save cycle.
    pub async fn save(&self, ctx: &Context) -> SaveOutcome {
        let slots = SlotDiscovery::new(&self.client, self.max_slots_to_check)
            .discover()
            .await;
        if slots.is_empty() {
            info!("No slot holds context, nothing to save");
            return SaveOutcome::NothingToSave;
        }

        let timestamp = Timestamp::now();
        info!(
            "Saving {} slot(s) {:?} at {} for session '{}'",
            slots.len(),
            slots,
            timestamp,
            ctx.session
        );

        let mut saved = Vec::new();
        let mut failed = Vec::new();
        let mut total_bytes = 0u64;

        for slot in slots {
            let filename = encode(&ctx.session, slot, timestamp);
            match self.save_slot(slot, &filename).await {
                Ok(size) => {
                    info!(slot, "Saved {} ({} bytes)", filename, size);
                    saved.push(slot);
                    total_bytes += size;
                }
                Err(e) => {
                    error!(slot, "Failed to save {}: {}", filename, e);
                    failed.push(slot);
                }
            }
        }

        let rotation = self.rotate_snapshots(&ctx.session);

        info!(
            "Save cycle {}: {}/{} slot(s) saved, {} bytes",
            timestamp,
            saved.len(),
            saved.len() + failed.len(),
            total_bytes
        );

        SaveOutcome::Completed(SaveReport {
            timestamp,
            saved,
            failed,
            total_bytes,
            rotation,
        })
    }

    /// Save one slot and confirm the file landed; returns its size.
    async fn save_slot(&self, slot: u32, filename: &str) -> Result<u64> {
        self.client.save_slot(slot, filename).await?;

        // The server's acknowledgement is not enough; the file must exist.
        let path = self.storage_dir.join(filename);
        let size = match StoredFile::from_path(&path) {
            Ok(file) if file.size > 0 => file.size,
            _ => return Err(KeeperError::MissingSnapshot(filename.to_string())),
        };

        // A same-second save rewrites an existing name; its digest is stale.
        if let Err(e) = fingerprint::remove_sidecar(&path) {
            warn!(slot, "Cannot remove stale fingerprint of {}: {}", filename, e);
        }
        Ok(size)
    }

    fn rotate_snapshots(&self, session: &Session) -> RotationReport {
        match Catalog::scan(&self.storage_dir) {
            Ok(catalog) => retention::rotate(catalog.snapshot_files(session), self.max_snapshots),
            Err(e) => {
                warn!("Skipping snapshot rotation, cannot scan storage: {}", e);
                RotationReport::default()
            }
        }
    }

    /// Run one backup cycle.
    ///
    /// Fingerprinting and copying read whole snapshot files, so the work runs
    /// on the blocking pool.
    pub async fn backup(&self, ctx: &Context, request: BackupRequest) -> Result<BackupOutcome> {
        let job = BackupJob {
            storage_dir: self.storage_dir.clone(),
            session: ctx.session.clone(),
            request,
            max_backups: self.max_backups,
        };
        tokio::task::spawn_blocking(move || job.run()).await?
    }
}

/// Backup cycle state moved onto the blocking pool
struct BackupJob {
    storage_dir: PathBuf,
    session: Session,
    request: BackupRequest,
    max_backups: usize,
}

impl BackupJob {
    fn run(self) -> Result<BackupOutcome> {
        let label = self.request.label();
        let catalog = Catalog::scan(&self.storage_dir)?;

        let Some(group) = catalog.latest_snapshot_group(&self.session) else {
            info!("No snapshots for session '{}', nothing to back up", self.session);
            return Ok(BackupOutcome::NothingToBackup);
        };

        let digests = source_digests(&group);

        if self.request == BackupRequest::Scheduled
            && !self.group_changed(&catalog, &label, &group, &digests)
        {
            info!(
                "Snapshot group {} unchanged since last backup, skipping",
                group.timestamp
            );
            return Ok(BackupOutcome::Unchanged {
                timestamp: group.timestamp,
            });
        }

        let mut copied = Vec::new();
        let mut failed = Vec::new();

        for member in &group.members {
            let dest_name = backup_file_name(&label, &member.file.name);
            let dest = self.storage_dir.join(&dest_name);
            match copy_file(&member.file.path, &dest) {
                Ok(bytes) => {
                    if let Some(digest) = digests.get(&member.file.name) {
                        fingerprint::store(&dest, digest);
                    }
                    info!("Backed up {} -> {} ({} bytes)", member.file.name, dest_name, bytes);
                    copied.push(dest_name);
                }
                Err(e) => {
                    error!("Failed to back up {}: {}", member.file.name, e);
                    failed.push(dest_name);
                }
            }
        }

        let rotation = match Catalog::scan(&self.storage_dir) {
            Ok(catalog) => {
                retention::rotate(catalog.backup_files(&self.session, &label), self.max_backups)
            }
            Err(e) => {
                warn!("Skipping backup rotation, cannot scan storage: {}", e);
                RotationReport::default()
            }
        };

        info!(
            "Backup '{}' of group {}: {} file(s) copied, {} failed",
            label,
            group.timestamp,
            copied.len(),
            failed.len()
        );

        Ok(BackupOutcome::Created(BackupReport {
            label,
            timestamp: group.timestamp,
            copied,
            failed,
            rotation,
        }))
    }

    /// True when any slot of `group` has no previous backup, differs from it,
    /// or cannot be compared.
    fn group_changed(
        &self,
        catalog: &Catalog,
        label: &BackupLabel,
        group: &Group,
        digests: &HashMap<String, String>,
    ) -> bool {
        let mut changed = false;

        for member in &group.members {
            let Some(previous) = catalog.latest_backup_for(&self.session, label, member.slot) else {
                debug!("No previous backup for {}", member.file.name);
                changed = true;
                continue;
            };

            let Some(current) = digests.get(&member.file.name) else {
                changed = true;
                continue;
            };

            match fingerprint::fingerprint(&previous.path) {
                Ok(fp) if &fp.digest == current => {}
                Ok(_) => {
                    debug!("{} differs from {}", member.file.name, previous.name);
                    changed = true;
                }
                Err(e) => {
                    warn!("Cannot fingerprint {}: {}", previous.name, e);
                    changed = true;
                }
            }
        }

        changed
    }
}

/// Fingerprints of the group's files, keyed by file name. Files that cannot
/// be fingerprinted are left out.
fn source_digests(group: &Group) -> HashMap<String, String> {
    group
        .members
        .iter()
        .filter_map(|member| match fingerprint::fingerprint(&member.file.path) {
            Ok(fp) => Some((member.file.name.clone(), fp.digest)),
            Err(e) => {
                warn!("Cannot fingerprint {}: {}", member.file.name, e);
                None
            }
        })
        .collect()
}

/// Copy through a `.partial` name so a torn copy never looks like a backup.
fn copy_file(src: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut partial = dest.as_os_str().to_os_string();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let bytes = match std::fs::copy(src, &partial) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
    };
    std::fs::rename(&partial, dest)?;
    // A stale sidecar from an earlier copy under the same name must not
    // outlive the new content.
    fingerprint::remove_sidecar(dest)?;
    Ok(bytes)
}
