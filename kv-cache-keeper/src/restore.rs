//! Restore point listing and selection.
//!
//! Candidates are the session's snapshot groups (newest first), then its
//! backup groups (newest first), then a "skip" entry. A chosen group is
//! restored file by file; each file goes back to the slot encoded in its
//! name, or to the context's default slot for legacy names.

use crate::catalog::{Catalog, Group, GroupKind};
use crate::client::LlamaClient;
use crate::context::Context;
use crate::utils::format::format_bytes;
use std::fmt::Write as _;
use std::io;
use std::path::Path;
use tracing::{error, info};

/// Operator's answer to the restore menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Newest snapshot group, else newest backup group
    Automatic,
    /// Zero-based index into the ordered candidates
    Index(usize),
    Skip,
}

/// Parse a menu answer. Entries are numbered from 1 and the skip entry is
/// `candidates + 1`. Empty input is automatic; anything else unusable is skip.
pub fn parse_selection(input: &str, candidates: usize) -> Selection {
    let input = input.trim();
    if input.is_empty() {
        return Selection::Automatic;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=candidates).contains(&n) => Selection::Index(n - 1),
        _ => Selection::Skip,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreCandidates {
    pub snapshots: Vec<Group>,
    pub backups: Vec<Group>,
}

impl RestoreCandidates {
    pub fn from_catalog(catalog: &Catalog, ctx: &Context) -> Self {
        Self {
            snapshots: catalog.snapshot_groups(&ctx.session),
            backups: catalog.backup_groups(&ctx.session),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len() + self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots first, then backups, each newest first.
    pub fn ordered(&self) -> impl Iterator<Item = &Group> {
        self.snapshots.iter().chain(self.backups.iter())
    }

    pub fn automatic(&self) -> Option<&Group> {
        self.snapshots.first().or_else(|| self.backups.first())
    }

    pub fn resolve(&self, selection: Selection) -> Option<&Group> {
        match selection {
            Selection::Automatic => self.automatic(),
            Selection::Index(i) => self.ordered().nth(i),
            Selection::Skip => None,
        }
    }

    /// Numbered menu, one line per candidate plus the skip entry.
    pub fn render(&self, ctx: &Context) -> String {
        let mut out = format!("Restore points for session '{}':\n", ctx.session);
        for (i, group) in self.ordered().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, describe(group, ctx));
        }
        let _ = writeln!(out, "  {}. Skip restore", self.len() + 1);
        out.push_str("Choose a number (Enter = newest):");
        out
    }
}

/// One-line description of a group for menus and logs.
pub fn describe(group: &Group, ctx: &Context) -> String {
    let kind = match &group.kind {
        GroupKind::Snapshot => "snapshot".to_string(),
        GroupKind::Backup(label) => format!("backup [{label}]"),
    };
    let slots: Vec<String> = group
        .slots()
        .into_iter()
        .map(|slot| match slot {
            Some(slot) => slot.to_string(),
            None => format!("{} (default)", ctx.default_slot),
        })
        .collect();
    format!(
        "{} {} - slots {} ({})",
        kind,
        group.timestamp.as_datetime().format("%Y-%m-%d %H:%M:%S"),
        slots.join(", "),
        format_bytes(group.total_bytes())
    )
}

/// Per-file restore results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub failed: Vec<String>,
}

impl RestoreReport {
    /// At least one file restored.
    pub fn is_success(&self) -> bool {
        !self.restored.is_empty()
    }
}

pub struct RestoreSelector<'a> {
    client: &'a LlamaClient,
    storage_dir: &'a Path,
}

impl<'a> RestoreSelector<'a> {
    pub fn new(client: &'a LlamaClient, storage_dir: &'a Path) -> Self {
        Self {
            client,
            storage_dir,
        }
    }

    pub fn candidates(&self, ctx: &Context) -> io::Result<RestoreCandidates> {
        let catalog = Catalog::scan(self.storage_dir)?;
        Ok(RestoreCandidates::from_catalog(&catalog, ctx))
    }

    /// Restore the newest restore point, if any. `None` means nothing to restore.
    pub async fn restore_automatic(&self, ctx: &Context) -> io::Result<Option<RestoreReport>> {
        let candidates = self.candidates(ctx)?;
        match candidates.automatic() {
            Some(group) => Ok(Some(self.restore(ctx, group).await)),
            None => {
                info!("No restore points for session '{}'", ctx.session);
                Ok(None)
            }
        }
    }

    /// Restore every file of `group`; failures do not block siblings.
    pub async fn restore(&self, ctx: &Context, group: &Group) -> RestoreReport {
        info!("Restoring {}", describe(group, ctx));
        let mut report = RestoreReport::default();

        for member in &group.members {
            let slot = member.slot.unwrap_or(ctx.default_slot);
            match self.client.restore_slot(slot, &member.file.name).await {
                Ok(()) => {
                    info!(slot, "Restored {}", member.file.name);
                    report.restored.push(member.file.name.clone());
                }
                Err(e) => {
                    error!(slot, "Failed to restore {}: {}", member.file.name, e);
                    report.failed.push(member.file.name.clone());
                }
            }
        }

        info!(
            "Restore finished: {}/{} file(s) restored",
            report.restored.len(),
            group.members.len()
        );
        report
    }
}
