//! Session-scoped view of the storage directory.
//!
//! A [`Catalog`] is one scan of the directory. Snapshot groups (all files of
//! one session sharing a timestamp) are derived from file names on demand and
//! never stored.

use crate::fs::{scan_storage, StoredFile};
use crate::naming::{BackupLabel, BackupName, Session, SnapshotName, Timestamp};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// One file of a group and the slot it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    /// `None` for legacy files without a slot component
    pub slot: Option<u32>,
    pub file: StoredFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKind {
    Snapshot,
    Backup(BackupLabel),
}

/// Files of one session sharing a timestamp, ordered by slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub kind: GroupKind,
    pub timestamp: Timestamp,
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn slots(&self) -> Vec<Option<u32>> {
        self.members.iter().map(|m| m.slot).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.members.iter().map(|m| m.file.size).sum()
    }

    fn newest_mtime(&self) -> Option<SystemTime> {
        self.members.iter().map(|m| m.file.modified).max()
    }
}

/// A session found on disk, for the startup picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub name: String,
    pub files: usize,
    pub last_modified: SystemTime,
}

pub struct Catalog {
    files: Vec<StoredFile>,
}

impl Catalog {
    pub fn scan(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            files: scan_storage(dir)?,
        })
    }

    pub fn snapshots<'a>(
        &'a self,
        session: &'a Session,
    ) -> impl Iterator<Item = (SnapshotName, &'a StoredFile)> + 'a {
        self.files
            .iter()
            .filter_map(move |f| SnapshotName::parse_for(session, &f.name).map(|n| (n, f)))
    }

    /// Backups of `session`; all labels when `label` is `None`.
    pub fn backups<'a>(
        &'a self,
        session: &'a Session,
        label: Option<&'a BackupLabel>,
    ) -> impl Iterator<Item = (BackupName, &'a StoredFile)> + 'a {
        self.files.iter().filter_map(move |f| {
            BackupName::parse_for(session, &f.name)
                .filter(|n| label.map_or(true, |l| &n.label == l))
                .map(|n| (n, f))
        })
    }

    /// Snapshot files of `session`, the rotation scope for snapshots.
    pub fn snapshot_files(&self, session: &Session) -> Vec<StoredFile> {
        self.snapshots(session).map(|(_, f)| f.clone()).collect()
    }

    /// Backup files of `session` under `label`, the rotation scope for backups.
    pub fn backup_files(&self, session: &Session, label: &BackupLabel) -> Vec<StoredFile> {
        self.backups(session, Some(label)).map(|(_, f)| f.clone()).collect()
    }

    /// Snapshot groups of `session`, newest first.
    pub fn snapshot_groups(&self, session: &Session) -> Vec<Group> {
        let mut by_ts: BTreeMap<Timestamp, Vec<GroupMember>> = BTreeMap::new();
        for (name, file) in self.snapshots(session) {
            by_ts.entry(name.timestamp).or_default().push(GroupMember {
                slot: name.slot,
                file: file.clone(),
            });
        }

        let mut groups: Vec<Group> = by_ts
            .into_iter()
            .map(|(timestamp, members)| build_group(GroupKind::Snapshot, timestamp, members))
            .collect();
        sort_newest_first(&mut groups);
        groups
    }

    /// Backup groups of `session`, keyed by (timestamp, label), newest first.
    pub fn backup_groups(&self, session: &Session) -> Vec<Group> {
        let mut by_key: BTreeMap<(Timestamp, BackupLabel), Vec<GroupMember>> = BTreeMap::new();
        for (name, file) in self.backups(session, None) {
            by_key
                .entry((name.snapshot.timestamp, name.label))
                .or_default()
                .push(GroupMember {
                    slot: name.snapshot.slot,
                    file: file.clone(),
                });
        }

        let mut groups: Vec<Group> = by_key
            .into_iter()
            .map(|((timestamp, label), members)| {
                build_group(GroupKind::Backup(label), timestamp, members)
            })
            .collect();
        sort_newest_first(&mut groups);
        groups
    }

    pub fn latest_snapshot_group(&self, session: &Session) -> Option<Group> {
        self.snapshot_groups(session).into_iter().next()
    }

    /// Most recently written backup of `slot` under `label`.
    pub fn latest_backup_for(
        &self,
        session: &Session,
        label: &BackupLabel,
        slot: Option<u32>,
    ) -> Option<StoredFile> {
        self.backups(session, Some(label))
            .filter(|(name, _)| name.snapshot.slot == slot)
            .max_by(|(an, af), (bn, bf)| {
                af.modified
                    .cmp(&bf.modified)
                    .then_with(|| an.snapshot.timestamp.cmp(&bn.snapshot.timestamp))
            })
            .map(|(_, f)| f.clone())
    }

    /// Sessions present on disk, most recently active first.
    ///
    /// A backup file `{label}_{session}_...` decodes as a snapshot of the
    /// session `{label}_{session}`; when `{session}` is itself known, the
    /// file is counted under `{session}` instead.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let decoded: Vec<(String, &StoredFile)> = self
            .files
            .iter()
            .filter_map(|f| SnapshotName::parse(&f.name).map(|n| (n.session, f)))
            .collect();

        let mut raw: HashMap<&str, (usize, SystemTime)> = HashMap::new();
        for (session, file) in &decoded {
            let entry = raw.entry(session.as_str()).or_insert((0, SystemTime::UNIX_EPOCH));
            entry.0 += 1;
            entry.1 = entry.1.max(file.modified);
        }

        let mut folded: HashMap<String, (usize, SystemTime)> = HashMap::new();
        for (session, (count, newest)) in &raw {
            let owner = session
                .split_once('_')
                .filter(|(label, rest)| BackupLabel::new(label).is_some() && raw.contains_key(rest))
                .map(|(_, rest)| rest)
                .unwrap_or(*session);
            let entry = folded
                .entry(owner.to_string())
                .or_insert((0, SystemTime::UNIX_EPOCH));
            entry.0 += count;
            entry.1 = entry.1.max(*newest);
        }

        let mut sessions: Vec<SessionSummary> = folded
            .into_iter()
            .map(|(name, (files, last_modified))| SessionSummary {
                name,
                files,
                last_modified,
            })
            .collect();
        sessions.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.name.cmp(&b.name))
        });
        sessions
    }
}

fn build_group(kind: GroupKind, timestamp: Timestamp, mut members: Vec<GroupMember>) -> Group {
    members.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.file.name.cmp(&b.file.name)));
    Group {
        kind,
        timestamp,
        members,
    }
}

/// Newest encoded timestamp first; file mtime breaks ties.
fn sort_newest_first(groups: &mut [Group]) {
    groups.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.newest_mtime().cmp(&a.newest_mtime()))
    });
}
