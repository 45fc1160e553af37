//! File naming for snapshots and backups.
//!
//! Snapshot files are named `{session}_slot{slot}_{timestamp}.bin`, backups
//! are the same name behind a `{label}_` prefix. Timestamps are fixed-width
//! `%Y%m%d%H%M%S`, so lexicographic order is chronological order.
//!
//! Decoding never fails loudly: a name that does not fit the scheme yields
//! `None` and is ignored by every caller.

use crate::utils::errors::{KeeperError, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use std::fmt;

pub const SNAPSHOT_EXTENSION: &str = ".bin";
pub const DEFAULT_BACKUP_LABEL: &str = "backup";
pub const DEFAULT_SESSION: &str = "session";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;
const SLOT_MARKER: &str = "_slot";

/// Second-resolution wall-clock time shared by every file of one save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    pub fn now() -> Self {
        let now = Local::now().naive_local();
        Self(now.with_nanosecond(0).unwrap_or(now))
    }

    /// Parse the 14-digit encoded form.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != TIMESTAMP_LEN || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .ok()
            .map(Self)
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

/// Validated session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session(String);

impl Session {
    /// Accepts ASCII letters, digits, `_`, `-` and `.`, not starting with `.`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if valid {
            Ok(Self(name))
        } else {
            Err(KeeperError::InvalidSession(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Glob-style pattern of this session's snapshot files, for display.
    pub fn pattern(&self) -> String {
        format!("{}_*{}", self.0, SNAPSHOT_EXTENSION)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self(DEFAULT_SESSION.to_string())
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded snapshot file name.
///
/// `slot` is `None` for legacy single-slot files (`{session}_{timestamp}.bin`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
    pub session: String,
    pub slot: Option<u32>,
    pub timestamp: Timestamp,
}

impl SnapshotName {
    pub fn new(session: &Session, slot: u32, timestamp: Timestamp) -> Self {
        Self {
            session: session.as_str().to_string(),
            slot: Some(slot),
            timestamp,
        }
    }

    pub fn file_name(&self) -> String {
        match self.slot {
            Some(slot) => format!(
                "{}{}{}_{}{}",
                self.session, SLOT_MARKER, slot, self.timestamp, SNAPSHOT_EXTENSION
            ),
            None => format!("{}_{}{}", self.session, self.timestamp, SNAPSHOT_EXTENSION),
        }
    }

    /// Decode any snapshot-shaped name, whatever its session.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(SNAPSHOT_EXTENSION)?;
        let (head, raw_ts) = stem.rsplit_once('_')?;
        let timestamp = Timestamp::parse(raw_ts)?;

        if let Some((session, raw_slot)) = head.rsplit_once(SLOT_MARKER) {
            if !session.is_empty()
                && !raw_slot.is_empty()
                && raw_slot.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(slot) = raw_slot.parse() {
                    return Some(Self {
                        session: session.to_string(),
                        slot: Some(slot),
                        timestamp,
                    });
                }
            }
        }

        if head.is_empty() {
            return None;
        }
        Some(Self {
            session: head.to_string(),
            slot: None,
            timestamp,
        })
    }

    /// Decode a name only if it belongs to `session`.
    pub fn parse_for(session: &Session, file_name: &str) -> Option<Self> {
        Self::parse(file_name).filter(|name| name.session == session.as_str())
    }
}

/// Encode `(session, slot, timestamp)` into a snapshot file name.
pub fn encode(session: &Session, slot: u32, timestamp: Timestamp) -> String {
    SnapshotName::new(session, slot, timestamp).file_name()
}

/// Inverse of [`encode`] for one session: `(slot, timestamp)` or `None`.
pub fn decode(session: &Session, file_name: &str) -> Option<(Option<u32>, Timestamp)> {
    SnapshotName::parse_for(session, file_name).map(|name| (name.slot, name.timestamp))
}

/// Backup label, `[A-Za-z0-9-]+`. Underscores are excluded so the label
/// prefix can always be split off unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackupLabel(String);

impl BackupLabel {
    pub fn new(label: &str) -> Option<Self> {
        let valid = !label.is_empty()
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then(|| Self(label.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_BACKUP_LABEL
    }
}

impl Default for BackupLabel {
    fn default() -> Self {
        Self(DEFAULT_BACKUP_LABEL.to_string())
    }
}

impl fmt::Display for BackupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded backup file name: a label in front of a snapshot name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupName {
    pub label: BackupLabel,
    pub snapshot: SnapshotName,
}

impl BackupName {
    pub fn file_name(&self) -> String {
        backup_file_name(&self.label, &self.snapshot.file_name())
    }

    /// Decode a backup name belonging to `session`: split off the label,
    /// then hand the remainder to the snapshot decoder.
    pub fn parse_for(session: &Session, file_name: &str) -> Option<Self> {
        let (raw_label, rest) = file_name.split_once('_')?;
        let label = BackupLabel::new(raw_label)?;
        let snapshot = SnapshotName::parse_for(session, rest)?;
        Some(Self { label, snapshot })
    }
}

/// Name of the backup copy of `snapshot_file_name` under `label`.
pub fn backup_file_name(label: &BackupLabel, snapshot_file_name: &str) -> String {
    format!("{}_{}", label, snapshot_file_name)
}
