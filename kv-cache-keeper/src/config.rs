//! Configuration management for the cache keeper.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! overrides (a `.env` file is honoured). CLI flags are applied last by `main`.

use crate::utils::errors::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the log file written inside the storage directory.
pub const LOG_FILE_NAME: &str = "kv_cache_keeper.log";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub retention: RetentionConfig,
    pub slots: SlotConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Inference server base URL
    pub url: String,

    /// Timeout for slot save/restore calls
    pub request_timeout_secs: u64,

    /// Timeout for slot listing and status queries
    pub query_timeout_secs: u64,

    /// Health probes before giving up at startup
    pub health_retries: u32,

    /// Delay between health probes
    pub health_retry_delay_secs: u64,

    /// Timeout of a single health probe
    pub health_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding snapshots, backups and sidecars.
    /// Must be the server's slot save path.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub save_interval_secs: u64,
    pub backup_interval_secs: u64,

    /// Control loop cadence
    pub tick_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Live snapshot files kept per session
    pub max_snapshots: usize,

    /// Backup files kept per session and label
    pub max_backups: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    /// Slot used when a file name carries no slot id
    pub default_slot: u32,

    /// Probe range when the server cannot list its slots
    pub max_slots_to_check: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed session name; skips the interactive picker
    pub name: Option<String>,

    /// How long interactive prompts wait before the automatic choice
    pub selection_timeout_secs: u64,

    /// Restore the newest restore point once the server is healthy
    pub restore_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Also append logs to `kv_cache_keeper.log` in the storage directory
    pub to_file: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            request_timeout_secs: 300,
            query_timeout_secs: 10,
            health_retries: 30,
            health_retry_delay_secs: 2,
            health_timeout_secs: 5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            dir: home.join("kv_cache"),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: 60,
            backup_interval_secs: 3600,
            tick_millis: 1000,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 10,
            max_backups: 5,
        }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            default_slot: 0,
            max_slots_to_check: 8,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: None,
            selection_timeout_secs: 30,
            restore_on_start: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_file: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment (and `.env`, if present).
    pub fn apply_env(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv();
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LLAMA_URL") {
            self.server.url = v;
        }
        if let Some(v) = lookup("KV_SAVE_DIR") {
            self.storage.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KV_BASE_NAME") {
            if !v.trim().is_empty() {
                self.session.name = Some(v.trim().to_string());
            }
        }
        if let Some(v) = lookup("KV_LOG_LEVEL") {
            self.log.level = v;
        }
        parse_into(&lookup, "KV_SAVE_INTERVAL", &mut self.schedule.save_interval_secs)?;
        parse_into(&lookup, "KV_BACKUP_INTERVAL", &mut self.schedule.backup_interval_secs)?;
        parse_into(&lookup, "KV_MAX_FILES", &mut self.retention.max_snapshots)?;
        parse_into(&lookup, "KV_MAX_BACKUPS", &mut self.retention.max_backups)?;
        parse_into(&lookup, "LLAMA_SLOT_ID", &mut self.slots.default_slot)?;
        parse_into(&lookup, "KV_MAX_SLOTS_TO_CHECK", &mut self.slots.max_slots_to_check)?;
        parse_into(&lookup, "KV_SELECTION_TIMEOUT", &mut self.session.selection_timeout_secs)?;
        Ok(())
    }

    /// Reject values the keeper cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.url.trim().is_empty() {
            return Err(KeeperError::Config("server.url must not be empty".into()));
        }
        if self.schedule.save_interval_secs == 0 || self.schedule.backup_interval_secs == 0 {
            return Err(KeeperError::Config("schedule intervals must be nonzero".into()));
        }
        if self.schedule.tick_millis == 0 {
            return Err(KeeperError::Config("schedule.tick_millis must be nonzero".into()));
        }
        if self.retention.max_snapshots == 0 || self.retention.max_backups == 0 {
            return Err(KeeperError::Config("retention caps must be at least 1".into()));
        }
        Ok(())
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.storage.dir.join(LOG_FILE_NAME)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.save_interval_secs)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.backup_interval_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.schedule.tick_millis)
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.session.selection_timeout_secs)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| KeeperError::Config(format!("{key}: cannot parse {raw:?}")))?;
    }
    Ok(())
}
