//! Custom error types for the cache keeper.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid session name: {0:?}")]
    InvalidSession(String),

    #[error("Snapshot file missing after save: {0}")]
    MissingSnapshot(String),

    #[error("Server unavailable after {attempts} attempts")]
    ServerUnavailable { attempts: u32 },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, KeeperError>;
