//! Error types for sshreg

use thiserror::Error;

use crate::keys::{FingerprintId, KeyParseError};

/// Result type alias using sshreg's Error
pub type Result<T> = std::result::Result<T, Error>;

/// sshreg error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Key errors (E001-E099)
    #[error("Malformed key: {0}")]
    MalformedKey(#[from] KeyParseError),

    #[error("Key '{0}' not found. Run `sshreg list` to see registered keys.")]
    KeyNotFound(String),

    #[error("System key '{0}' not found. Run `sshreg system list` to see local keys.")]
    SystemKeyNotFound(String),

    #[error("Name collision: '{0}' already exists")]
    NameCollision(String),

    // Store errors (E100-E199)
    #[error("Registry is corrupt: {0}. Fix the file by hand or restore from .key_backups.")]
    CorruptStore(String),

    #[error("Failed to persist registry: {0}")]
    PersistFailed(String),

    #[error("Backup name collision: {0}")]
    BackupCollision(String),

    #[error("Backup failed: {0}. The registry was not modified.")]
    BackupFailed(String),

    // Deploy errors (E200-E299)
    #[error("Deploy verification failed, missing from target: {}", join_fingerprints(.0))]
    DeployVerificationFailed(Vec<FingerprintId>),

    // Sync errors (E300-E399)
    #[error("Sync failed: {0}")]
    SyncFailed(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedKey(_) => "E001",
            Self::KeyNotFound(_) => "E002",
            Self::SystemKeyNotFound(_) => "E003",
            Self::NameCollision(_) => "E004",
            Self::CorruptStore(_) => "E100",
            Self::PersistFailed(_) => "E101",
            Self::BackupCollision(_) => "E102",
            Self::BackupFailed(_) => "E103",
            Self::DeployVerificationFailed(_) => "E200",
            Self::SyncFailed(_) => "E300",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::KeyNotFound(_) => Some("sshreg list".to_string()),
            Self::SystemKeyNotFound(_) => Some("sshreg system list".to_string()),
            Self::CorruptStore(_) => Some("sshreg backups".to_string()),
            Self::SyncFailed(_) => Some("git status".to_string()),
            Self::ConfigError(_) => Some("sshreg config list".to_string()),
            _ => None,
        }
    }
}

fn join_fingerprints(fingerprints: &[FingerprintId]) -> String {
    fingerprints
        .iter()
        .map(FingerprintId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
