//! Storage layer - registry files, atomic writes and backups
//!
//! # Architecture
//!
//! - `atomic`: temp-file-and-rename writes with explicit permissions
//! - `backup`: timestamped read-only snapshots taken before each mutation
//! - `registry`: the key registry and its two-file persistence
//!
//! # Usage
//!
//! ```ignore
//! use sshreg_core::storage::{RegistryPaths, RegistryStore};
//!
//! let mut store = RegistryStore::load(RegistryPaths::new("."))?;
//! let outcome = store.add("ssh-ed25519 AAAA... alice@host")?;
//! ```

pub mod atomic;
pub mod backup;
pub mod registry;

pub use backup::{Backup, BackupId, BackupManager};
pub use registry::{
    AddOutcome, DEFAULT_BACKUP_DIR, DEFAULT_KEYS_FILE, DEFAULT_METADATA_FILE, METADATA_VERSION,
    MetadataFile, Registry, RegistryPaths, RegistryStore,
};
