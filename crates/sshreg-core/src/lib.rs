//! sshreg Core Library
//!
//! This crate provides the core functionality for sshreg, including:
//! - Fingerprinting and parsing of OpenSSH public key lines
//! - The key registry with metadata, persisted as two files in a git repository
//! - Timestamped backups before every change
//! - Capture from the local ssh directory and deploy to authorized-keys files
//! - Local key pair management (list, rename, delete)
//! - Git sync with a public-repository guard
//! - Commands (capture, alias, expiry, delete, deploy, sync, doctor)

pub mod capture;
pub mod commands;
pub mod config;
pub mod deploy;
pub mod error;
pub mod infrastructure;
pub mod keys;
pub mod storage;
pub mod system;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::keys::{FingerprintId, KeyRecord};
    pub use crate::storage::{Registry, RegistryPaths, RegistryStore};
}

#[cfg(test)]
mod error_tests;

#[cfg(test)]
pub(crate) mod test_support {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    /// A well-formed ed25519 key line whose material is 32 copies of `seed`
    pub fn key_line(seed: u8, comment: &str) -> String {
        let algorithm = b"ssh-ed25519";
        let mut blob = Vec::new();
        blob.extend_from_slice(&(algorithm.len() as u32).to_be_bytes());
        blob.extend_from_slice(algorithm);
        blob.extend_from_slice(&32u32.to_be_bytes());
        blob.extend_from_slice(&[seed; 32]);
        format!("ssh-ed25519 {} {}", STANDARD.encode(blob), comment)
    }
}
