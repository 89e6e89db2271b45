//! Backup manager
//!
//! Every mutating persist is preceded by a snapshot of the registry files into
//! `<backup_dir>/<timestamp>[-NN]/`. Snapshots are read-only and are never
//! pruned or restored automatically.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::atomic::{PRIVATE_DIR_MODE, READ_ONLY_MODE, ensure_dir, set_mode};
use crate::error::{Error, Result};

/// Timestamp layout of backup directory names
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Attempts (plain name plus suffixed names) before giving up
pub const MAX_NAME_ATTEMPTS: usize = 32;

/// Name of a backup directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    fn at(now: DateTime<Utc>, attempt: usize) -> Self {
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();
        if attempt == 0 {
            Self(stamp)
        } else {
            Self(format!("{stamp}-{attempt:02}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Time encoded in the name, if it follows the backup naming scheme
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let stamp = self.0.split_once('Z').map(|(stamp, _)| stamp)?;
        NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backup {
    pub id: BackupId,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Creates and lists registry snapshots
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy whichever of `files` currently exist into a new backup
    pub fn snapshot(&self, files: &[&Path]) -> Result<Backup> {
        self.snapshot_at(files, Utc::now())
    }

    pub(crate) fn snapshot_at(&self, files: &[&Path], now: DateTime<Utc>) -> Result<Backup> {
        ensure_dir(&self.dir, PRIVATE_DIR_MODE).map_err(|e| {
            Error::BackupFailed(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let (id, path) = self.create_unique_dir(now)?;

        let mut copied = Vec::new();
        for source in files.iter().filter(|p| p.is_file()) {
            let Some(name) = source.file_name() else {
                continue;
            };
            let dest = path.join(name);
            if let Err(e) = fs::copy(source, &dest).and_then(|_| set_mode(&dest, READ_ONLY_MODE)) {
                if let Err(cleanup) = fs::remove_dir_all(&path) {
                    warn!(backup = %id, error = %cleanup, "Failed to remove partial backup");
                }
                return Err(Error::BackupFailed(format!(
                    "cannot copy {}: {}",
                    source.display(),
                    e
                )));
            }
            copied.push(dest);
        }

        info!(backup = %id, files = copied.len(), "Backup created");
        Ok(Backup {
            id,
            path,
            files: copied,
        })
    }

    fn create_unique_dir(&self, now: DateTime<Utc>) -> Result<(BackupId, PathBuf)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let id = BackupId::at(now, attempt);
            let path = self.dir.join(id.as_str());
            match fs::create_dir(&path) {
                Ok(()) => return Ok((id, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(backup = %id, "Backup name taken, retrying");
                }
                Err(e) => {
                    return Err(Error::BackupFailed(format!(
                        "cannot create {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
        Err(Error::BackupCollision(format!(
            "{} names already taken for {}",
            MAX_NAME_ATTEMPTS,
            BackupId::at(now, 0)
        )))
    }

    /// Existing backups, oldest first
    pub fn list(&self) -> Result<Vec<Backup>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let mut files = fs::read_dir(&path)?
                .map(|f| f.map(|f| f.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            files.sort();
            backups.push(Backup {
                id: BackupId(entry.file_name().to_string_lossy().into_owned()),
                path,
                files,
            });
        }
        backups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(backups)
    }
}
