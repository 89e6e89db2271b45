//! Registry model and store
//!
//! [`Registry`] is the in-memory collection of key records. [`RegistryStore`]
//! owns a registry together with its two persisted files:
//!
//! ```text
//! <registry>/
//! ├── authorized_keys     one raw key line per record (mode 0600)
//! ├── key_aliases.json    {"version": 1, "keys": {"SHA256:...": {...}}}
//! └── .key_backups/       snapshots taken before every mutation
//! ```
//!
//! Every mutation goes through [`RegistryStore::transact`], which applies the
//! change to a copy, snapshots the files, and persists both of them. Either the
//! whole change reaches disk or none of it does.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::atomic::{
    PRIVATE_FILE_MODE, SHARED_FILE_MODE, StagedWrite, read_optional, stage, write_atomic,
};
use super::backup::{Backup, BackupManager};
use crate::error::{Error, Result};
use crate::keys::{FingerprintId, KeyMetadata, KeyRecord, ParsedKey};

/// Default key list file name
pub const DEFAULT_KEYS_FILE: &str = "authorized_keys";

/// Default metadata file name
pub const DEFAULT_METADATA_FILE: &str = "key_aliases.json";

/// Default backup directory name
pub const DEFAULT_BACKUP_DIR: &str = ".key_backups";

/// Current metadata file format version
pub const METADATA_VERSION: u32 = 1;

// =============================================================================
// Paths
// =============================================================================

/// Locations of the registry files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths {
    pub root: PathBuf,
    pub keys_file: PathBuf,
    pub metadata_file: PathBuf,
    pub backup_dir: PathBuf,
}

impl RegistryPaths {
    /// Default file names under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_names(root, DEFAULT_KEYS_FILE, DEFAULT_METADATA_FILE, DEFAULT_BACKUP_DIR)
    }

    pub fn with_names(
        root: impl Into<PathBuf>,
        keys_file: &str,
        metadata_file: &str,
        backup_dir: &str,
    ) -> Self {
        let root = root.into();
        Self {
            keys_file: root.join(keys_file),
            metadata_file: root.join(metadata_file),
            backup_dir: root.join(backup_dir),
            root,
        }
    }

    /// Files captured by each backup
    pub fn persisted_files(&self) -> [&Path; 2] {
        [&self.keys_file, &self.metadata_file]
    }
}

// =============================================================================
// Registry
// =============================================================================

/// On-disk layout of the metadata side-table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFile {
    pub version: u32,
    #[serde(default)]
    pub keys: BTreeMap<FingerprintId, KeyMetadata>,
}

/// Result of [`Registry::add`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted(KeyRecord),
    /// The fingerprint was already registered. `refreshed` is set when the
    /// stored line was updated to carry the new comment.
    Skipped {
        fingerprint: FingerprintId,
        refreshed: bool,
    },
}

impl AddOutcome {
    pub fn fingerprint(&self) -> &FingerprintId {
        match self {
            Self::Inserted(record) => record.fingerprint(),
            Self::Skipped { fingerprint, .. } => fingerprint,
        }
    }
}

/// Ordered set of key records, unique by fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    records: Vec<KeyRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted text
    ///
    /// Fails with [`Error::CorruptStore`] rather than dropping anything it
    /// cannot account for.
    pub fn from_persisted(keys_text: &str, metadata: MetadataFile) -> Result<Self> {
        if metadata.version != METADATA_VERSION {
            return Err(Error::CorruptStore(format!(
                "unsupported metadata version {}",
                metadata.version
            )));
        }

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        for (index, line) in keys_text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = KeyRecord::from_line(line).map_err(|e| {
                Error::CorruptStore(format!("key list line {}: {}", index + 1, e))
            })?;
            if !seen.insert(record.fingerprint().clone()) {
                return Err(Error::CorruptStore(format!(
                    "key list line {}: duplicate fingerprint {}",
                    index + 1,
                    record.fingerprint()
                )));
            }
            records.push(record);
        }

        let mut keys = metadata.keys;
        for record in &mut records {
            if let Some(meta) = keys.remove(record.fingerprint()) {
                record.apply_metadata(meta);
            }
        }
        if let Some(orphan) = keys.keys().next() {
            return Err(Error::CorruptStore(format!(
                "metadata references unknown fingerprint {}",
                orphan
            )));
        }

        Ok(Self { records })
    }

    /// Key list text, one line per record with a trailing newline
    pub fn render_keys(&self) -> String {
        self.records
            .iter()
            .map(|r| format!("{}\n", r.raw_line()))
            .collect()
    }

    /// Metadata side-table for the current records
    pub fn metadata(&self) -> MetadataFile {
        let keys = self
            .records
            .iter()
            .map(|r| (r.fingerprint().clone(), r.metadata()))
            .filter(|(_, meta)| !meta.is_empty())
            .collect();
        MetadataFile {
            version: METADATA_VERSION,
            keys,
        }
    }

    pub fn records(&self) -> &[KeyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, fingerprint: &FingerprintId) -> Option<&KeyRecord> {
        self.records.iter().find(|r| r.fingerprint() == fingerprint)
    }

    pub fn contains(&self, fingerprint: &FingerprintId) -> bool {
        self.get(fingerprint).is_some()
    }

    fn get_mut(&mut self, fingerprint: &FingerprintId) -> Result<&mut KeyRecord> {
        self.records
            .iter_mut()
            .find(|r| r.fingerprint() == fingerprint)
            .ok_or_else(|| Error::KeyNotFound(fingerprint.to_string()))
    }

    /// Add a key line, deduplicating by fingerprint
    pub fn add(&mut self, raw_line: &str, now: DateTime<Utc>) -> Result<AddOutcome> {
        let parsed = ParsedKey::parse(raw_line)?;

        let existing = self
            .records
            .iter_mut()
            .find(|r| r.fingerprint() == &parsed.fingerprint);
        if let Some(existing) = existing {
            let refreshed = existing.refresh_line(&parsed, raw_line);
            if refreshed {
                debug!(fingerprint = %parsed.fingerprint, "Key comment refreshed");
            }
            return Ok(AddOutcome::Skipped {
                fingerprint: parsed.fingerprint,
                refreshed,
            });
        }

        let record = KeyRecord::capture(raw_line, now)?;
        self.records.push(record.clone());
        Ok(AddOutcome::Inserted(record))
    }

    /// Set or clear (with `None` or an empty string) a key's alias
    pub fn set_alias(&mut self, fingerprint: &FingerprintId, alias: Option<&str>) -> Result<()> {
        let alias = alias.map(str::trim).filter(|a| !a.is_empty()).map(str::to_string);
        self.get_mut(fingerprint)?.set_alias(alias);
        Ok(())
    }

    pub fn set_expiry(&mut self, fingerprint: &FingerprintId, expiry: NaiveDate) -> Result<()> {
        self.get_mut(fingerprint)?.set_expiry(Some(expiry));
        Ok(())
    }

    pub fn clear_expiry(&mut self, fingerprint: &FingerprintId) -> Result<()> {
        self.get_mut(fingerprint)?.set_expiry(None);
        Ok(())
    }

    /// Remove a record together with its metadata
    pub fn delete(&mut self, fingerprint: &FingerprintId) -> Result<KeyRecord> {
        let index = self
            .records
            .iter()
            .position(|r| r.fingerprint() == fingerprint)
            .ok_or_else(|| Error::KeyNotFound(fingerprint.to_string()))?;
        Ok(self.records.remove(index))
    }

    /// Records whose alias or comment contains `query`, ignoring case
    pub fn find<'a>(&'a self, query: &str) -> impl Iterator<Item = &'a KeyRecord> + use<'a> {
        let query = query.trim().to_lowercase();
        self.records.iter().filter(move |r| r.matches(&query))
    }

    /// Records whose expiry lies before `today`
    pub fn expired(&self, today: NaiveDate) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter().filter(move |r| r.is_expired(today))
    }

    /// Resolve a user-supplied selector
    ///
    /// Tried in order: exact fingerprint, alias (case-insensitive, must be
    /// unique), 1-based position in the listing.
    pub fn resolve(&self, selector: &str) -> Result<&KeyRecord> {
        let selector = selector.trim();

        if let Ok(fingerprint) = selector.parse::<FingerprintId>() {
            if let Some(record) = self.get(&fingerprint) {
                return Ok(record);
            }
        }

        let lower = selector.to_lowercase();
        let mut by_alias = self
            .records
            .iter()
            .filter(|r| r.alias().is_some_and(|a| a.to_lowercase() == lower));
        if let Some(first) = by_alias.next() {
            if by_alias.next().is_some() {
                return Err(Error::InvalidInput(format!(
                    "alias '{}' matches more than one key; use the fingerprint",
                    selector
                )));
            }
            return Ok(first);
        }

        if let Ok(index) = selector.parse::<usize>() {
            if let Some(record) = index.checked_sub(1).and_then(|i| self.records.get(i)) {
                return Ok(record);
            }
        }

        Err(Error::KeyNotFound(selector.to_string()))
    }
}

// =============================================================================
// Store
// =============================================================================

/// A registry bound to its files on disk
#[derive(Debug)]
pub struct RegistryStore {
    paths: RegistryPaths,
    registry: Registry,
    backups: BackupManager,
    last_backup: Option<Backup>,
}

impl RegistryStore {
    /// Load the registry; missing files mean an empty registry
    pub fn load(paths: RegistryPaths) -> Result<Self> {
        let registry = read_registry(&paths)?;
        info!(
            root = %paths.root.display(),
            keys = registry.len(),
            "Registry loaded"
        );
        Ok(Self {
            backups: BackupManager::new(&paths.backup_dir),
            paths,
            registry,
            last_backup: None,
        })
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Snapshot taken by the most recent persisting transaction
    pub fn last_backup(&self) -> Option<&Backup> {
        self.last_backup.as_ref()
    }

    /// Apply a change set as one unit
    ///
    /// The closure runs against a copy. An error from the closure, or a change
    /// set that leaves the registry equal to what it was, never touches disk.
    /// Otherwise exactly one backup is taken and both files are persisted.
    pub fn transact<T>(&mut self, change: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        let mut working = self.registry.clone();
        let value = change(&mut working)?;

        if working == self.registry {
            debug!("No changes to persist");
            return Ok(value);
        }

        let backup = self.backups.snapshot(&self.paths.persisted_files())?;

        if let Err(e) = persist(&self.paths, &self.registry, &working) {
            warn!(error = %e, "Persist failed, reloading registry from disk");
            match read_registry(&self.paths) {
                Ok(on_disk) => self.registry = on_disk,
                Err(reload) => {
                    warn!(error = %reload, "Reload failed, keeping previous in-memory registry")
                }
            }
            return Err(e);
        }

        self.registry = working;
        self.last_backup = Some(backup);
        Ok(value)
    }

    pub fn add(&mut self, raw_line: &str) -> Result<AddOutcome> {
        let now = Utc::now();
        let outcome = self.transact(|registry| registry.add(raw_line, now))?;
        if let AddOutcome::Inserted(record) = &outcome {
            info!(fingerprint = %record.fingerprint(), "Key added");
        }
        Ok(outcome)
    }

    pub fn set_alias(&mut self, fingerprint: &FingerprintId, alias: Option<&str>) -> Result<()> {
        self.transact(|registry| registry.set_alias(fingerprint, alias))?;
        info!(fingerprint = %fingerprint, alias = ?alias, "Alias updated");
        Ok(())
    }

    pub fn set_expiry(&mut self, fingerprint: &FingerprintId, expiry: NaiveDate) -> Result<()> {
        self.transact(|registry| registry.set_expiry(fingerprint, expiry))?;
        info!(fingerprint = %fingerprint, expiry = %expiry, "Expiry set");
        Ok(())
    }

    pub fn clear_expiry(&mut self, fingerprint: &FingerprintId) -> Result<()> {
        self.transact(|registry| registry.clear_expiry(fingerprint))?;
        info!(fingerprint = %fingerprint, "Expiry cleared");
        Ok(())
    }

    pub fn delete(&mut self, fingerprint: &FingerprintId) -> Result<KeyRecord> {
        let record = self.transact(|registry| registry.delete(fingerprint))?;
        info!(fingerprint = %fingerprint, "Key deleted");
        Ok(record)
    }

    pub fn find<'a>(&'a self, query: &str) -> impl Iterator<Item = &'a KeyRecord> + use<'a> {
        self.registry.find(query)
    }

    /// Back up and persist the current state unconditionally
    pub fn save(&mut self) -> Result<Backup> {
        let backup = self.backups.snapshot(&self.paths.persisted_files())?;
        persist(&self.paths, &self.registry, &self.registry)?;
        self.last_backup = Some(backup.clone());
        Ok(backup)
    }

    /// Discard in-memory state and read the files again
    pub fn reload(&mut self) -> Result<()> {
        self.registry = read_registry(&self.paths)?;
        Ok(())
    }
}

fn read_registry(paths: &RegistryPaths) -> Result<Registry> {
    let keys_text = match read_optional(&paths.keys_file)? {
        Some(bytes) => String::from_utf8(bytes).map_err(|_| {
            Error::CorruptStore(format!("{} is not valid UTF-8", paths.keys_file.display()))
        })?,
        None => String::new(),
    };

    let metadata = match read_optional(&paths.metadata_file)? {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            Error::CorruptStore(format!("{}: {}", paths.metadata_file.display(), e))
        })?,
        None => MetadataFile {
            version: METADATA_VERSION,
            keys: BTreeMap::new(),
        },
    };

    Registry::from_persisted(&keys_text, metadata)
}

fn persist_err(path: &Path, e: std::io::Error) -> Error {
    Error::PersistFailed(format!("{}: {}", path.display(), e))
}

/// A staged registry file and the mode its pre-image is restored with
struct PendingWrite {
    staged: StagedWrite,
    mode: u32,
}

impl PendingWrite {
    fn new(target: &Path, contents: &[u8], mode: u32) -> Result<Self> {
        let staged = stage(target, contents, mode).map_err(|e| persist_err(target, e))?;
        Ok(Self { staged, mode })
    }
}

fn restore(target: &Path, before: Option<&[u8]>, mode: u32) {
    let restored = match before {
        Some(bytes) => write_atomic(target, bytes, mode),
        None => fs::remove_file(target),
    };
    if let Err(e) = restored {
        warn!(
            file = %target.display(),
            error = %e,
            "Failed to restore file after persist failure"
        );
    }
}

/// Stage both files, ordered so that the metadata on disk never references a
/// key missing from the key list, even between the two renames
fn stage_registry(
    paths: &RegistryPaths,
    before: &Registry,
    after: &Registry,
) -> Result<[PendingWrite; 2]> {
    let keys_bytes = after.render_keys().into_bytes();
    let mut metadata_bytes = serde_json::to_vec_pretty(&after.metadata())
        .map_err(|e| Error::PersistFailed(format!("cannot encode metadata: {}", e)))?;
    metadata_bytes.push(b'\n');

    if !paths.root.is_dir() {
        fs::create_dir_all(&paths.root).map_err(|e| persist_err(&paths.root, e))?;
    }

    let keys = PendingWrite::new(&paths.keys_file, &keys_bytes, PRIVATE_FILE_MODE)?;
    let metadata = PendingWrite::new(&paths.metadata_file, &metadata_bytes, SHARED_FILE_MODE)?;

    let drops_referenced_key = before
        .metadata()
        .keys
        .keys()
        .any(|fingerprint| !after.contains(fingerprint));
    Ok(if drops_referenced_key {
        [metadata, keys]
    } else {
        [keys, metadata]
    })
}

/// Write both files, rolling the first back if the second cannot land
fn persist(paths: &RegistryPaths, before: &Registry, after: &Registry) -> Result<()> {
    let [first, second] = stage_registry(paths, before, after)?;

    let first_target = first.staged.target().to_path_buf();
    let first_before = read_optional(&first_target).map_err(|e| persist_err(&first_target, e))?;
    first
        .staged
        .commit()
        .map_err(|e| persist_err(&first_target, e))?;

    let second_target = second.staged.target().to_path_buf();
    if let Err(e) = second.staged.commit() {
        restore(&first_target, first_before.as_deref(), first.mode);
        return Err(persist_err(&second_target, e));
    }

    debug!(root = %paths.root.display(), keys = after.len(), "Registry persisted");
    Ok(())
}
