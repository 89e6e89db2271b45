//! Capture pipeline
//!
//! Reads public keys from a [`LocalKeySource`] and folds them into the
//! registry as a single batch: one backup and one save, however many keys
//! arrive. Keys that do not parse are reported and skipped. Newly added keys
//! can be given an alias and an expiry as part of the same batch.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::keys::FingerprintId;
use crate::storage::{AddOutcome, RegistryStore};

/// A public-key line and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedLine {
    /// File name or line label used in reports
    pub source: String,
    pub line: String,
}

impl SourcedLine {
    pub fn new(source: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line: line.into(),
        }
    }

    /// Label bare lines by their 1-based position
    pub fn numbered<I, S>(lines: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| Self::new(format!("line {}", i + 1), line))
            .collect()
    }
}

/// A line that could not be captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidKey {
    pub source: String,
    pub reason: String,
}

/// Outcome of one capture batch
///
/// `skipped` holds keys already registered unchanged; `refreshed` holds keys
/// already registered whose comment was updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    pub added: Vec<FingerprintId>,
    pub skipped: Vec<FingerprintId>,
    pub refreshed: Vec<FingerprintId>,
    pub invalid: Vec<InvalidKey>,
}

impl CaptureReport {
    /// Whether the batch changed the registry
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.refreshed.is_empty()
    }
}

/// Metadata recorded on keys the batch adds
///
/// Keys that were already registered keep their existing metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureMetadata {
    /// Only valid when the batch adds at most one key
    pub alias: Option<String>,
    pub expiry: Option<NaiveDate>,
}

impl CaptureMetadata {
    pub fn is_empty(&self) -> bool {
        self.alias.is_none() && self.expiry.is_none()
    }
}

/// Where captured keys come from
pub trait LocalKeySource {
    fn list_public_keys(&self) -> Result<Vec<SourcedLine>>;
}

/// Public keys in an ssh directory (`~/.ssh/*.pub`)
#[derive(Debug, Clone)]
pub struct SshDirectory {
    dir: PathBuf,
    only: Option<Vec<String>>,
}

impl SshDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            only: None,
        }
    }

    /// Restrict the source to the named files
    ///
    /// A name may be a path, a file in the ssh directory, or a key name
    /// without its `.pub` suffix.
    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.only = Some(files.into_iter().map(Into::into).collect());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn all_pub_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "pub") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        // Prefer the public half when given a bare key pair name
        [
            self.dir.join(format!("{name}.pub")),
            self.dir.join(name),
            PathBuf::from(name),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
    }
}

impl LocalKeySource for SshDirectory {
    fn list_public_keys(&self) -> Result<Vec<SourcedLine>> {
        let mut lines = Vec::new();

        let files = match &self.only {
            None => self.all_pub_files()?,
            Some(names) => {
                let mut files = Vec::new();
                for name in names {
                    match self.locate(name) {
                        Some(path) => files.push(path),
                        None => return Err(Error::SystemKeyNotFound(name.clone())),
                    }
                }
                files
            }
        };

        for path in files {
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable key file");
                    continue;
                }
            };
            let keys: Vec<_> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            if keys.is_empty() {
                warn!(file = %path.display(), "Skipping empty key file");
                continue;
            }
            lines.extend(keys.into_iter().map(|line| SourcedLine::new(&source, line)));
        }

        debug!(dir = %self.dir.display(), count = lines.len(), "Listed local public keys");
        Ok(lines)
    }
}

/// Fold a batch of lines into the registry
///
/// If the save fails nothing from the batch is persisted and the error is
/// returned.
pub fn capture(store: &mut RegistryStore, lines: &[SourcedLine]) -> Result<CaptureReport> {
    capture_with(store, lines, &CaptureMetadata::default())
}

/// Like [`capture`], recording `metadata` on every key the batch adds
///
/// An alias for a batch that adds more than one key is rejected before
/// anything is written.
pub fn capture_with(
    store: &mut RegistryStore,
    lines: &[SourcedLine],
    metadata: &CaptureMetadata,
) -> Result<CaptureReport> {
    let now = Utc::now();
    let report = store.transact(|registry| {
        let mut report = CaptureReport::default();
        for SourcedLine { source, line } in lines {
            match registry.add(line, now) {
                Ok(AddOutcome::Inserted(record)) => {
                    report.added.push(record.fingerprint().clone());
                }
                Ok(AddOutcome::Skipped {
                    fingerprint,
                    refreshed: true,
                }) => report.refreshed.push(fingerprint),
                Ok(AddOutcome::Skipped { fingerprint, .. }) => report.skipped.push(fingerprint),
                Err(Error::MalformedKey(e)) => {
                    debug!(source = %source, error = %e, "Invalid key line");
                    report.invalid.push(InvalidKey {
                        source: source.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if metadata.alias.is_some() && report.added.len() > 1 {
            return Err(Error::InvalidInput(format!(
                "an alias can only be given to a single new key, this capture adds {}",
                report.added.len()
            )));
        }
        for fingerprint in &report.added {
            if let Some(alias) = &metadata.alias {
                registry.set_alias(fingerprint, Some(alias.as_str()))?;
            }
            if let Some(expiry) = metadata.expiry {
                registry.set_expiry(fingerprint, expiry)?;
            }
        }
        Ok(report)
    })?;

    info!(
        added = report.added.len(),
        skipped = report.skipped.len(),
        refreshed = report.refreshed.len(),
        invalid = report.invalid.len(),
        "Capture complete"
    );
    Ok(report)
}

/// Capture every key a source offers
pub fn capture_from(
    store: &mut RegistryStore,
    source: &dyn LocalKeySource,
    metadata: &CaptureMetadata,
) -> Result<CaptureReport> {
    let lines = source.list_public_keys()?;
    capture_with(store, &lines, metadata)
}
