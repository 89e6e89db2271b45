//! Registry key commands
//!
//! Capture, listing, alias/expiry edits, deletion and clipboard copy.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use super::{Outcome, Workspace};
use crate::capture::{CaptureMetadata, CaptureReport, SshDirectory, capture_from};
use crate::error::{Error, Result};
use crate::infrastructure::Clipboard;
use crate::keys::{FingerprintId, KeyRecord};
use crate::storage::Registry;

/// A record with its 1-based position in the full listing
pub type Listed<'a> = (usize, &'a KeyRecord);

/// Result of copying a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyOutcome {
    pub text: String,
    /// `false` when no clipboard was available and the caller should show the text
    pub copied: bool,
}

/// Capture keys from the ssh directory, optionally only the named files
pub fn capture(ws: &mut Workspace, files: &[String]) -> Result<Outcome<CaptureReport>> {
    capture_with(ws, files, &CaptureMetadata::default())
}

/// Capture keys and record an alias and/or expiry on the ones added
pub fn capture_with(
    ws: &mut Workspace,
    files: &[String],
    metadata: &CaptureMetadata,
) -> Result<Outcome<CaptureReport>> {
    let mut source = SshDirectory::new(ws.ssh_dir());
    if !files.is_empty() {
        source = source.with_files(files.iter().cloned());
    }

    let report = capture_from(ws.store_mut(), &source, metadata)?;
    let changed = report.changed();
    let backup = ws.backup_if(changed);

    let sync = if changed {
        let registry = ws.store().registry();
        let mut parts = Vec::new();
        if !report.added.is_empty() {
            parts.push(format!("Added keys: {}", names(registry, &report.added)));
        }
        if !report.refreshed.is_empty() {
            parts.push(format!("Updated keys: {}", names(registry, &report.refreshed)));
        }
        let message = parts.join("; ");
        ws.after_change(&message)
    } else {
        Default::default()
    };

    Ok(Outcome {
        result: report,
        backup,
        sync,
    })
}

/// Records in listing order, optionally only the expired ones
pub fn list(registry: &Registry, expired_only: bool, today: NaiveDate) -> Vec<Listed<'_>> {
    registry
        .records()
        .iter()
        .enumerate()
        .map(|(i, record)| (i + 1, record))
        .filter(|(_, record)| !expired_only || record.is_expired(today))
        .collect()
}

/// Records matching `query`, with their listing positions
pub fn search<'a>(registry: &'a Registry, query: &str) -> Vec<Listed<'a>> {
    let query = query.trim().to_lowercase();
    registry
        .records()
        .iter()
        .enumerate()
        .map(|(i, record)| (i + 1, record))
        .filter(|(_, record)| record.matches(&query))
        .collect()
}

/// Set or clear the alias of the selected key
pub fn set_alias(
    ws: &mut Workspace,
    selector: &str,
    alias: Option<&str>,
) -> Result<Outcome<KeyRecord>> {
    let fingerprint = resolve(ws, selector)?;
    let before = ws.store().registry().get(&fingerprint).cloned();
    ws.store_mut().set_alias(&fingerprint, alias)?;
    let record = current(ws, &fingerprint)?;
    let changed = before.as_ref() != Some(&record);

    let message = match record.alias() {
        Some(alias) => format!("Set alias for key: {}", alias),
        None => format!("Cleared alias for key: {}", record.display_name()),
    };
    finish(ws, record, changed, &message)
}

/// Set (`Some`) or clear (`None`) the expiry of the selected key
pub fn set_expiry(
    ws: &mut Workspace,
    selector: &str,
    expiry: Option<NaiveDate>,
) -> Result<Outcome<KeyRecord>> {
    let fingerprint = resolve(ws, selector)?;
    let before = ws.store().registry().get(&fingerprint).cloned();
    match expiry {
        Some(date) => ws.store_mut().set_expiry(&fingerprint, date)?,
        None => ws.store_mut().clear_expiry(&fingerprint)?,
    }
    let record = current(ws, &fingerprint)?;
    let changed = before.as_ref() != Some(&record);

    let message = match expiry {
        Some(date) => format!("Set expiry {} for key: {}", date, record.display_name()),
        None => format!("Cleared expiry for key: {}", record.display_name()),
    };
    finish(ws, record, changed, &message)
}

/// Records the selectors refer to, without changing anything
pub fn preview_delete(ws: &Workspace, selectors: &[String]) -> Result<Vec<KeyRecord>> {
    let registry = ws.store().registry();
    let fingerprints = resolve_all(registry, selectors)?;
    Ok(fingerprints
        .iter()
        .filter_map(|fp| registry.get(fp).cloned())
        .collect())
}

/// Delete the selected keys as one change
pub fn delete(ws: &mut Workspace, selectors: &[String]) -> Result<Outcome<Vec<KeyRecord>>> {
    let fingerprints = resolve_all(ws.store().registry(), selectors)?;
    let removed = ws.store_mut().transact(|registry| {
        fingerprints
            .iter()
            .map(|fp| registry.delete(fp))
            .collect::<Result<Vec<_>>>()
    })?;
    info!(count = removed.len(), "Keys deleted");

    let backup = ws.backup_if(!removed.is_empty());
    let message = format!(
        "Deleted keys: {}",
        removed
            .iter()
            .map(KeyRecord::display_name)
            .collect::<Vec<_>>()
            .join(", ")
    );
    let sync = ws.after_change(&message);
    Ok(Outcome {
        result: removed,
        backup,
        sync,
    })
}

/// Put the raw line of the selected key on the clipboard
pub fn copy(ws: &Workspace, selector: &str, clipboard: &dyn Clipboard) -> Result<CopyOutcome> {
    let record = ws.store().registry().resolve(selector)?;
    let text = record.raw_line().to_string();
    let copied = clipboard.copy(&text);
    Ok(CopyOutcome { text, copied })
}

/// Resolve selectors to fingerprints, dropping repeats
pub fn resolve_all(registry: &Registry, selectors: &[String]) -> Result<Vec<FingerprintId>> {
    if selectors.is_empty() {
        return Err(Error::InvalidInput("no keys selected".to_string()));
    }
    let mut seen = HashSet::new();
    let mut fingerprints = Vec::new();
    for selector in selectors {
        let fp = registry.resolve(selector)?.fingerprint().clone();
        if seen.insert(fp.clone()) {
            fingerprints.push(fp);
        }
    }
    Ok(fingerprints)
}

fn resolve(ws: &Workspace, selector: &str) -> Result<FingerprintId> {
    Ok(ws.store().registry().resolve(selector)?.fingerprint().clone())
}

fn current(ws: &Workspace, fingerprint: &FingerprintId) -> Result<KeyRecord> {
    ws.store()
        .registry()
        .get(fingerprint)
        .cloned()
        .ok_or_else(|| Error::KeyNotFound(fingerprint.to_string()))
}

fn finish(
    ws: &mut Workspace,
    record: KeyRecord,
    changed: bool,
    message: &str,
) -> Result<Outcome<KeyRecord>> {
    let backup = ws.backup_if(changed);
    let sync = if changed {
        ws.after_change(message)
    } else {
        Default::default()
    };
    Ok(Outcome {
        result: record,
        backup,
        sync,
    })
}

fn names(registry: &Registry, fingerprints: &[FingerprintId]) -> String {
    fingerprints
        .iter()
        .map(|fp| {
            registry
                .get(fp)
                .map(KeyRecord::display_name)
                .unwrap_or_else(|| fp.short())
        })
        .collect::<Vec<_>>()
        .join(", ")
}
