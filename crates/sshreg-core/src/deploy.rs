//! Deploy pipeline
//!
//! Appends registry keys to an authorized-keys file. Existing lines are kept
//! byte for byte, keys already present are not duplicated, and the result is
//! read back and verified before reporting success.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::keys::{FingerprintId, find_key_in_line};
use crate::storage::Registry;
use crate::storage::atomic::{
    PRIVATE_DIR_MODE, PRIVATE_FILE_MODE, ensure_dir, read_optional, write_atomic,
};

/// Outcome of a deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub target: PathBuf,
    pub deployed: Vec<FingerprintId>,
    pub already_present: Vec<FingerprintId>,
}

impl DeployReport {
    pub fn changed(&self) -> bool {
        !self.deployed.is_empty()
    }
}

/// Fingerprints of every key found in authorized-keys text
///
/// Lines that hold no recognizable key are ignored.
pub fn present_fingerprints(text: &str) -> HashSet<FingerprintId> {
    text.lines()
        .filter_map(find_key_in_line)
        .map(|parsed| parsed.fingerprint)
        .collect()
}

/// Deploy the selected keys into `target`
pub fn deploy_keys(
    registry: &Registry,
    target: &Path,
    selected: &[FingerprintId],
) -> Result<DeployReport> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for fingerprint in selected {
        if !seen.insert(fingerprint) {
            continue;
        }
        let record = registry
            .get(fingerprint)
            .ok_or_else(|| Error::KeyNotFound(fingerprint.to_string()))?;
        records.push(record);
    }

    let existing = match read_optional(target)? {
        Some(bytes) => String::from_utf8(bytes).map_err(|_| {
            Error::InvalidInput(format!("{} is not valid UTF-8", target.display()))
        })?,
        None => String::new(),
    };
    let present = present_fingerprints(&existing);

    let mut report = DeployReport {
        target: target.to_path_buf(),
        deployed: Vec::new(),
        already_present: Vec::new(),
    };
    let mut appended = String::new();
    for record in &records {
        if present.contains(record.fingerprint()) {
            report.already_present.push(record.fingerprint().clone());
        } else {
            appended.push_str(record.raw_line());
            appended.push('\n');
            report.deployed.push(record.fingerprint().clone());
        }
    }

    if appended.is_empty() {
        debug!(target = %target.display(), "All selected keys already present");
    } else {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent, PRIVATE_DIR_MODE)?;
        }

        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&appended);
        write_atomic(target, content.as_bytes(), PRIVATE_FILE_MODE)?;
    }

    verify(target, &records.iter().map(|r| r.fingerprint()).collect::<Vec<_>>())?;

    info!(
        target = %target.display(),
        deployed = report.deployed.len(),
        already_present = report.already_present.len(),
        "Deploy complete"
    );
    Ok(report)
}

/// Re-read `target` and confirm every fingerprint is in it
fn verify(target: &Path, expected: &[&FingerprintId]) -> Result<()> {
    let text = read_optional(target)?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let present = present_fingerprints(&text);

    let missing: Vec<FingerprintId> = expected
        .iter()
        .filter(|fp| !present.contains(**fp))
        .map(|fp| (*fp).clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::DeployVerificationFailed(missing))
    }
}
