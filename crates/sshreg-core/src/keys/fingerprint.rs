//! Fingerprint engine
//!
//! Canonicalizes a public-key line into a [`FingerprintId`]. The identity is
//! the SHA-256 digest of the decoded key blob, rendered the way
//! `ssh-keygen -lf` prints it (`SHA256:` followed by unpadded base64). The
//! comment never participates, so the same key captured on two machines with
//! different comments dedups to one record.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Prefix of every fingerprint string
pub const FINGERPRINT_PREFIX: &str = "SHA256:";

/// Reasons a line cannot be read as a public key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    #[error("line is empty")]
    Empty,

    #[error("expected '<algorithm> <base64-key> [comment]', found a single token")]
    MissingMaterial,

    #[error("key material is not valid base64: {0}")]
    InvalidEncoding(String),

    #[error("key blob is truncated")]
    TruncatedBlob,

    #[error("declared algorithm '{declared}' does not match encoded algorithm '{embedded}'")]
    AlgorithmMismatch { declared: String, embedded: String },

    #[error("'{0}' is not a fingerprint (expected SHA256:<base64>)")]
    InvalidFingerprint(String),
}

/// Canonical identity of a public key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FingerprintId(String);

impl FingerprintId {
    /// Compute the fingerprint of a decoded key blob
    pub fn from_blob(blob: &[u8]) -> Self {
        let digest = Sha256::digest(blob);
        Self(format!("{}{}", FINGERPRINT_PREFIX, STANDARD_NO_PAD.encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for listings (`SHA256:abcdefgh`)
    pub fn short(&self) -> &str {
        let end = (FINGERPRINT_PREFIX.len() + 8).min(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for FingerprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FingerprintId {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix(FINGERPRINT_PREFIX) {
            Some(body) if !body.is_empty() && STANDARD_NO_PAD.decode(body).is_ok() => {
                Ok(Self(s.to_string()))
            }
            _ => Err(KeyParseError::InvalidFingerprint(s.to_string())),
        }
    }
}

impl TryFrom<String> for FingerprintId {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FingerprintId> for String {
    fn from(value: FingerprintId) -> Self {
        value.0
    }
}

/// A public-key line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub algorithm: String,
    pub material: String,
    pub comment: Option<String>,
    pub fingerprint: FingerprintId,
}

impl ParsedKey {
    /// Parse a line of the form `<algorithm> <base64> [comment]`
    pub fn parse(line: &str) -> Result<Self, KeyParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(KeyParseError::Empty);
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let algorithm = parts.next().unwrap_or_default();
        let rest = parts.next().map(str::trim_start).unwrap_or_default();
        if rest.is_empty() {
            return Err(KeyParseError::MissingMaterial);
        }

        let mut parts = rest.splitn(2, char::is_whitespace);
        let material = parts.next().unwrap_or_default();
        let comment = parts
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let blob = STANDARD
            .decode(material)
            .map_err(|e| KeyParseError::InvalidEncoding(e.to_string()))?;
        let embedded = embedded_algorithm(&blob)?;
        if embedded != algorithm {
            return Err(KeyParseError::AlgorithmMismatch {
                declared: algorithm.to_string(),
                embedded: embedded.to_string(),
            });
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            material: material.to_string(),
            comment,
            fingerprint: FingerprintId::from_blob(&blob),
        })
    }
}

/// Compute the fingerprint of a public-key line
pub fn fingerprint(raw_line: &str) -> Result<FingerprintId, KeyParseError> {
    ParsedKey::parse(raw_line).map(|parsed| parsed.fingerprint)
}

/// Find the key in a line of a foreign authorized-keys file
///
/// Blank lines and `#` comments yield `None`. A leading options field
/// (`from="10.0.0.1",no-pty ssh-ed25519 AAAA...`) is skipped by retrying the
/// parse at each whitespace boundary.
pub fn find_key_in_line(line: &str) -> Option<ParsedKey> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    line.char_indices()
        .filter(|&(i, c)| {
            i == 0 || (!c.is_whitespace() && line[..i].ends_with(char::is_whitespace))
        })
        .find_map(|(i, _)| ParsedKey::parse(&line[i..]).ok())
}

/// Read the length-prefixed algorithm name at the start of an OpenSSH key blob
fn embedded_algorithm(blob: &[u8]) -> Result<&str, KeyParseError> {
    let len_bytes: [u8; 4] = blob
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(KeyParseError::TruncatedBlob)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let name = blob.get(4..4 + len).ok_or(KeyParseError::TruncatedBlob)?;
    std::str::from_utf8(name).map_err(|_| KeyParseError::TruncatedBlob)
}
