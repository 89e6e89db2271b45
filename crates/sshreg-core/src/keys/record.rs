//! Key record model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::fingerprint::{FingerprintId, KeyParseError, ParsedKey};

/// Mutable metadata attached to a key, persisted in the metadata side-table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

impl KeyMetadata {
    pub fn is_empty(&self) -> bool {
        self.alias.is_none() && self.expiry.is_none() && self.added_at.is_none()
    }
}

/// One public key in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRecord {
    raw_line: String,
    fingerprint: FingerprintId,
    #[serde(skip)]
    comment: Option<String>,
    alias: Option<String>,
    expiry: Option<NaiveDate>,
    added_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// Create a record for a freshly captured key
    pub fn capture(raw_line: &str, now: DateTime<Utc>) -> Result<Self, KeyParseError> {
        let mut record = Self::from_line(raw_line)?;
        record.added_at = Some(now);
        Ok(record)
    }

    /// Build a record from a stored line with no metadata yet
    pub(crate) fn from_line(raw_line: &str) -> Result<Self, KeyParseError> {
        let parsed = ParsedKey::parse(raw_line)?;
        Ok(Self {
            raw_line: raw_line.trim().to_string(),
            fingerprint: parsed.fingerprint,
            comment: parsed.comment,
            alias: None,
            expiry: None,
            added_at: None,
        })
    }

    pub fn raw_line(&self) -> &str {
        &self.raw_line
    }

    pub fn fingerprint(&self) -> &FingerprintId {
        &self.fingerprint
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn expiry(&self) -> Option<NaiveDate> {
        self.expiry
    }

    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        self.added_at
    }

    /// Key algorithm, e.g. `ssh-ed25519`
    pub fn algorithm(&self) -> &str {
        self.raw_line.split_whitespace().next().unwrap_or_default()
    }

    /// Trailing comment of the raw line, if any
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Label for listings: alias, then comment, then short fingerprint
    pub fn display_name(&self) -> &str {
        self.alias()
            .or_else(|| self.comment())
            .unwrap_or_else(|| self.fingerprint.short())
    }

    /// A key is expired once its expiry date lies strictly before `today`
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry.is_some_and(|expiry| expiry < today)
    }

    /// Case-insensitive substring match over alias and comment
    pub fn matches(&self, query_lower: &str) -> bool {
        let hit = |s: Option<&str>| s.is_some_and(|s| s.to_lowercase().contains(query_lower));
        query_lower.is_empty() || hit(self.alias()) || hit(self.comment())
    }

    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            alias: self.alias.clone(),
            expiry: self.expiry,
            added_at: self.added_at,
        }
    }

    pub(crate) fn apply_metadata(&mut self, metadata: KeyMetadata) {
        self.alias = metadata.alias;
        self.expiry = metadata.expiry;
        self.added_at = metadata.added_at;
    }

    pub(crate) fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    pub(crate) fn set_expiry(&mut self, expiry: Option<NaiveDate>) {
        self.expiry = expiry;
    }

    /// Replace the stored line when the same key arrives with another comment
    ///
    /// Returns `true` when the comment changed. Whitespace differences alone
    /// leave the record untouched and identity is never altered.
    pub(crate) fn refresh_line(&mut self, parsed: &ParsedKey, raw_line: &str) -> bool {
        debug_assert_eq!(parsed.fingerprint, self.fingerprint);
        if self.comment == parsed.comment {
            return false;
        }
        self.raw_line = raw_line.trim().to_string();
        self.comment = parsed.comment.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHL2n6lAaOHvNSdsihNLoJ0s3Od7SzDYN14IJSbzp8w9 alice@host";

    #[test]
    fn test_capture_sets_added_at() {
        let now = Utc::now();
        let record = KeyRecord::capture(LINE, now).unwrap();
        assert_eq!(record.added_at(), Some(now));
        assert_eq!(record.algorithm(), "ssh-ed25519");
        assert_eq!(record.comment(), Some("alice@host"));
        assert_eq!(record.display_name(), "alice@host");
    }

    #[test]
    fn test_display_name_prefers_alias() {
        let mut record = KeyRecord::capture(LINE, Utc::now()).unwrap();
        record.set_alias(Some("work laptop".to_string()));
        assert_eq!(record.display_name(), "work laptop");
    }

    #[test]
    fn test_display_name_without_comment() {
        let line = LINE.replace(" alice@host", "");
        let record = KeyRecord::capture(&line, Utc::now()).unwrap();
        assert_eq!(record.comment(), None);
        assert_eq!(record.display_name(), "SHA256:UgRsC2XY");
    }

    #[test]
    fn test_expiry_is_exclusive_of_today() {
        let mut record = KeyRecord::capture(LINE, Utc::now()).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(!record.is_expired(today));

        record.set_expiry(NaiveDate::from_ymd_opt(2025, 6, 1));
        assert!(!record.is_expired(today));

        record.set_expiry(NaiveDate::from_ymd_opt(2025, 5, 31));
        assert!(record.is_expired(today));
    }

    #[test]
    fn test_matches_alias_and_comment() {
        let mut record = KeyRecord::capture(LINE, Utc::now()).unwrap();
        record.set_alias(Some("Build Server".to_string()));
        assert!(record.matches("build"));
        assert!(record.matches("alice"));
        assert!(record.matches(""));
        assert!(!record.matches("ssh-ed25519"));
    }

    #[test]
    fn test_comment_survives_irregular_spacing() {
        let spaced = LINE.replacen(' ', "  ", 1);
        let tabbed = LINE.replace(' ', "\t");
        for line in [spaced.as_str(), tabbed.as_str()] {
            let record = KeyRecord::capture(line, Utc::now()).unwrap();
            assert_eq!(record.comment(), Some("alice@host"));
            assert_eq!(record.display_name(), "alice@host");
            assert!(!record.matches("aaaa"));
        }
    }

    #[test]
    fn test_refresh_ignores_whitespace_only_changes() {
        let mut record = KeyRecord::capture(&LINE.replacen(' ', "  ", 1), Utc::now()).unwrap();
        let parsed = ParsedKey::parse(LINE).unwrap();
        assert!(!record.refresh_line(&parsed, LINE));

        let renamed = LINE.replace("alice@host", "alice@laptop");
        let parsed = ParsedKey::parse(&renamed).unwrap();
        assert!(record.refresh_line(&parsed, &renamed));
        assert_eq!(record.comment(), Some("alice@laptop"));
        assert_eq!(record.raw_line(), renamed);
    }

    #[test]
    fn test_metadata_serialization_omits_empty_fields() {
        let metadata = KeyMetadata {
            alias: Some("ci".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"alias":"ci"}"#);
        assert!(KeyMetadata::default().is_empty());
    }
}
