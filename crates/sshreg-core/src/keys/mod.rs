//! Key model and fingerprint engine

pub mod fingerprint;
pub mod record;

pub use fingerprint::{
    FINGERPRINT_PREFIX, FingerprintId, KeyParseError, ParsedKey, find_key_in_line, fingerprint,
};
pub use record::{KeyMetadata, KeyRecord};
