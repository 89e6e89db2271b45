//! Error module tests

use crate::error::{Error, Result};
use crate::keys::{FingerprintId, KeyParseError};

#[test]
fn test_key_not_found_error() {
    let error = Error::KeyNotFound("laptop".to_string());
    assert_eq!(error.code(), "E002");
    assert_eq!(error.suggestion(), Some("sshreg list".to_string()));
    assert!(error.to_string().contains("laptop"));
}

#[test]
fn test_system_key_not_found_error() {
    let error = Error::SystemKeyNotFound("id_work".to_string());
    assert_eq!(error.code(), "E003");
    assert_eq!(error.suggestion(), Some("sshreg system list".to_string()));
    assert!(error.to_string().contains("id_work"));
}

#[test]
fn test_malformed_key_from_parse_error() {
    let error: Error = KeyParseError::MissingMaterial.into();
    assert_eq!(error.code(), "E001");
    assert_eq!(error.suggestion(), None);
    assert!(error.to_string().starts_with("Malformed key"));
}

#[test]
fn test_name_collision_error() {
    let error = Error::NameCollision("id_ed25519.pub".to_string());
    assert_eq!(error.code(), "E004");
    assert!(error.to_string().contains("id_ed25519.pub"));
}

#[test]
fn test_store_error_codes() {
    assert_eq!(Error::CorruptStore("x".into()).code(), "E100");
    assert_eq!(Error::PersistFailed("x".into()).code(), "E101");
    assert_eq!(Error::BackupCollision("x".into()).code(), "E102");
    assert_eq!(Error::BackupFailed("x".into()).code(), "E103");
    assert_eq!(
        Error::CorruptStore("x".into()).suggestion(),
        Some("sshreg backups".to_string())
    );
}

#[test]
fn test_deploy_verification_lists_missing() {
    let a = FingerprintId::from_blob(b"a");
    let b = FingerprintId::from_blob(b"b");
    let error = Error::DeployVerificationFailed(vec![a.clone(), b.clone()]);
    assert_eq!(error.code(), "E200");

    let message = error.to_string();
    assert!(message.contains(a.as_str()));
    assert!(message.contains(b.as_str()));
}

#[test]
fn test_sync_and_config_errors() {
    let sync = Error::SyncFailed("non-fast-forward".to_string());
    assert_eq!(sync.code(), "E300");
    assert_eq!(sync.suggestion(), Some("git status".to_string()));

    let config = Error::ConfigError("bad value".to_string());
    assert_eq!(config.code(), "E600");
    assert!(config.to_string().contains("bad value"));
}

#[test]
fn test_generic_errors() {
    assert_eq!(Error::InvalidInput("x".into()).code(), "E800");
    assert_eq!(Error::Other("x".into()).code(), "E9999");

    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    assert_eq!(error.code(), "E9999");
    assert!(error.to_string().contains("file not found"));
}

#[test]
fn test_result_alias() {
    fn returns_result() -> Result<u8> {
        Err(Error::InvalidInput("nope".to_string()))
    }
    assert!(returns_result().is_err());
}
