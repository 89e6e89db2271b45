//! CLI tests

use super::*;
use clap::CommandFactory;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "sshreg",
        "list",
        "--expired",
        "--registry",
        "/srv/keys",
        "--format",
        "json",
        "-q",
    ])
    .unwrap();

    assert!(matches!(cli.command, Commands::List { expired: true }));
    assert_eq!(cli.registry, Some(PathBuf::from("/srv/keys")));
    assert!(cli.format == OutputFormat::Json);
    assert!(cli.quiet);
}

#[test]
fn test_capture_metadata_flags() {
    let cli = Cli::try_parse_from([
        "sshreg",
        "capture",
        "id_work",
        "--alias",
        "Work laptop",
        "--expiry",
        "2030-01-01",
    ])
    .unwrap();

    match cli.command {
        Commands::Capture {
            files,
            alias,
            expiry,
        } => {
            assert_eq!(files, vec!["id_work".to_string()]);
            assert_eq!(alias.as_deref(), Some("Work laptop"));
            assert_eq!(expiry.as_deref(), Some("2030-01-01"));
        }
        _ => panic!("expected capture"),
    }
}

#[test]
fn test_delete_requires_a_key() {
    assert!(Cli::try_parse_from(["sshreg", "delete", "--yes"]).is_err());
}

#[test]
fn test_deploy_all_conflicts_with_keys() {
    assert!(Cli::try_parse_from(["sshreg", "deploy", "1", "--all"]).is_err());

    let cli = Cli::try_parse_from(["sshreg", "deploy", "--all", "--target", "/tmp/ak"]).unwrap();
    match cli.command {
        Commands::Deploy { keys, all, target } => {
            assert!(keys.is_empty());
            assert!(all);
            assert_eq!(target, Some(PathBuf::from("/tmp/ak")));
        }
        _ => panic!("expected deploy"),
    }
}

#[test]
fn test_parse_expiry() {
    assert_eq!(
        parse_expiry("2030-02-28").unwrap(),
        NaiveDate::from_ymd_opt(2030, 2, 28)
    );
    assert_eq!(parse_expiry("none").unwrap(), None);
    assert_eq!(parse_expiry(" NONE ").unwrap(), None);
    assert!(parse_expiry("2030-02-30").is_err());
    assert!(parse_expiry("next week").is_err());
}

#[test]
fn test_key_row_marks_expired() {
    let line =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHL2n6lAaOHvNSdsihNLoJ0s3Od7SzDYN14IJSbzp8w9 alice@host";
    let record = KeyRecord::capture(line, Utc::now()).unwrap();
    let row = KeyRow::new(4, &record, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());

    assert_eq!(row.index, 4);
    assert_eq!(row.algorithm, "ssh-ed25519");
    assert_eq!(row.comment, Some("alice@host"));
    assert!(!row.expired);
}
