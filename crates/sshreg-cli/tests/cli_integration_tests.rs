//! CLI integration tests for sshreg
//!
//! Tests the sshreg CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temp config, registry and ssh directories for one test
struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["config", "registry", "ssh"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    fn path(&self, sub: &str) -> PathBuf {
        self.dir.path().join(sub)
    }

    fn ssh_key(&self, name: &str, seed: u8, comment: &str) -> String {
        let line = key_line(seed, comment);
        fs::write(self.path("ssh").join(format!("{name}.pub")), format!("{line}\n")).unwrap();
        line
    }

    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("sshreg").unwrap();
        cmd.env("SSHREG_CONFIG_DIR", self.path("config"));
        cmd.env_remove("RUST_LOG");
        cmd.arg("--registry").arg(self.path("registry"));
        cmd.arg("--ssh-dir").arg(self.path("ssh"));
        cmd
    }
}

fn key_line(seed: u8, comment: &str) -> String {
    let mut blob = Vec::new();
    blob.extend_from_slice(&11u32.to_be_bytes());
    blob.extend_from_slice(b"ssh-ed25519");
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    format!("ssh-ed25519 {} {}", STANDARD.encode(blob), comment)
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_capture_and_list() {
    let env = Env::new();
    let alice = env.ssh_key("id_alice", 1, "alice@host");
    env.ssh_key("id_bob", 2, "bob@host");

    env.cmd()
        .arg("capture")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 added, 0 updated, 0 already registered"));

    assert!(read(&env.path("registry").join("authorized_keys")).starts_with(&alice));
    assert!(env.path("registry").join("key_aliases.json").exists());

    env.cmd()
        .arg("capture")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 added, 0 updated, 2 already registered"));

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("alice@host"))
        .stdout(predicate::str::contains("bob@host"));
}

#[test]
fn test_capture_reports_invalid_file() {
    let env = Env::new();
    fs::write(env.path("ssh").join("broken.pub"), "not-a-key\n").unwrap();

    env.cmd()
        .arg("capture")
        .assert()
        .success()
        .stdout(predicate::str::contains("Invalid"))
        .stdout(predicate::str::contains("1 invalid"));
}

#[test]
fn test_capture_with_alias_and_expiry() {
    let env = Env::new();
    env.ssh_key("id_a", 1, "alice@host");
    env.ssh_key("id_b", 2, "bob@host");

    env.cmd()
        .args(["capture", "--alias", "shared"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("single new key"));
    assert!(!env.path("registry").join("authorized_keys").exists());

    env.cmd()
        .args(["capture", "id_b", "--alias", "Build Server", "--expiry", "2001-01-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Build Server"))
        .stdout(predicate::str::contains("1 added"));

    env.cmd()
        .args(["list", "--expired"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Build Server"))
        .stdout(predicate::str::contains("alice@host").not());
}

#[test]
fn test_alias_search_and_json_list() {
    let env = Env::new();
    env.ssh_key("id_a", 1, "alice@host");
    env.ssh_key("id_b", 2, "bob@host");
    env.cmd().arg("capture").assert().success();

    env.cmd()
        .args(["alias", "2", "Build Server"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Build Server"));

    env.cmd()
        .args(["search", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Build Server"))
        .stdout(predicate::str::contains("alice@host").not());

    let output = env.cmd().args(["list", "--format", "json"]).output().unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[1]["alias"], "Build Server");
    assert_eq!(rows[1]["index"], 2);
}

#[test]
fn test_expiry_and_expired_filter() {
    let env = Env::new();
    env.ssh_key("id_a", 1, "alice@host");
    env.ssh_key("id_b", 2, "bob@host");
    env.cmd().arg("capture").assert().success();

    env.cmd()
        .args(["expiry", "1", "2001-01-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("expires on 2001-01-01"));

    env.cmd()
        .args(["list", "--expired"])
        .assert()
        .success()
        .stdout(predicate::str::contains("alice@host"))
        .stdout(predicate::str::contains("(expired)"))
        .stdout(predicate::str::contains("bob@host").not());

    env.cmd()
        .args(["expiry", "1", "none"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no longer expires"));

    env.cmd()
        .args(["expiry", "1", "someday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YYYY-MM-DD"));
}

#[test]
fn test_unknown_key_fails_without_backup() {
    let env = Env::new();
    env.ssh_key("id_a", 1, "alice@host");
    env.cmd().arg("capture").assert().success();
    let backups = fs::read_dir(env.path("registry").join(".key_backups")).unwrap().count();

    env.cmd()
        .args(["expiry", "ghost", "2030-01-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"))
        .stderr(predicate::str::contains("sshreg list"));

    let after = fs::read_dir(env.path("registry").join(".key_backups")).unwrap().count();
    assert_eq!(after, backups);
}

#[test]
fn test_delete_previews_without_yes() {
    let env = Env::new();
    env.ssh_key("id_a", 1, "alice@host");
    env.cmd().arg("capture").assert().success();

    env.cmd()
        .args(["delete", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would delete"))
        .stdout(predicate::str::contains("--yes"));
    assert!(!read(&env.path("registry").join("authorized_keys")).is_empty());

    env.cmd()
        .args(["delete", "1", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));
    assert!(read(&env.path("registry").join("authorized_keys")).is_empty());

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No keys found."));
}

#[test]
fn test_deploy_to_target() {
    let env = Env::new();
    let alice = env.ssh_key("id_a", 1, "alice@host");
    let bob = env.ssh_key("id_b", 2, "bob@host");
    env.cmd().arg("capture").assert().success();

    let target = env.path("remote").join("authorized_keys");
    fs::create_dir(env.path("remote")).unwrap();
    fs::write(&target, format!("# managed by hand\n{alice}")).unwrap();

    env.cmd()
        .args(["deploy", "--all", "--target"])
        .arg(&target)
        .assert()
        .success()
        .stdout(predicate::str::contains("Deployed 1 key(s)"))
        .stdout(predicate::str::contains("1 already present"));

    assert_eq!(read(&target), format!("# managed by hand\n{alice}\n{bob}\n"));

    env.cmd()
        .args(["deploy", "2", "--target"])
        .arg(&target)
        .assert()
        .success()
        .stdout(predicate::str::contains("Deployed 0 key(s)"));
}

#[test]
fn test_backups_listed_after_change() {
    let env = Env::new();
    env.cmd()
        .arg("backups")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups."));

    env.ssh_key("id_a", 1, "alice@host");
    env.cmd().arg("capture").assert().success();

    env.cmd()
        .arg("backups")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^\d{8}T\d{6}\.\d{6}Z").unwrap());
}

#[test]
fn test_system_list_and_rename() {
    let env = Env::new();
    env.ssh_key("id_work", 1, "work@host");
    fs::write(env.path("ssh").join("id_work"), "private").unwrap();

    env.cmd()
        .args(["system", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("id_work"))
        .stdout(predicate::str::contains("pair"));

    env.cmd()
        .args(["system", "rename", "id_work", "id_office"])
        .assert()
        .success();
    assert!(env.path("ssh").join("id_office.pub").exists());
    assert!(env.path("ssh").join("id_office").exists());
    assert!(!env.path("ssh").join("id_work").exists());

    env.ssh_key("id_home", 2, "home@host");
    env.cmd()
        .args(["system", "rename", "id_home", "id_office"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("collision"));
    assert!(env.path("ssh").join("id_home.pub").exists());
}

#[test]
fn test_system_delete_needs_yes() {
    let env = Env::new();
    env.ssh_key("id_old", 1, "old@host");

    env.cmd()
        .args(["system", "delete", "id_old"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would delete"));
    assert!(env.path("ssh").join("id_old.pub").exists());

    env.cmd()
        .args(["system", "delete", "id_old", "--yes"])
        .assert()
        .success();
    assert!(!env.path("ssh").join("id_old.pub").exists());
}

#[test]
fn test_config_set_get() {
    let env = Env::new();

    env.cmd()
        .args(["config", "set", "sync.remote", "upstream"])
        .assert()
        .success();
    env.cmd()
        .args(["config", "get", "sync.remote"])
        .assert()
        .success()
        .stdout(predicate::str::diff("upstream\n"));
    assert!(env.path("config").join("config.toml").exists());

    env.cmd()
        .args(["config", "set", "sync.auto_push", "sometimes"])
        .assert()
        .failure();

    env.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_doctor_reports_checks() {
    let env = Env::new();

    env.cmd()
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] Configuration"))
        .stdout(predicate::str::contains("Registry"))
        .stdout(predicate::str::contains("SSH directory"));
}

#[test]
fn test_corrupt_registry_is_refused() {
    let env = Env::new();
    fs::write(env.path("registry").join("authorized_keys"), "garbage line\n").unwrap();

    env.cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt"))
        .stderr(predicate::str::contains("sshreg backups"));
}
