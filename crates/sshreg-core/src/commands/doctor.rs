//! Health checks for the registry and the local ssh setup

use std::path::Path;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::infrastructure::GitSync;
use crate::storage::RegistryStore;
use crate::storage::atomic::file_mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

impl CheckStatus {
    /// Marker used in text output
    pub fn marker(self) -> &'static str {
        match self {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warn => "[--]",
            CheckStatus::Fail => "[!!]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// Run every check against `config`
pub fn doctor(config: &Config) -> Vec<Check> {
    doctor_at(config, Utc::now().date_naive())
}

pub(crate) fn doctor_at(config: &Config, today: NaiveDate) -> Vec<Check> {
    let mut checks = Vec::new();

    if let Err(e) = config.validate() {
        checks.push(Check::new("Configuration", CheckStatus::Fail, format!("{:#}", e)));
        return checks;
    }
    checks.push(Check::new("Configuration", CheckStatus::Ok, "Valid"));

    let paths = match config.registry_paths() {
        Ok(paths) => paths,
        Err(e) => {
            checks.push(Check::new("Registry", CheckStatus::Fail, format!("{:#}", e)));
            return checks;
        }
    };

    let store = match RegistryStore::load(paths.clone()) {
        Ok(store) => {
            checks.push(Check::new(
                "Registry",
                CheckStatus::Ok,
                format!("{} keys in {}", store.registry().len(), paths.root.display()),
            ));
            Some(store)
        }
        Err(e) => {
            checks.push(Check::new("Registry", CheckStatus::Fail, e.to_string()));
            None
        }
    };

    checks.push(private_file("Key list", &paths.keys_file));

    match config.ssh_dir() {
        Ok(dir) => checks.push(ssh_dir(&dir)),
        Err(e) => checks.push(Check::new("SSH directory", CheckStatus::Fail, format!("{:#}", e))),
    }

    match config.deploy_target() {
        Ok(target) => checks.push(deploy_target(&target)),
        Err(e) => checks.push(Check::new("Deploy target", CheckStatus::Fail, format!("{:#}", e))),
    }

    checks.push(git(config, &paths.root, paths.persisted_files()));

    if let Some(store) = &store {
        let expired = store.registry().expired(today).count();
        if expired == 0 {
            checks.push(Check::new("Expiry", CheckStatus::Ok, "No expired keys"));
        } else {
            checks.push(Check::new(
                "Expiry",
                CheckStatus::Warn,
                format!("{} expired key(s); see `sshreg list --expired`", expired),
            ));
        }
    }

    checks
}

fn private_file(name: &str, path: &Path) -> Check {
    if !path.exists() {
        return Check::new(name, CheckStatus::Warn, format!("{} not created yet", path.display()));
    }
    match file_mode(path) {
        Ok(Some(mode)) if mode & 0o077 != 0 => Check::new(
            name,
            CheckStatus::Warn,
            format!("{} has mode {:o}, expected 600", path.display(), mode),
        ),
        Ok(_) => Check::new(name, CheckStatus::Ok, path.display().to_string()),
        Err(e) => Check::new(name, CheckStatus::Fail, format!("{}: {}", path.display(), e)),
    }
}

fn ssh_dir(dir: &Path) -> Check {
    const NAME: &str = "SSH directory";
    if !dir.is_dir() {
        return Check::new(NAME, CheckStatus::Fail, format!("{} does not exist", dir.display()));
    }
    match file_mode(dir) {
        Ok(Some(mode)) if mode & 0o077 != 0 => Check::new(
            NAME,
            CheckStatus::Warn,
            format!("{} has mode {:o}, expected 700", dir.display(), mode),
        ),
        Ok(_) => Check::new(NAME, CheckStatus::Ok, dir.display().to_string()),
        Err(e) => Check::new(NAME, CheckStatus::Fail, format!("{}: {}", dir.display(), e)),
    }
}

fn deploy_target(target: &Path) -> Check {
    const NAME: &str = "Deploy target";
    if !target.exists() {
        return Check::new(
            NAME,
            CheckStatus::Ok,
            format!("{} (created on first deploy)", target.display()),
        );
    }
    match file_mode(target) {
        // sshd rejects authorized keys writable by others
        Ok(Some(mode)) if mode & 0o022 != 0 => Check::new(
            NAME,
            CheckStatus::Warn,
            format!("{} has mode {:o}, expected 600", target.display(), mode),
        ),
        Ok(_) => Check::new(NAME, CheckStatus::Ok, target.display().to_string()),
        Err(e) => Check::new(NAME, CheckStatus::Fail, format!("{}: {}", target.display(), e)),
    }
}

fn git(config: &Config, root: &Path, files: [&Path; 2]) -> Check {
    const NAME: &str = "Git";
    let files = files.into_iter().map(Path::to_path_buf);
    let sync = match GitSync::open(root, config.sync.remote.clone(), files) {
        Ok(sync) => sync,
        Err(_) => {
            return Check::new(
                NAME,
                CheckStatus::Warn,
                format!("{} is not in a git repository; sync is unavailable", root.display()),
            );
        }
    };
    match sync.remote_url() {
        Ok(Some(url)) => Check::new(
            NAME,
            CheckStatus::Ok,
            format!("{} -> {} ({})", sync.workdir().display(), config.sync.remote, url),
        ),
        Ok(None) => Check::new(
            NAME,
            CheckStatus::Warn,
            format!("remote '{}' is not configured", config.sync.remote),
        ),
        Err(e) => Check::new(NAME, CheckStatus::Fail, e.to_string()),
    }
}
