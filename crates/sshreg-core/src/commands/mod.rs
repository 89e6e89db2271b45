//! Commands module - all operations as library functions
//!
//! These commands are used by the CLI. Each mutating command persists through
//! the registry store and then applies the configured sync policy.

pub mod deploy;
pub mod doctor;
pub mod keys;
pub mod sync;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::infrastructure::{GitSync, VersionControlSync};
use crate::storage::{BackupId, RegistryStore};
use crate::system::SystemKeyManager;

/// Notes from the sync policy applied after a change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncNotes {
    pub committed: bool,
    pub pushed: bool,
    pub warnings: Vec<String>,
}

/// Result of a mutating command
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub result: T,
    /// Backup taken before the change, if anything was written
    pub backup: Option<BackupId>,
    pub sync: SyncNotes,
}

/// Registry store plus the resolved locations it works with
pub struct Workspace {
    config: Config,
    store: RegistryStore,
    ssh_dir: PathBuf,
    deploy_target: PathBuf,
    vcs: Option<Box<dyn VersionControlSync>>,
}

impl Workspace {
    /// Resolve locations from `config` and load the registry
    pub fn open(config: Config) -> Result<Self> {
        let paths = config.registry_paths().map_err(config_err)?;
        let ssh_dir = config.ssh_dir().map_err(config_err)?;
        let deploy_target = config.deploy_target().map_err(config_err)?;
        let store = RegistryStore::load(paths)?;
        Ok(Self {
            config,
            store,
            ssh_dir,
            deploy_target,
            vcs: None,
        })
    }

    /// Use `vcs` instead of opening the git repository around the registry
    pub fn with_vcs(mut self, vcs: Box<dyn VersionControlSync>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RegistryStore {
        &mut self.store
    }

    pub fn ssh_dir(&self) -> &Path {
        &self.ssh_dir
    }

    pub fn deploy_target(&self) -> &Path {
        &self.deploy_target
    }

    pub fn system_keys(&self) -> SystemKeyManager {
        SystemKeyManager::new(&self.ssh_dir)
    }

    /// Version control for the registry, opened on first use
    pub fn vcs(&mut self) -> Result<&dyn VersionControlSync> {
        let vcs: Box<dyn VersionControlSync> = match self.vcs.take() {
            Some(vcs) => vcs,
            None => {
                let paths = self.store.paths();
                let files = paths
                    .persisted_files()
                    .into_iter()
                    .map(Path::to_path_buf)
                    .collect::<Vec<_>>();
                Box::new(GitSync::open(
                    &paths.root,
                    self.config.sync.remote.clone(),
                    files,
                )?)
            }
        };
        Ok(&**self.vcs.insert(vcs))
    }

    /// Backup id of the last persisted change, when `changed` is set
    fn backup_if(&self, changed: bool) -> Option<BackupId> {
        changed
            .then(|| self.store.last_backup().map(|b| b.id.clone()))
            .flatten()
    }

    /// Commit (and push) a registry change according to the sync settings
    ///
    /// Failures are returned as warnings: the change is already saved.
    pub fn after_change(&mut self, message: &str) -> SyncNotes {
        let mut notes = SyncNotes::default();
        let policy = self.config.sync.clone();
        if !policy.auto_commit {
            return notes;
        }

        let vcs = match self.vcs() {
            Ok(vcs) => vcs,
            Err(e) => {
                notes.warnings.push(format!("auto-commit skipped: {}", e));
                return notes;
            }
        };

        match vcs.commit(message) {
            Ok(committed) => notes.committed = committed,
            Err(e) => {
                notes.warnings.push(format!("auto-commit failed: {}", e));
                return notes;
            }
        }

        if policy.auto_push && notes.committed {
            match sync::push_checked(vcs, policy.check_visibility, false) {
                Ok(()) => notes.pushed = true,
                Err(e) => notes.warnings.push(format!("auto-push failed: {}", e)),
            }
        }
        notes
    }
}

fn config_err(e: anyhow::Error) -> Error {
    Error::ConfigError(format!("{:#}", e))
}
