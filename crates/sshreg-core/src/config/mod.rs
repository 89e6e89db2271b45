//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::{DEFAULT_BACKUP_DIR, DEFAULT_KEYS_FILE, DEFAULT_METADATA_FILE, RegistryPaths};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "SSHREG_CONFIG_DIR";

/// Shown by `get` for unset optional values
const NOT_SET: &str = "(not set)";

/// sshreg configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub ssh: SshConfig,
    pub deploy: DeployConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Repository directory; the current directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub keys_file: String,
    pub metadata_file: String,
    pub backup_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Local ssh directory; `~/.ssh` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Deploy target; `<ssh dir>/authorized_keys` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub auto_commit: bool,
    pub auto_push: bool,
    pub remote: String,
    pub check_visibility: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: None,
            keys_file: DEFAULT_KEYS_FILE.to_string(),
            metadata_file: DEFAULT_METADATA_FILE.to_string(),
            backup_dir: DEFAULT_BACKUP_DIR.to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_commit: false,
            auto_push: false,
            remote: "origin".to_string(),
            check_visibility: true,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("sshreg")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            // Defaults, without creating the file
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for (key, name) in [
            ("registry.keys_file", &self.registry.keys_file),
            ("registry.metadata_file", &self.registry.metadata_file),
            ("registry.backup_dir", &self.registry.backup_dir),
        ] {
            validate_file_name(key, name)?;
        }
        if self.registry.keys_file == self.registry.metadata_file {
            return Err(anyhow!(
                "registry.keys_file and registry.metadata_file must differ"
            ));
        }
        if self.sync.remote.trim().is_empty() {
            return Err(anyhow!("sync.remote cannot be empty"));
        }
        Ok(())
    }

    // =========================================================================
    // Resolved locations
    // =========================================================================

    pub fn registry_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.registry.dir {
            Some(dir) => Ok(dir.clone()),
            None => env::current_dir().context("Failed to determine current directory"),
        }
    }

    pub fn registry_paths(&self) -> anyhow::Result<RegistryPaths> {
        Ok(RegistryPaths::with_names(
            self.registry_dir()?,
            &self.registry.keys_file,
            &self.registry.metadata_file,
            &self.registry.backup_dir,
        ))
    }

    pub fn ssh_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.ssh.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir()
                .ok_or_else(|| anyhow!("Could not determine home directory"))?
                .join(".ssh")),
        }
    }

    pub fn deploy_target(&self) -> anyhow::Result<PathBuf> {
        match &self.deploy.target {
            Some(target) => Ok(target.clone()),
            None => Ok(self.ssh_dir()?.join("authorized_keys")),
        }
    }

    // =========================================================================
    // Key access
    // =========================================================================

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let optional_path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| NOT_SET.to_string())
        };
        match key {
            // Registry settings
            "registry.dir" => Ok(optional_path(&self.registry.dir)),
            "registry.keys_file" => Ok(self.registry.keys_file.clone()),
            "registry.metadata_file" => Ok(self.registry.metadata_file.clone()),
            "registry.backup_dir" => Ok(self.registry.backup_dir.clone()),

            // Local machine settings
            "ssh.dir" => Ok(optional_path(&self.ssh.dir)),
            "deploy.target" => Ok(optional_path(&self.deploy.target)),

            // Sync settings
            "sync.auto_commit" => Ok(self.sync.auto_commit.to_string()),
            "sync.auto_push" => Ok(self.sync.auto_push.to_string()),
            "sync.remote" => Ok(self.sync.remote.clone()),
            "sync.check_visibility" => Ok(self.sync.check_visibility.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `sshreg config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// Optional paths are cleared by an empty value.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let value = value.trim();
        let optional_path = || (!value.is_empty()).then(|| PathBuf::from(value));
        let flag = || {
            value.parse::<bool>().with_context(|| {
                format!("Invalid value for {}: {} (expected true or false)", key, value)
            })
        };

        let mut updated = self.clone();
        match key {
            "registry.dir" => updated.registry.dir = optional_path(),
            "registry.keys_file" => updated.registry.keys_file = value.to_string(),
            "registry.metadata_file" => updated.registry.metadata_file = value.to_string(),
            "registry.backup_dir" => updated.registry.backup_dir = value.to_string(),
            "ssh.dir" => updated.ssh.dir = optional_path(),
            "deploy.target" => updated.deploy.target = optional_path(),
            "sync.auto_commit" => updated.sync.auto_commit = flag()?,
            "sync.auto_push" => updated.sync.auto_push = flag()?,
            "sync.remote" => updated.sync.remote = value.to_string(),
            "sync.check_visibility" => updated.sync.check_visibility = flag()?,
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `sshreg config list` to see available keys.",
                    key
                ));
            }
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "registry.dir",
            "registry.keys_file",
            "registry.metadata_file",
            "registry.backup_dir",
            "ssh.dir",
            "deploy.target",
            "sync.auto_commit",
            "sync.auto_push",
            "sync.remote",
            "sync.check_visibility",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn validate_file_name(key: &str, name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", key));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(anyhow!(
            "{} must be a plain file name inside the registry, got '{}'",
            key,
            name
        ));
    }
    Ok(())
}
