//! sshreg CLI - personal SSH public-key registry

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sshreg_core::capture::CaptureMetadata;
use sshreg_core::commands::doctor::{CheckStatus, doctor};
use sshreg_core::commands::{SyncNotes, Workspace, deploy, keys, sync};
use sshreg_core::config::Config;
use sshreg_core::infrastructure::{Clipboard, SystemClipboard};
use sshreg_core::keys::{FingerprintId, KeyRecord};
use sshreg_core::system::{SystemKeyManager, SystemKeySummary};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "sshreg")]
#[command(author, version, about = "Personal SSH public-key registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Registry directory (overrides registry.dir)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Local ssh directory (overrides ssh.dir)
    #[arg(long, global = true)]
    ssh_dir: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture public keys from the local ssh directory
    Capture {
        /// Key files to capture (all *.pub files when omitted)
        files: Vec<String>,
        /// Alias for the captured key (only when a single key is added)
        #[arg(long)]
        alias: Option<String>,
        /// Expiry for the captured keys (YYYY-MM-DD)
        #[arg(long)]
        expiry: Option<String>,
    },

    /// List registered keys
    List {
        /// Only keys whose expiry has passed
        #[arg(long)]
        expired: bool,
    },

    /// Search keys by alias or comment
    Search { query: String },

    /// Set a key's alias (an empty alias clears it)
    Alias { key: String, alias: String },

    /// Set a key's expiry date (YYYY-MM-DD), or `none` to clear it
    Expiry { key: String, date: String },

    /// Delete keys from the registry
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
        /// Delete without only previewing
        #[arg(short, long)]
        yes: bool,
    },

    /// Append keys to an authorized-keys file
    Deploy {
        keys: Vec<String>,
        /// Deploy every registered key
        #[arg(short, long, conflicts_with = "keys")]
        all: bool,
        /// Target file (defaults to deploy.target)
        #[arg(short, long)]
        target: Option<PathBuf>,
    },

    /// Copy a key line to the clipboard
    Copy { key: String },

    /// Pull, commit and push the registry repository
    Sync {
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
        /// Push even if the remote repository is public
        #[arg(long)]
        allow_public: bool,
    },

    /// List registry backups
    Backups,

    /// Manage key pairs in the local ssh directory
    System {
        #[command(subcommand)]
        action: SystemAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum SystemAction {
    /// List local key pairs
    List,
    /// Rename a key pair
    Rename { old: String, new: String },
    /// Delete a key pair
    Delete {
        name: String,
        /// Delete without only previewing
        #[arg(short, long)]
        yes: bool,
    },
    /// Copy a local public key to the clipboard
    Copy { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

/// One row of a key listing
#[derive(Serialize)]
struct KeyRow<'a> {
    index: usize,
    fingerprint: &'a str,
    alias: Option<&'a str>,
    algorithm: &'a str,
    comment: Option<&'a str>,
    expiry: Option<NaiveDate>,
    added_at: Option<String>,
    expired: bool,
}

impl<'a> KeyRow<'a> {
    fn new(index: usize, record: &'a KeyRecord, today: NaiveDate) -> Self {
        Self {
            index,
            fingerprint: record.fingerprint().as_str(),
            alias: record.alias(),
            algorithm: record.algorithm(),
            comment: record.comment(),
            expiry: record.expiry(),
            added_at: record.added_at().map(|t| t.to_rfc3339()),
            expired: record.is_expired(today),
        }
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "sshreg=info" } else { "sshreg=warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let result = run(cli);
    if let Err(e) = &result {
        if let Some(err) = e.downcast_ref::<sshreg_core::Error>() {
            debug!(code = err.code(), "Command failed");
            if let Some(suggestion) = err.suggestion() {
                eprintln!("hint: try `{}`", suggestion);
            }
        }
    }
    result
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Config { action } => cmd_config(action, out),
        Commands::Doctor => {
            let config = load_config(cli.registry.as_deref(), cli.ssh_dir.as_deref())?;
            cmd_doctor(&config, out)
        }
        Commands::System { action } => {
            let config = load_config(cli.registry.as_deref(), cli.ssh_dir.as_deref())?;
            cmd_system(SystemKeyManager::new(config.ssh_dir()?), action, out)
        }
        command => {
            let config = load_config(cli.registry.as_deref(), cli.ssh_dir.as_deref())?;
            let mut ws = Workspace::open(config)?;
            cmd_registry(&mut ws, command, out)
        }
    }
}

/// Config file plus the command-line overrides
fn load_config(registry: Option<&Path>, ssh_dir: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    if let Some(dir) = registry {
        config.registry.dir = Some(dir.to_path_buf());
    }
    if let Some(dir) = ssh_dir {
        config.ssh.dir = Some(dir.to_path_buf());
    }
    Ok(config)
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json<T: Serialize + ?Sized>(self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Warnings go to stderr so json output stays parseable
    fn sync_notes(self, notes: &SyncNotes) {
        for warning in &notes.warnings {
            warn!(warning = %warning, "Sync after change failed");
            eprintln!("warning: {}", warning);
        }
        if !self.quiet && !self.json() {
            if notes.pushed {
                println!("Committed and pushed.");
            } else if notes.committed {
                println!("Committed.");
            }
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_registry(ws: &mut Workspace, command: Commands, out: Output) -> anyhow::Result<()> {
    let today = Utc::now().date_naive();

    match command {
        Commands::Capture {
            files,
            alias,
            expiry,
        } => {
            let metadata = CaptureMetadata {
                alias,
                expiry: expiry.as_deref().map(parse_expiry).transpose()?.flatten(),
            };
            let outcome = keys::capture_with(ws, &files, &metadata)?;
            let report = &outcome.result;
            if out.json() {
                out.print_json(&outcome)?;
            } else if !out.quiet {
                let registry = ws.store().registry();
                let name = |fp: &FingerprintId| {
                    registry
                        .get(fp)
                        .map(|r: &KeyRecord| r.display_name().to_string())
                        .unwrap_or_else(|| fp.to_string())
                };
                for fp in &report.added {
                    println!("Added     {}  {}", fp.short(), name(fp));
                }
                for fp in &report.refreshed {
                    println!("Updated   {}  {}", fp.short(), name(fp));
                }
                for fp in &report.skipped {
                    println!("Known     {}  {}", fp.short(), name(fp));
                }
                for invalid in &report.invalid {
                    println!("Invalid   {}: {}", invalid.source, invalid.reason);
                }
                println!(
                    "{} added, {} updated, {} already registered, {} invalid",
                    report.added.len(),
                    report.refreshed.len(),
                    report.skipped.len(),
                    report.invalid.len()
                );
            }
            out.sync_notes(&outcome.sync);
        }

        Commands::List { expired } => {
            let listed = keys::list(ws.store().registry(), expired, today);
            print_keys(&listed, today, out)?;
        }

        Commands::Search { query } => {
            let listed = keys::search(ws.store().registry(), &query);
            print_keys(&listed, today, out)?;
        }

        Commands::Alias { key, alias } => {
            let outcome = keys::set_alias(ws, &key, Some(alias.as_str()))?;
            if out.json() {
                out.print_json(&outcome)?;
            } else if !out.quiet {
                match outcome.result.alias() {
                    Some(alias) => {
                        println!("Alias of {} set to '{}'", outcome.result.fingerprint(), alias)
                    }
                    None => println!("Alias of {} cleared", outcome.result.fingerprint()),
                }
            }
            out.sync_notes(&outcome.sync);
        }

        Commands::Expiry { key, date } => {
            let expiry = parse_expiry(&date)?;
            let outcome = keys::set_expiry(ws, &key, expiry)?;
            if out.json() {
                out.print_json(&outcome)?;
            } else if !out.quiet {
                let name = outcome.result.display_name();
                match outcome.result.expiry() {
                    Some(date) => println!("{} expires on {}", name, date),
                    None => println!("{} no longer expires", name),
                }
            }
            out.sync_notes(&outcome.sync);
        }

        Commands::Delete { keys: selectors, yes } => {
            if !yes {
                let preview = keys::preview_delete(ws, &selectors)?;
                if out.json() {
                    out.print_json(&preview)?;
                } else {
                    println!("Would delete:");
                    for record in &preview {
                        println!("  {}  {}", record.fingerprint().short(), record.display_name());
                    }
                    println!("Re-run with --yes to delete.");
                }
                return Ok(());
            }

            let outcome = keys::delete(ws, &selectors)?;
            if out.json() {
                out.print_json(&outcome)?;
            } else if !out.quiet {
                for record in &outcome.result {
                    println!(
                        "Deleted   {}  {}",
                        record.fingerprint().short(),
                        record.display_name()
                    );
                }
            }
            out.sync_notes(&outcome.sync);
        }

        Commands::Deploy { keys, all, target } => {
            let report = deploy::deploy(ws, &keys, all, target.as_deref())?;
            let registry = ws.store().registry();
            for fp in &report.deployed {
                if let Some(record) = registry.get(fp).filter(|r| r.is_expired(today)) {
                    eprintln!("warning: deployed expired key {}", record.display_name());
                }
            }
            if out.json() {
                out.print_json(&report)?;
            } else if !out.quiet {
                println!(
                    "Deployed {} key(s) to {} ({} already present)",
                    report.deployed.len(),
                    report.target.display(),
                    report.already_present.len()
                );
            }
        }

        Commands::Copy { key } => {
            let outcome = keys::copy(ws, &key, &SystemClipboard::new())?;
            if out.json() {
                out.print_json(&outcome)?;
            } else if outcome.copied {
                if !out.quiet {
                    println!("Copied to clipboard.");
                }
            } else {
                println!("{}", outcome.text);
            }
        }

        Commands::Sync {
            message,
            allow_public,
        } => {
            let report = sync::sync(ws, message.as_deref(), allow_public)?;
            if out.json() {
                out.print_json(&report)?;
            } else if !out.quiet {
                if report.committed {
                    println!("Pulled, committed and pushed.");
                } else {
                    println!("Pulled and pushed; nothing new to commit.");
                }
            }
        }

        Commands::Backups => {
            let backups = ws.store().backups().list()?;
            if out.json() {
                out.print_json(&backups)?;
            } else if backups.is_empty() {
                if !out.quiet {
                    println!("No backups.");
                }
            } else {
                for backup in &backups {
                    println!("{}  {} file(s)", backup.id, backup.files.len());
                }
            }
        }

        Commands::System { .. } | Commands::Config { .. } | Commands::Doctor => {
            unreachable!("dispatched before the registry is opened")
        }
    }
    Ok(())
}

fn print_keys(listed: &[keys::Listed<'_>], today: NaiveDate, out: Output) -> anyhow::Result<()> {
    if out.json() {
        let rows: Vec<KeyRow> = listed
            .iter()
            .map(|(index, record)| KeyRow::new(*index, record, today))
            .collect();
        return out.print_json(&rows);
    }

    if listed.is_empty() {
        if !out.quiet {
            println!("No keys found.");
        }
        return Ok(());
    }

    for (index, record) in listed {
        let expiry = match record.expiry() {
            Some(date) if record.is_expired(today) => format!("{} (expired)", date),
            Some(date) => date.to_string(),
            None => "-".to_string(),
        };
        let added = record
            .added_at()
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>3}  {:<28} {:<20} {:<22} {}",
            index,
            record.display_name(),
            record.algorithm(),
            expiry,
            added
        );
        if !out.quiet {
            println!("     {}", record.fingerprint());
        }
    }
    Ok(())
}

fn parse_expiry(value: &str) -> anyhow::Result<Option<NaiveDate>> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map(Some)
        .with_context(|| format!("Invalid date '{}' (expected YYYY-MM-DD or none)", value))
}

fn cmd_system(manager: SystemKeyManager, action: SystemAction, out: Output) -> anyhow::Result<()> {
    match action {
        SystemAction::List => {
            let keys = manager.list()?;
            if out.json() {
                let summaries: Vec<SystemKeySummary> = keys.iter().map(Into::into).collect();
                return out.print_json(&summaries);
            }
            if keys.is_empty() {
                if !out.quiet {
                    println!("No keys in {}", manager.dir().display());
                }
                return Ok(());
            }
            for (i, key) in keys.iter().enumerate() {
                let fingerprint = match &key.fingerprint {
                    Ok(fp) => fp.to_string(),
                    Err(e) => format!("unreadable ({})", e),
                };
                let private = if key.has_private() { "pair" } else { "public only" };
                println!("{:>3}  {:<24} {:<12} {}", i + 1, key.name, private, fingerprint);
            }
        }

        SystemAction::Rename { old, new } => {
            let old = manager.resolve(&old)?;
            manager.rename(&old, &new)?;
            if !out.quiet {
                println!("Renamed {} to {}", old, new);
            }
        }

        SystemAction::Delete { name, yes } => {
            let name = manager.resolve(&name)?;
            let token = manager.prepare_delete(&name)?;
            if !yes {
                println!("Would delete:");
                for file in token.files() {
                    println!("  {}", file.display());
                }
                if token.includes_private() {
                    println!("This includes the private key and cannot be undone.");
                }
                println!("Re-run with --yes to delete.");
                return Ok(());
            }
            let removed = manager.delete(token)?;
            if out.json() {
                out.print_json(&removed)?;
            } else if !out.quiet {
                for file in &removed {
                    println!("Deleted {}", file.display());
                }
            }
        }

        SystemAction::Copy { name } => {
            let name = manager.resolve(&name)?;
            let text = manager.read_public(&name)?;
            if SystemClipboard::new().copy(&text) {
                if !out.quiet {
                    println!("Copied {}.pub to clipboard.", name);
                }
            } else {
                println!("{}", text);
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !out.quiet {
                println!("Set {} = {}", key, config.get(&key)?);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.json() {
                let map: std::collections::BTreeMap<_, _> = items.into_iter().collect();
                return out.print_json(&map);
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn cmd_doctor(config: &Config, out: Output) -> anyhow::Result<()> {
    let checks = doctor(config);
    if out.json() {
        return out.print_json(&checks);
    }

    if !out.quiet {
        println!("sshreg Health Check");
        println!("===================");
        println!();
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    for check in &checks {
        if out.quiet && check.status == CheckStatus::Ok {
            continue;
        }
        println!("{} {}: {}", check.status.marker(), check.name, check.detail);
    }

    if !out.quiet {
        println!();
        if checks.iter().any(|c| c.status == CheckStatus::Fail) {
            println!("Some checks failed. See above for details.");
        } else if checks.iter().any(|c| c.status == CheckStatus::Warn) {
            println!("Checks passed with warnings.");
        } else {
            println!("All checks passed!");
        }
    }
    Ok(())
}

#[cfg(test)]
mod main_tests;
