//! Command-line surface of the `autopilot` binary.
//!
//! Settings resolve as flag, then environment variable, then config file,
//! then built-in default.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

/// Autopilot - inspect and drive the autonomy-gated action engine.
#[derive(Parser, Debug)]
#[command(name = "autopilot", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage automation rules.
    #[command(subcommand)]
    Rule(RuleCommand),

    /// Fire a rule for a candidate.
    Execute(ExecuteArgs),

    /// List pending approvals.
    Approvals {
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Approve and execute a pending approval.
    Approve(ResolveArgs),

    /// Reject a pending approval.
    Reject(ResolveArgs),

    /// Undo an executed action inside its undo window.
    Undo {
        id: Uuid,
        #[arg(long)]
        user: Option<String>,
    },

    /// Retry a failed action.
    Retry(ResolveArgs),

    /// List executed actions for a tenant.
    Actions {
        #[arg(long)]
        tenant: String,
        /// Only actions that can still be undone.
        #[arg(long)]
        undoable: bool,
    },

    /// Read the audit log, newest first.
    Audit {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        candidate: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum RuleCommand {
    /// Create or replace a rule from a TOML file.
    Add {
        #[arg(long)]
        file: PathBuf,
    },
    /// List a tenant's rules.
    List {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show,
}

#[derive(Args, Debug)]
pub struct ExecuteArgs {
    #[arg(long)]
    pub tenant: String,
    /// Rule id.
    #[arg(long)]
    pub rule: Uuid,
    #[arg(long)]
    pub candidate: String,
    /// Related entity (job, listing) the action concerns.
    #[arg(long)]
    pub related: Option<String>,
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    pub id: Uuid,
    #[arg(long)]
    pub tenant: String,
    #[arg(long)]
    pub user: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > AUTOPILOT_CONFIG env var > ~/.autopilot/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("AUTOPILOT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > AUTOPILOT_DATA_DIR env var > config file value.
    /// Returns `None` if neither is overridden.
    pub fn resolve_data_dir(&self) -> Option<String> {
        if let Some(ref p) = self.data_dir {
            return Some(p.to_string_lossy().to_string());
        }
        std::env::var("AUTOPILOT_DATA_DIR").ok()
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".autopilot").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".autopilot").join("config.toml");
    }
    PathBuf::from("config.toml")
}
