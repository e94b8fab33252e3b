use std::path::Path;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::types::AutonomyLevel;

/// Longest accepted undo window: one hundred years.
pub const MAX_UNDO_WINDOW_MINUTES: u32 = 60 * 24 * 366 * 100;

/// Stored timestamps carry four-digit years.
const MAX_DEADLINE_YEAR: i32 = 9999;

/// Top-level configuration for the autopilot engine.
///
/// Loaded from `~/.autopilot/config.toml` by default. Every section is
/// optional and falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AutopilotConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AutopilotConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        self.executor.validate()?;
        if self.rate_limit.window_minutes == 0 {
            return Err(CoreError::InvalidValue {
                field: "rate_limit.window_minutes".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.autopilot/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// What to do when an action type has no registered handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingHandlerPolicy {
    /// Fail the attempt.
    #[default]
    Fail,
    /// Treat the action as a logged no-op success.
    DryRun,
}

/// Runtime configuration read by every orchestration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// How long executed actions stay reversible. 0 disables undo.
    pub undo_window_minutes: u32,
    /// Write the audit log. Disabling removes the only durable record of
    /// automated decisions.
    pub enable_audit_log: bool,
    /// Publish completion events to subscribers.
    pub notify_on_complete: bool,
    /// Retries allowed per failed action (total attempts = 1 + max_retries).
    pub max_retries: u32,
    pub missing_handler: MissingHandlerPolicy,
    /// Operator-wide cap on rule autonomy.
    pub autonomy_ceiling: Option<AutonomyLevel>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            undo_window_minutes: 30,
            enable_audit_log: true,
            notify_on_complete: false,
            max_retries: 3,
            missing_handler: MissingHandlerPolicy::Fail,
            autonomy_ceiling: None,
        }
    }
}

impl ExecutorConfig {
    pub fn undo_window(&self) -> Duration {
        Duration::minutes(i64::from(self.undo_window_minutes))
    }

    pub fn validate(&self) -> Result<()> {
        if self.undo_window_minutes > MAX_UNDO_WINDOW_MINUTES {
            return Err(self.undo_window_out_of_range());
        }
        Ok(())
    }

    /// Undo deadline for an action executed at `executed_at`.
    ///
    /// `Ok(None)` when undo is disabled. Errors if the deadline cannot be
    /// represented or stored.
    pub fn undo_deadline(&self, executed_at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if self.undo_window_minutes == 0 {
            return Ok(None);
        }
        executed_at
            .checked_add_signed(self.undo_window())
            .filter(|deadline| deadline.year() <= MAX_DEADLINE_YEAR)
            .map(Some)
            .ok_or_else(|| self.undo_window_out_of_range())
    }

    fn undo_window_out_of_range(&self) -> CoreError {
        CoreError::InvalidValue {
            field: "executor.undo_window_minutes".to_string(),
            value: self.undo_window_minutes.to_string(),
        }
    }
}

/// Per-tenant admission control for automatic execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Automatic executions allowed per tenant within one window.
    pub max_actions_per_window: u32,
    /// Length of the rolling window.
    pub window_minutes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_actions_per_window: 50,
            window_minutes: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file name inside `general.data_dir`.
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "autopilot.db".to_string(),
        }
    }
}
