//! Autopilot operator binary - composition root.
//!
//! Ties the engine crates into a single executable:
//! 1. Load configuration from TOML (flags and env vars override it)
//! 2. Open the SQLite store under the data directory
//! 3. Build the executor with dry-run handlers for every action type
//! 4. Run one subcommand and print its result as JSON

mod cli;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use autopilot_action::{Executor, LoggingHandler, RetryOutcome, UndoOutcome};
use autopilot_core::config::AutopilotConfig;
use autopilot_core::types::{ActionType, AutomationRule, AutonomyLevel, CandidateRuleData, RuleAction};
use autopilot_storage::{AuditFilter, SqliteStore};

use cli::{CliArgs, Command, ConfigCommand, ExecuteArgs, RuleCommand};

/// A rule as written by an operator. The id is optional for new rules.
#[derive(Debug, Deserialize)]
struct RuleFile {
    id: Option<Uuid>,
    tenant_id: String,
    name: String,
    autonomy_level: AutonomyLevel,
    action: RuleAction,
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    let rest = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\"));
    match rest {
        Some(rest) => {
            #[cfg(target_os = "windows")]
            let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
            #[cfg(not(target_os = "windows"))]
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(flag: Option<&str>, configured: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_executor(config: &AutopilotConfig) -> Result<Executor, Box<dyn Error>> {
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(&config.storage.database_file);
    let store = SqliteStore::open(&db_path)?;
    tracing::debug!(path = %db_path.display(), "SQLite database opened");

    let executor = Executor::new(
        config.executor.clone(),
        config.rate_limit.clone(),
        Arc::new(store),
    )?;
    let handler = Arc::new(LoggingHandler);
    for action_type in ActionType::ALL {
        executor.register_action_handler(action_type, handler.clone());
        executor.register_undo_handler(action_type, handler.clone());
    }
    Ok(executor)
}

async fn run_execute(executor: &Executor, args: ExecuteArgs) -> Result<(), Box<dyn Error>> {
    let rule = executor
        .get_rule(args.rule)?
        .ok_or_else(|| format!("rule {} not found", args.rule))?;
    let outcome = executor
        .execute_action(
            &rule,
            &CandidateRuleData::new(args.candidate),
            &args.tenant,
            args.related.as_deref(),
            args.user.as_deref(),
        )
        .await?;
    print_json(&outcome)
}

fn add_rule(executor: &Executor, file: &std::path::Path) -> Result<(), Box<dyn Error>> {
    let content = std::fs::read_to_string(file)?;
    let spec: RuleFile = toml::from_str(&content)?;
    let mut rule = AutomationRule::new(spec.tenant_id, spec.name, spec.autonomy_level, spec.action);
    if let Some(id) = spec.id {
        rule.id = id;
        // Replacing a rule keeps its counters.
        if let Some(existing) = executor.get_rule(id)? {
            rule.executed = existing.executed;
            rule.undone = existing.undone;
        }
    }
    executor.upsert_rule(&rule)?;
    tracing::info!(rule_id = %rule.id, tenant = %rule.tenant_id, "Rule saved");
    print_json(&rule)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = AutopilotConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    init_tracing(args.resolve_log_level().as_deref(), &config.general.log_level);
    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    if let Command::Config(ConfigCommand::Show) = args.command {
        return print_json(&config);
    }

    let executor = open_executor(&config)?;

    match args.command {
        Command::Rule(RuleCommand::Add { file }) => add_rule(&executor, &file)?,
        Command::Rule(RuleCommand::List { tenant }) => print_json(&executor.list_rules(&tenant)?)?,
        Command::Execute(exec) => run_execute(&executor, exec).await?,
        Command::Approvals { tenant } => {
            print_json(&executor.list_pending_approvals(tenant.as_deref())?)?
        }
        Command::Approve(resolve) => {
            let outcome = executor
                .execute_approved_action(resolve.id, &resolve.tenant, resolve.user.as_deref())
                .await?
                .ok_or_else(|| format!("approval {} not found", resolve.id))?;
            print_json(&outcome)?;
        }
        Command::Reject(resolve) => {
            let approval = executor
                .reject_approval(resolve.id, &resolve.tenant, resolve.user.as_deref())?
                .ok_or_else(|| format!("approval {} not found", resolve.id))?;
            print_json(&approval)?;
        }
        Command::Undo { id, user } => match executor.undo_action(id, user.as_deref()).await? {
            UndoOutcome::Undone(record) => print_json(&record)?,
            UndoOutcome::NotFound => return Err(format!("action {} not found", id).into()),
            UndoOutcome::Refused(refusal) => return Err(format!("undo refused: {}", refusal).into()),
        },
        Command::Retry(resolve) => {
            match executor
                .retry_action(resolve.id, &resolve.tenant, resolve.user.as_deref())
                .await?
            {
                RetryOutcome::Retried(outcome) => print_json(&outcome)?,
                RetryOutcome::NotFound => {
                    return Err(format!("action {} not found", resolve.id).into())
                }
                RetryOutcome::Refused(refusal) => {
                    return Err(format!("retry refused: {}", refusal).into())
                }
            }
        }
        Command::Actions { tenant, undoable } => {
            let records = if undoable {
                executor.list_undoable_actions(&tenant)?
            } else {
                executor.list_executed_actions(&tenant)?
            };
            print_json(&records)?;
        }
        Command::Audit {
            tenant,
            candidate,
            limit,
        } => {
            let filter = AuditFilter {
                tenant_id: tenant,
                candidate_id: candidate,
                limit,
            };
            print_json(&executor.audit_log(&filter)?)?;
        }
        Command::Config(ConfigCommand::Show) => print_json(&config)?,
    }

    Ok(())
}
