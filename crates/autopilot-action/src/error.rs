//! Error types for the action engine.

use autopilot_core::error::CoreError;
use autopilot_core::types::{ActionStatus, ActionType, AutonomyLevel};
use autopilot_storage::StorageError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Failure reported by an action or undo handler.
///
/// The display text is stored verbatim in the record and audit entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Handler timed out after {0} seconds")]
    Timeout(u64),
}

/// Unexpected failures that escape the orchestrator.
///
/// Expected outcomes (rate limiting, handler failures, not-found, refusals)
/// are returned as values instead.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Configuration rejected: {0}")]
    Config(#[from] CoreError),
}

/// A record status change outside the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: ActionStatus,
    pub to: ActionStatus,
}

/// Why an undo request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UndoRefusal {
    #[error("already undone")]
    AlreadyUndone,
    #[error("action is not undoable (status {0})")]
    NotUndoable(ActionStatus),
    #[error("undo window expired at {0}")]
    WindowExpired(DateTime<Utc>),
    #[error("undo already in progress")]
    InProgress,
    #[error("no undo handler registered for action type '{0}'")]
    NoUndoHandler(ActionType),
    #[error("undo handler failed: {0}")]
    HandlerFailed(String),
}

/// Why a retry request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryRefusal {
    #[error("only failed actions can be retried (status {0})")]
    NotFailed(ActionStatus),
    #[error("already retried as {0}")]
    AlreadyRetried(Uuid),
    #[error("retry limit reached after {attempts} attempts (max_retries = {max_retries})")]
    RetriesExhausted { attempts: u32, max_retries: u32 },
    #[error("retry already in progress")]
    InProgress,
    #[error("rule {0} no longer exists")]
    RuleNotFound(Uuid),
    #[error("rule is no longer autonomous (effective level {0})")]
    NotAutonomous(AutonomyLevel),
    #[error("rate limit exceeded")]
    RateLimited,
}
