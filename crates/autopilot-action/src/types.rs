//! Result values returned by the executor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use autopilot_core::types::{ActionStatus, ExecutedActionRecord};

use crate::error::{RetryRefusal, UndoRefusal};

/// Explanation and error carried by an attempt the rate limiter denied.
pub const RATE_LIMIT_EXCEEDED: &str = "rate limit exceeded";

/// What an orchestration attempt ended as.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    /// `None` only when the attempt was refused before any record was
    /// written (rate limited, or a rule fired for another tenant).
    pub record_id: Option<Uuid>,
    /// Set when the action was queued for approval or came from one.
    pub approval_id: Option<Uuid>,
    pub can_undo: bool,
    pub undo_deadline: Option<DateTime<Utc>>,
    pub explanation: String,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn from_record(record: &ExecutedActionRecord) -> Self {
        Self {
            status: record.status,
            record_id: Some(record.id),
            approval_id: record.approval_id,
            can_undo: record.can_undo,
            undo_deadline: record.undo_deadline,
            explanation: record.explanation.clone(),
            error: record.error.clone(),
        }
    }

    /// A failed attempt that never reached a handler and left no record.
    pub fn refused(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: ActionStatus::Failed,
            record_id: None,
            approval_id: None,
            can_undo: false,
            undo_deadline: None,
            explanation: error.clone(),
            error: Some(error),
        }
    }

    pub fn rate_limited() -> Self {
        Self::refused(RATE_LIMIT_EXCEEDED)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.record_id.is_none() && self.error.as_deref() == Some(RATE_LIMIT_EXCEEDED)
    }
}

/// Result of an undo request.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoOutcome {
    /// The action was reversed; carries the updated record.
    Undone(ExecutedActionRecord),
    NotFound,
    Refused(UndoRefusal),
}

impl UndoOutcome {
    pub fn is_undone(&self) -> bool {
        matches!(self, UndoOutcome::Undone(_))
    }
}

/// Result of a retry request.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// A new attempt ran; it may itself have failed.
    Retried(ActionOutcome),
    NotFound,
    Refused(RetryRefusal),
}
