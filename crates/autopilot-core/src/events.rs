use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ActionType;

/// Completion events published by the engine when `notify_on_complete` is on.
///
/// Events are emitted after the corresponding record and audit entry are
/// persisted. Delivering them anywhere is the subscriber's concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ActionEvent {
    /// A handler ran successfully and the action is now undoable.
    ActionExecuted {
        record_id: Uuid,
        tenant_id: String,
        rule_id: Uuid,
        action_type: ActionType,
        undo_deadline: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// An attempt failed: handler error, missing handler, or rate limit.
    ActionFailed {
        record_id: Option<Uuid>,
        tenant_id: String,
        rule_id: Uuid,
        action_type: ActionType,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An action was queued for human approval.
    ApprovalRequested {
        approval_id: Uuid,
        record_id: Uuid,
        tenant_id: String,
        rule_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A pending approval was rejected and discarded.
    ApprovalRejected {
        approval_id: Uuid,
        tenant_id: String,
        rejected_by: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An advisory record was written; nothing was executed.
    ActionAdvised {
        record_id: Uuid,
        tenant_id: String,
        rule_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An executed action was reversed.
    ActionUndone {
        record_id: Uuid,
        tenant_id: String,
        undone_by: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ActionEvent {
    pub fn tenant_id(&self) -> &str {
        match self {
            ActionEvent::ActionExecuted { tenant_id, .. }
            | ActionEvent::ActionFailed { tenant_id, .. }
            | ActionEvent::ApprovalRequested { tenant_id, .. }
            | ActionEvent::ApprovalRejected { tenant_id, .. }
            | ActionEvent::ActionAdvised { tenant_id, .. }
            | ActionEvent::ActionUndone { tenant_id, .. } => tenant_id,
        }
    }
}
