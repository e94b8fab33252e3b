//! Record lifecycle and attempt snapshots.
//!
//! A record is written once per orchestration attempt in its final status.
//! The only transition afterwards is executed -> undone.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use autopilot_core::types::{
    ActionStatus, AuditLogEntry, AuditResult, AutomationRule, ExecutedActionRecord,
    PendingApproval, RuleAction,
};

use crate::error::TransitionError;

/// Validate that a status transition is allowed.
pub fn validate_transition(from: ActionStatus, to: ActionStatus) -> Result<(), TransitionError> {
    if matches!((from, to), (ActionStatus::Executed, ActionStatus::Undone)) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Everything an attempt needs to produce records and audit entries.
///
/// Snapshotted from the rule (first attempt), the approval (approved
/// execution), or the failed record (retry).
#[derive(Debug, Clone)]
pub(crate) struct AttemptContext {
    pub tenant_id: String,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub candidate_id: String,
    pub related_entity_id: Option<String>,
    pub action: RuleAction,
    pub acting_user: Option<String>,
    pub approval_id: Option<Uuid>,
    pub attempt: u32,
    pub retry_of: Option<Uuid>,
}

impl AttemptContext {
    pub fn from_rule(
        rule: &AutomationRule,
        candidate_id: &str,
        tenant_id: &str,
        related_entity_id: Option<&str>,
        acting_user: Option<&str>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            candidate_id: candidate_id.to_string(),
            related_entity_id: related_entity_id.map(str::to_string),
            action: rule.action.clone(),
            acting_user: acting_user.map(str::to_string),
            approval_id: None,
            attempt: 1,
            retry_of: None,
        }
    }

    pub fn from_approval(approval: &PendingApproval, acting_user: Option<&str>) -> Self {
        Self {
            tenant_id: approval.tenant_id.clone(),
            rule_id: approval.rule_id,
            rule_name: approval.rule_name.clone(),
            candidate_id: approval.candidate_id.clone(),
            related_entity_id: approval.related_entity_id.clone(),
            action: approval.action.clone(),
            acting_user: acting_user.map(str::to_string),
            approval_id: Some(approval.id),
            attempt: 1,
            retry_of: None,
        }
    }

    pub fn retry_of(failed: &ExecutedActionRecord, acting_user: Option<&str>) -> Self {
        Self {
            tenant_id: failed.tenant_id.clone(),
            rule_id: failed.rule_id,
            rule_name: failed.rule_name.clone(),
            candidate_id: failed.candidate_id.clone(),
            related_entity_id: failed.related_entity_id.clone(),
            action: failed.action.clone(),
            acting_user: acting_user.map(str::to_string),
            approval_id: failed.approval_id,
            attempt: failed.attempt + 1,
            retry_of: Some(failed.id),
        }
    }

    pub fn explanation(&self) -> String {
        self.action.explain_for(&self.rule_name)
    }

    fn record(&self, status: ActionStatus, now: DateTime<Utc>) -> ExecutedActionRecord {
        ExecutedActionRecord {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id.clone(),
            rule_id: self.rule_id,
            rule_name: self.rule_name.clone(),
            candidate_id: self.candidate_id.clone(),
            related_entity_id: self.related_entity_id.clone(),
            action: self.action.clone(),
            status,
            explanation: self.explanation(),
            timestamp: now,
            can_undo: false,
            undo_deadline: None,
            undone_at: None,
            undone_by: None,
            error: None,
            approval_id: self.approval_id,
            attempt: self.attempt,
            retry_of: self.retry_of,
        }
    }

    /// An executed record. A zero undo window leaves it irreversible.
    pub fn executed(&self, now: DateTime<Utc>, undo_window: Duration) -> ExecutedActionRecord {
        let mut record = self.record(ActionStatus::Executed, now);
        if undo_window > Duration::zero() {
            record.can_undo = true;
            record.undo_deadline = Some(now + undo_window);
        }
        record
    }

    pub fn failed(&self, now: DateTime<Utc>, error: String) -> ExecutedActionRecord {
        let mut record = self.record(ActionStatus::Failed, now);
        record.error = Some(error);
        record
    }

    pub fn advised(&self, now: DateTime<Utc>) -> ExecutedActionRecord {
        self.record(ActionStatus::Advised, now)
    }

    /// A queued approval and the `pending_approval` record that references it.
    pub fn queued(&self, now: DateTime<Utc>) -> (ExecutedActionRecord, PendingApproval) {
        let approval = PendingApproval {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id.clone(),
            rule_id: self.rule_id,
            rule_name: self.rule_name.clone(),
            candidate_id: self.candidate_id.clone(),
            related_entity_id: self.related_entity_id.clone(),
            action: self.action.clone(),
            explanation: self.explanation(),
            requested_by: self.acting_user.clone(),
            created_at: now,
        };
        let mut record = self.record(ActionStatus::PendingApproval, now);
        record.approval_id = Some(approval.id);
        (record, approval)
    }

    /// Audit entry for an attempt that produced no record.
    pub fn audit_entry(
        &self,
        result: AuditResult,
        now: DateTime<Utc>,
        explanation: String,
        error: Option<String>,
    ) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id.clone(),
            user_id: self.acting_user.clone(),
            action_type: self.action.action_type(),
            rule_id: self.rule_id,
            rule_name: self.rule_name.clone(),
            candidate_id: self.candidate_id.clone(),
            related_entity_id: self.related_entity_id.clone(),
            params: self.action.params(),
            result,
            explanation,
            error,
            timestamp: now,
            undone_by: None,
            undone_at: None,
            record_id: None,
            approval_id: self.approval_id,
        }
    }

    /// Audit entry describing a freshly written record.
    pub fn audit_for(&self, record: &ExecutedActionRecord) -> AuditLogEntry {
        let mut entry = self.audit_entry(
            record.status.into(),
            record.timestamp,
            record.explanation.clone(),
            record.error.clone(),
        );
        entry.record_id = Some(record.id);
        entry.approval_id = record.approval_id;
        entry
    }
}
