//! The persistence contract of the action engine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use autopilot_core::types::{AuditLogEntry, AutomationRule, ExecutedActionRecord, PendingApproval};

use crate::error::StorageError;

/// Which rule counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStat {
    Executed,
    Undone,
}

/// Filters for reading the audit log. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub tenant_id: Option<String>,
    pub candidate_id: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn candidate(candidate_id: impl Into<String>) -> Self {
        Self {
            candidate_id: Some(candidate_id.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(tenant) = &self.tenant_id {
            if &entry.tenant_id != tenant {
                return false;
            }
        }
        if let Some(candidate) = &self.candidate_id {
            if &entry.candidate_id != candidate {
                return false;
            }
        }
        true
    }
}

/// Durable storage for rules, executed actions, pending approvals, and the
/// audit log.
///
/// Implementations must make [`take_approval`](ActionStore::take_approval)
/// and [`mark_undone`](ActionStore::mark_undone) atomic: each succeeds for
/// exactly one caller. The audit log is append-only; there is no method that
/// changes or removes an entry.
pub trait ActionStore: Send + Sync {
    // ---- Rules ----

    fn upsert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError>;

    fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError>;

    fn list_rules(&self, tenant_id: &str) -> Result<Vec<AutomationRule>, StorageError>;

    /// Returns `true` if a rule was deleted.
    fn delete_rule(&self, id: Uuid) -> Result<bool, StorageError>;

    /// Bump a rule counter. Unknown rules are ignored.
    fn increment_rule_stat(&self, id: Uuid, stat: RuleStat) -> Result<(), StorageError>;

    // ---- Executed actions ----

    fn insert_record(&self, record: &ExecutedActionRecord) -> Result<(), StorageError>;

    fn get_record(&self, id: Uuid) -> Result<Option<ExecutedActionRecord>, StorageError>;

    /// All records for a tenant, newest first.
    fn list_records(&self, tenant_id: &str) -> Result<Vec<ExecutedActionRecord>, StorageError>;

    /// Records for a tenant that can still be undone at `now`, newest first.
    fn list_undoable(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutedActionRecord>, StorageError>;

    /// The record that retried `original`, if any.
    fn find_retry_of(&self, original: Uuid) -> Result<Option<ExecutedActionRecord>, StorageError>;

    /// Flip an `executed`, undoable record to `undone`.
    ///
    /// Returns the updated record, or `None` if the record is missing or no
    /// longer in a state that allows the transition.
    fn mark_undone(
        &self,
        id: Uuid,
        undone_at: DateTime<Utc>,
        undone_by: Option<&str>,
    ) -> Result<Option<ExecutedActionRecord>, StorageError>;

    /// `(tenant, timestamp)` of every successful execution since `since`,
    /// including ones that were later undone.
    fn executions_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, DateTime<Utc>)>, StorageError>;

    // ---- Pending approvals ----

    /// Persist a `pending_approval` record together with its approval.
    fn queue_approval(
        &self,
        record: &ExecutedActionRecord,
        approval: &PendingApproval,
    ) -> Result<(), StorageError>;

    /// Remove and return an approval owned by `tenant_id`.
    fn take_approval(&self, id: Uuid, tenant_id: &str) -> Result<Option<PendingApproval>, StorageError>;

    /// Live approvals, oldest first, optionally for one tenant.
    fn list_approvals(&self, tenant_id: Option<&str>) -> Result<Vec<PendingApproval>, StorageError>;

    // ---- Audit log ----

    fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StorageError>;

    fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, StorageError>;
}
