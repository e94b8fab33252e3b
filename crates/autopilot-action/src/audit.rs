//! Append-only audit log.
//!
//! Only the executor writes here. Entries are never changed; an undo adds a
//! new entry describing the reversal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use autopilot_core::types::{AuditLogEntry, AuditResult, ExecutedActionRecord};
use autopilot_storage::{ActionStore, AuditFilter, StorageError};

const DISABLED_WARNING: &str =
    "Audit logging is disabled: automated decisions will leave no durable record";

pub struct AuditLog {
    store: Arc<dyn ActionStore>,
    enabled: AtomicBool,
}

impl AuditLog {
    pub(crate) fn new(store: Arc<dyn ActionStore>, enabled: bool) -> Self {
        if !enabled {
            warn!("{}", DISABLED_WARNING);
        }
        Self {
            store,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            warn!("{}", DISABLED_WARNING);
        }
    }

    pub(crate) fn log_to_audit(&self, entry: AuditLogEntry) -> Result<(), StorageError> {
        if !self.is_enabled() {
            debug!(result = %entry.result, "Audit entry skipped");
            return Ok(());
        }
        self.store.append_audit(&entry)
    }

    /// Record the reversal of `record`, which must already be `undone`.
    pub(crate) fn log_undo_to_audit(
        &self,
        record: &ExecutedActionRecord,
        acting_user: Option<&str>,
        undone_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.log_to_audit(AuditLogEntry {
            id: Uuid::new_v4(),
            tenant_id: record.tenant_id.clone(),
            user_id: acting_user.map(str::to_string),
            action_type: record.action_type(),
            rule_id: record.rule_id,
            rule_name: record.rule_name.clone(),
            candidate_id: record.candidate_id.clone(),
            related_entity_id: record.related_entity_id.clone(),
            params: record.action.params(),
            result: AuditResult::Undone,
            explanation: record.explanation.clone(),
            error: None,
            timestamp: undone_at,
            undone_by: acting_user.map(str::to_string),
            undone_at: Some(undone_at),
            record_id: Some(record.id),
            approval_id: record.approval_id,
        })
    }

    pub fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.store.list_audit(filter)
    }

    pub fn for_tenant(&self, tenant_id: &str) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.list(&AuditFilter::tenant(tenant_id))
    }

    pub fn for_candidate(&self, candidate_id: &str) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.list(&AuditFilter::candidate(candidate_id))
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
