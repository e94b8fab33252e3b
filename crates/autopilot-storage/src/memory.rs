//! In-memory [`ActionStore`] for tests and ephemeral runs.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use autopilot_core::types::{
    ActionStatus, AuditLogEntry, AutomationRule, ExecutedActionRecord, PendingApproval,
};

use crate::error::StorageError;
use crate::store::{ActionStore, AuditFilter, RuleStat};

#[derive(Default)]
struct Tables {
    rules: Vec<AutomationRule>,
    records: Vec<ExecutedActionRecord>,
    approvals: Vec<PendingApproval>,
    audit: Vec<AuditLogEntry>,
}

/// Mutex-guarded vectors, insertion ordered. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Newest first; ties keep reverse insertion order.
fn newest_first(mut records: Vec<ExecutedActionRecord>) -> Vec<ExecutedActionRecord> {
    records.reverse();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records
}

impl ActionStore for MemoryStore {
    fn upsert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        match tables.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => tables.rules.push(rule.clone()),
        }
        Ok(())
    }

    fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError> {
        Ok(self.lock()?.rules.iter().find(|r| r.id == id).cloned())
    }

    fn list_rules(&self, tenant_id: &str) -> Result<Vec<AutomationRule>, StorageError> {
        Ok(self
            .lock()?
            .rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn delete_rule(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut tables = self.lock()?;
        let before = tables.rules.len();
        tables.rules.retain(|r| r.id != id);
        Ok(tables.rules.len() != before)
    }

    fn increment_rule_stat(&self, id: Uuid, stat: RuleStat) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        if let Some(rule) = tables.rules.iter_mut().find(|r| r.id == id) {
            match stat {
                RuleStat::Executed => rule.executed += 1,
                RuleStat::Undone => rule.undone += 1,
            }
        }
        Ok(())
    }

    fn insert_record(&self, record: &ExecutedActionRecord) -> Result<(), StorageError> {
        self.lock()?.records.push(record.clone());
        Ok(())
    }

    fn get_record(&self, id: Uuid) -> Result<Option<ExecutedActionRecord>, StorageError> {
        Ok(self.lock()?.records.iter().find(|r| r.id == id).cloned())
    }

    fn list_records(&self, tenant_id: &str) -> Result<Vec<ExecutedActionRecord>, StorageError> {
        let records = self
            .lock()?
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        Ok(newest_first(records))
    }

    fn list_undoable(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutedActionRecord>, StorageError> {
        let records = self
            .lock()?
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.is_undoable_at(now))
            .cloned()
            .collect();
        Ok(newest_first(records))
    }

    fn find_retry_of(&self, original: Uuid) -> Result<Option<ExecutedActionRecord>, StorageError> {
        Ok(self
            .lock()?
            .records
            .iter()
            .find(|r| r.retry_of == Some(original))
            .cloned())
    }

    fn mark_undone(
        &self,
        id: Uuid,
        undone_at: DateTime<Utc>,
        undone_by: Option<&str>,
    ) -> Result<Option<ExecutedActionRecord>, StorageError> {
        let mut tables = self.lock()?;
        let Some(record) = tables.records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        if record.status != ActionStatus::Executed || !record.can_undo {
            return Ok(None);
        }
        record.status = ActionStatus::Undone;
        record.can_undo = false;
        record.undone_at = Some(undone_at);
        record.undone_by = undone_by.map(str::to_string);
        Ok(Some(record.clone()))
    }

    fn executions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| {
                matches!(r.status, ActionStatus::Executed | ActionStatus::Undone)
                    && r.timestamp >= since
            })
            .map(|r| (r.tenant_id.clone(), r.timestamp))
            .collect())
    }

    fn queue_approval(
        &self,
        record: &ExecutedActionRecord,
        approval: &PendingApproval,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.records.push(record.clone());
        tables.approvals.push(approval.clone());
        Ok(())
    }

    fn take_approval(
        &self,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<PendingApproval>, StorageError> {
        let mut tables = self.lock()?;
        match tables
            .approvals
            .iter()
            .position(|a| a.id == id && a.tenant_id == tenant_id)
        {
            Some(pos) => Ok(Some(tables.approvals.remove(pos))),
            None => Ok(None),
        }
    }

    fn list_approvals(&self, tenant_id: Option<&str>) -> Result<Vec<PendingApproval>, StorageError> {
        let mut approvals: Vec<PendingApproval> = self
            .lock()?
            .approvals
            .iter()
            .filter(|a| tenant_id.map_or(true, |t| a.tenant_id == t))
            .cloned()
            .collect();
        approvals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(approvals)
    }

    fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StorageError> {
        self.lock()?.audit.push(entry.clone());
        Ok(())
    }

    fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, StorageError> {
        let mut entries: Vec<AuditLogEntry> = self
            .lock()?
            .audit
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}
