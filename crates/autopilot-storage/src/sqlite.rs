//! SQLite-backed [`ActionStore`].
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (nanosecond
//! precision, `Z` suffix) so that lexical order equals chronological order
//! and values round-trip exactly.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use autopilot_core::types::{
    AuditLogEntry, AutomationRule, ExecutedActionRecord, PendingApproval, RuleAction,
};

use crate::db::Database;
use crate::error::StorageError;
use crate::store::{ActionStore, AuditFilter, RuleStat};

const RULE_COLUMNS: &str = "id, tenant_id, name, autonomy_level, action, executed, undone";

const RECORD_COLUMNS: &str = "id, tenant_id, rule_id, rule_name, candidate_id, related_entity_id,
     action, status, explanation, timestamp, can_undo, undo_deadline, undone_at, undone_by,
     error, approval_id, attempt, retry_of";

const APPROVAL_COLUMNS: &str = "id, tenant_id, rule_id, rule_name, candidate_id, related_entity_id,
     action, explanation, requested_by, created_at";

const AUDIT_COLUMNS: &str = "id, tenant_id, user_id, action_type, rule_id, rule_name, candidate_id,
     related_entity_id, params, result, explanation, error, timestamp, undone_by, undone_at,
     record_id, approval_id";

/// Durable store over a shared [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(Database::new(path)?)))
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<ExecutedActionRecord>, StorageError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, |row| Ok(row_to_record(row)))?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row??);
            }
            Ok(records)
        })
    }
}

impl ActionStore for SqliteStore {
    fn upsert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        let action = serde_json::to_string(&rule.action)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO automation_rules (id, tenant_id, name, autonomy_level, action, executed, undone)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    name = excluded.name,
                    autonomy_level = excluded.autonomy_level,
                    action = excluded.action,
                    executed = excluded.executed,
                    undone = excluded.undone",
                rusqlite::params![
                    rule.id.to_string(),
                    rule.tenant_id,
                    rule.name,
                    rule.autonomy_level.to_string(),
                    action,
                    rule.executed as i64,
                    rule.undone as i64,
                ],
            )
            .map_err(|e| StorageError::Database(format!("Failed to save rule: {}", e)))?;
            Ok(())
        })
    }

    fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!("SELECT {} FROM automation_rules WHERE id = ?1", RULE_COLUMNS),
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_rule(row)),
                )
                .optional()?;
            result.transpose()
        })
    }

    fn list_rules(&self, tenant_id: &str) -> Result<Vec<AutomationRule>, StorageError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM automation_rules WHERE tenant_id = ?1 ORDER BY rowid",
                RULE_COLUMNS
            ))?;
            let rows = stmt.query_map(rusqlite::params![tenant_id], |row| Ok(row_to_rule(row)))?;
            let mut rules = Vec::new();
            for row in rows {
                rules.push(row??);
            }
            Ok(rules)
        })
    }

    fn delete_rule(&self, id: Uuid) -> Result<bool, StorageError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM automation_rules WHERE id = ?1",
                rusqlite::params![id.to_string()],
            )?;
            Ok(deleted > 0)
        })
    }

    fn increment_rule_stat(&self, id: Uuid, stat: RuleStat) -> Result<(), StorageError> {
        let sql = match stat {
            RuleStat::Executed => "UPDATE automation_rules SET executed = executed + 1 WHERE id = ?1",
            RuleStat::Undone => "UPDATE automation_rules SET undone = undone + 1 WHERE id = ?1",
        };
        self.db.with_conn(|conn| {
            let updated = conn.execute(sql, rusqlite::params![id.to_string()])?;
            if updated == 0 {
                debug!(rule_id = %id, ?stat, "Rule counter not bumped: rule not found");
            }
            Ok(())
        })
    }

    fn insert_record(&self, record: &ExecutedActionRecord) -> Result<(), StorageError> {
        self.db.with_conn(|conn| insert_record_row(conn, record))
    }

    fn get_record(&self, id: Uuid) -> Result<Option<ExecutedActionRecord>, StorageError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!("SELECT {} FROM executed_actions WHERE id = ?1", RECORD_COLUMNS),
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_record(row)),
                )
                .optional()?;
            result.transpose()
        })
    }

    fn list_records(&self, tenant_id: &str) -> Result<Vec<ExecutedActionRecord>, StorageError> {
        self.query_records(
            &format!(
                "SELECT {} FROM executed_actions
                 WHERE tenant_id = ?1
                 ORDER BY timestamp DESC, rowid DESC",
                RECORD_COLUMNS
            ),
            rusqlite::params![tenant_id],
        )
    }

    fn list_undoable(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutedActionRecord>, StorageError> {
        self.query_records(
            &format!(
                "SELECT {} FROM executed_actions
                 WHERE tenant_id = ?1
                   AND status = 'executed'
                   AND can_undo = 1
                   AND (undo_deadline IS NULL OR undo_deadline >= ?2)
                 ORDER BY timestamp DESC, rowid DESC",
                RECORD_COLUMNS
            ),
            rusqlite::params![tenant_id, ts(now)],
        )
    }

    fn find_retry_of(&self, original: Uuid) -> Result<Option<ExecutedActionRecord>, StorageError> {
        let mut records = self.query_records(
            &format!(
                "SELECT {} FROM executed_actions WHERE retry_of = ?1 ORDER BY rowid LIMIT 1",
                RECORD_COLUMNS
            ),
            rusqlite::params![original.to_string()],
        )?;
        Ok(records.pop())
    }

    fn mark_undone(
        &self,
        id: Uuid,
        undone_at: DateTime<Utc>,
        undone_by: Option<&str>,
    ) -> Result<Option<ExecutedActionRecord>, StorageError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!(
                        "UPDATE executed_actions
                         SET status = 'undone', can_undo = 0, undone_at = ?2, undone_by = ?3
                         WHERE id = ?1 AND status = 'executed' AND can_undo = 1
                         RETURNING {}",
                        RECORD_COLUMNS
                    ),
                    rusqlite::params![id.to_string(), ts(undone_at), undone_by],
                    |row| Ok(row_to_record(row)),
                )
                .optional()?;
            result.transpose()
        })
    }

    fn executions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tenant_id, timestamp FROM executed_actions
                 WHERE status IN ('executed', 'undone') AND timestamp >= ?1
                 ORDER BY timestamp",
            )?;
            let rows = stmt.query_map(rusqlite::params![ts(since)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut executions = Vec::new();
            for row in rows {
                let (tenant_id, timestamp) = row?;
                executions.push((tenant_id, parse_ts("executed_actions", &timestamp)?));
            }
            Ok(executions)
        })
    }

    fn queue_approval(
        &self,
        record: &ExecutedActionRecord,
        approval: &PendingApproval,
    ) -> Result<(), StorageError> {
        let action = serde_json::to_string(&approval.action)?;
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_record_row(&tx, record)?;
            tx.execute(
                &format!(
                    "INSERT INTO pending_approvals ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    APPROVAL_COLUMNS
                ),
                rusqlite::params![
                    approval.id.to_string(),
                    approval.tenant_id,
                    approval.rule_id.to_string(),
                    approval.rule_name,
                    approval.candidate_id,
                    approval.related_entity_id,
                    action,
                    approval.explanation,
                    approval.requested_by,
                    ts(approval.created_at),
                ],
            )
            .map_err(|e| StorageError::Database(format!("Failed to queue approval: {}", e)))?;
            tx.commit()?;
            Ok(())
        })
    }

    fn take_approval(
        &self,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<PendingApproval>, StorageError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!(
                        "DELETE FROM pending_approvals
                         WHERE id = ?1 AND tenant_id = ?2
                         RETURNING {}",
                        APPROVAL_COLUMNS
                    ),
                    rusqlite::params![id.to_string(), tenant_id],
                    |row| Ok(row_to_approval(row)),
                )
                .optional()?;
            result.transpose()
        })
    }

    fn list_approvals(&self, tenant_id: Option<&str>) -> Result<Vec<PendingApproval>, StorageError> {
        self.db.with_conn(|conn| {
            let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match tenant_id {
                Some(tenant) => (
                    format!(
                        "SELECT {} FROM pending_approvals
                         WHERE tenant_id = ?1
                         ORDER BY created_at, rowid",
                        APPROVAL_COLUMNS
                    ),
                    vec![Box::new(tenant.to_string()) as Box<dyn rusqlite::types::ToSql>],
                ),
                None => (
                    format!(
                        "SELECT {} FROM pending_approvals ORDER BY created_at, rowid",
                        APPROVAL_COLUMNS
                    ),
                    Vec::new(),
                ),
            };
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(row_to_approval(row)))?;
            let mut approvals = Vec::new();
            for row in rows {
                approvals.push(row??);
            }
            Ok(approvals)
        })
    }

    fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StorageError> {
        let params_json = serde_json::to_string(&entry.params)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO audit_log ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    AUDIT_COLUMNS
                ),
                rusqlite::params![
                    entry.id.to_string(),
                    entry.tenant_id,
                    entry.user_id,
                    entry.action_type.to_string(),
                    entry.rule_id.to_string(),
                    entry.rule_name,
                    entry.candidate_id,
                    entry.related_entity_id,
                    params_json,
                    entry.result.to_string(),
                    entry.explanation,
                    entry.error,
                    ts(entry.timestamp),
                    entry.undone_by,
                    entry.undone_at.map(ts),
                    entry.record_id.map(|id| id.to_string()),
                    entry.approval_id.map(|id| id.to_string()),
                ],
            )
            .map_err(|e| StorageError::Database(format!("Failed to append audit entry: {}", e)))?;
            Ok(())
        })
    }

    fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.db.with_conn(|conn| {
            let mut clauses = Vec::new();
            let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(tenant) = &filter.tenant_id {
                params_vec.push(Box::new(tenant.clone()));
                clauses.push(format!("tenant_id = ?{}", params_vec.len()));
            }
            if let Some(candidate) = &filter.candidate_id {
                params_vec.push(Box::new(candidate.clone()));
                clauses.push(format!("candidate_id = ?{}", params_vec.len()));
            }
            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };
            // SQLite treats a negative LIMIT as unbounded.
            params_vec.push(Box::new(filter.limit.map_or(-1, |l| l as i64)));
            let sql = format!(
                "SELECT {} FROM audit_log {} ORDER BY timestamp DESC, rowid DESC LIMIT ?{}",
                AUDIT_COLUMNS,
                where_sql,
                params_vec.len()
            );

            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(row_to_audit(row)))?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row??);
            }
            Ok(entries)
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(table: &'static str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            table,
            reason: format!("invalid timestamp '{}': {}", value, e),
        })
}

fn parse_opt_ts(
    table: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    value.map(|v| parse_ts(table, &v)).transpose()
}

fn parse_uuid(table: &'static str, value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value).map_err(|e| StorageError::Corrupt {
        table,
        reason: format!("invalid UUID '{}': {}", value, e),
    })
}

fn parse_opt_uuid(table: &'static str, value: Option<String>) -> Result<Option<Uuid>, StorageError> {
    value.map(|v| parse_uuid(table, &v)).transpose()
}

fn parse_enum<T: FromStr<Err = String>>(table: &'static str, value: &str) -> Result<T, StorageError> {
    value
        .parse()
        .map_err(|reason| StorageError::Corrupt { table, reason })
}

fn parse_action(value: &str) -> Result<RuleAction, StorageError> {
    Ok(serde_json::from_str(value)?)
}

fn insert_record_row(conn: &Connection, record: &ExecutedActionRecord) -> Result<(), StorageError> {
    let action = serde_json::to_string(&record.action)?;
    conn.execute(
        &format!(
            "INSERT INTO executed_actions ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            RECORD_COLUMNS
        ),
        rusqlite::params![
            record.id.to_string(),
            record.tenant_id,
            record.rule_id.to_string(),
            record.rule_name,
            record.candidate_id,
            record.related_entity_id,
            action,
            record.status.to_string(),
            record.explanation,
            ts(record.timestamp),
            record.can_undo as i32,
            record.undo_deadline.map(ts),
            record.undone_at.map(ts),
            record.undone_by,
            record.error,
            record.approval_id.map(|id| id.to_string()),
            record.attempt,
            record.retry_of.map(|id| id.to_string()),
        ],
    )
    .map_err(|e| StorageError::Database(format!("Failed to save executed action: {}", e)))?;
    Ok(())
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> Result<AutomationRule, StorageError> {
    const TABLE: &str = "automation_rules";
    let id: String = row.get(0)?;
    let level: String = row.get(3)?;
    let action: String = row.get(4)?;
    let executed: i64 = row.get(5)?;
    let undone: i64 = row.get(6)?;

    Ok(AutomationRule {
        id: parse_uuid(TABLE, &id)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        autonomy_level: parse_enum(TABLE, &level)?,
        action: parse_action(&action)?,
        executed: executed.max(0) as u64,
        undone: undone.max(0) as u64,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ExecutedActionRecord, StorageError> {
    const TABLE: &str = "executed_actions";
    let id: String = row.get(0)?;
    let rule_id: String = row.get(2)?;
    let action: String = row.get(6)?;
    let status: String = row.get(7)?;
    let timestamp: String = row.get(9)?;
    let can_undo: i32 = row.get(10)?;
    let attempt: i64 = row.get(16)?;

    Ok(ExecutedActionRecord {
        id: parse_uuid(TABLE, &id)?,
        tenant_id: row.get(1)?,
        rule_id: parse_uuid(TABLE, &rule_id)?,
        rule_name: row.get(3)?,
        candidate_id: row.get(4)?,
        related_entity_id: row.get(5)?,
        action: parse_action(&action)?,
        status: parse_enum(TABLE, &status)?,
        explanation: row.get(8)?,
        timestamp: parse_ts(TABLE, &timestamp)?,
        can_undo: can_undo != 0,
        undo_deadline: parse_opt_ts(TABLE, row.get(11)?)?,
        undone_at: parse_opt_ts(TABLE, row.get(12)?)?,
        undone_by: row.get(13)?,
        error: row.get(14)?,
        approval_id: parse_opt_uuid(TABLE, row.get(15)?)?,
        attempt: u32::try_from(attempt).map_err(|_| StorageError::Corrupt {
            table: TABLE,
            reason: format!("invalid attempt {}", attempt),
        })?,
        retry_of: parse_opt_uuid(TABLE, row.get(17)?)?,
    })
}

fn row_to_approval(row: &rusqlite::Row<'_>) -> Result<PendingApproval, StorageError> {
    const TABLE: &str = "pending_approvals";
    let id: String = row.get(0)?;
    let rule_id: String = row.get(2)?;
    let action: String = row.get(6)?;
    let created_at: String = row.get(9)?;

    Ok(PendingApproval {
        id: parse_uuid(TABLE, &id)?,
        tenant_id: row.get(1)?,
        rule_id: parse_uuid(TABLE, &rule_id)?,
        rule_name: row.get(3)?,
        candidate_id: row.get(4)?,
        related_entity_id: row.get(5)?,
        action: parse_action(&action)?,
        explanation: row.get(7)?,
        requested_by: row.get(8)?,
        created_at: parse_ts(TABLE, &created_at)?,
    })
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> Result<AuditLogEntry, StorageError> {
    const TABLE: &str = "audit_log";
    let id: String = row.get(0)?;
    let action_type: String = row.get(3)?;
    let rule_id: String = row.get(4)?;
    let params: String = row.get(8)?;
    let result: String = row.get(9)?;
    let timestamp: String = row.get(12)?;

    Ok(AuditLogEntry {
        id: parse_uuid(TABLE, &id)?,
        tenant_id: row.get(1)?,
        user_id: row.get(2)?,
        action_type: parse_enum(TABLE, &action_type)?,
        rule_id: parse_uuid(TABLE, &rule_id)?,
        rule_name: row.get(5)?,
        candidate_id: row.get(6)?,
        related_entity_id: row.get(7)?,
        params: serde_json::from_str(&params)?,
        result: parse_enum(TABLE, &result)?,
        explanation: row.get(10)?,
        error: row.get(11)?,
        timestamp: parse_ts(TABLE, &timestamp)?,
        undone_by: row.get(13)?,
        undone_at: parse_opt_ts(TABLE, row.get(14)?)?,
        record_id: parse_opt_uuid(TABLE, row.get(15)?)?,
        approval_id: parse_opt_uuid(TABLE, row.get(16)?)?,
    })
}
