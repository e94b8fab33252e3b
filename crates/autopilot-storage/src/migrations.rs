//! Database schema migrations.
//!
//! Applies the engine schema: automation_rules, executed_actions,
//! pending_approvals, audit_log, and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| StorageError::Database(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Database(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: initial schema.
fn apply_v1(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS automation_rules (
            id              TEXT PRIMARY KEY NOT NULL,
            tenant_id       TEXT NOT NULL,
            name            TEXT NOT NULL,
            autonomy_level  TEXT NOT NULL
                            CHECK (autonomy_level IN ('advisory', 'supervised', 'autonomous')),
            action          TEXT NOT NULL,
            executed        INTEGER NOT NULL DEFAULT 0,
            undone          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_rules_tenant
            ON automation_rules (tenant_id);

        CREATE TABLE IF NOT EXISTS executed_actions (
            id                  TEXT PRIMARY KEY NOT NULL,
            tenant_id           TEXT NOT NULL,
            rule_id             TEXT NOT NULL,
            rule_name           TEXT NOT NULL,
            candidate_id        TEXT NOT NULL,
            related_entity_id   TEXT,
            action              TEXT NOT NULL,
            status              TEXT NOT NULL
                                CHECK (status IN ('executed', 'pending_approval', 'advised', 'undone', 'failed')),
            explanation         TEXT NOT NULL,
            timestamp           TEXT NOT NULL,
            can_undo            INTEGER NOT NULL DEFAULT 0,
            undo_deadline       TEXT,
            undone_at           TEXT,
            undone_by           TEXT,
            error               TEXT,
            approval_id         TEXT,
            attempt             INTEGER NOT NULL DEFAULT 1,
            retry_of            TEXT,
            CHECK (can_undo = 0 OR (undo_deadline IS NOT NULL AND undo_deadline > timestamp)),
            CHECK (status != 'undone' OR (can_undo = 0 AND undone_at IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_executed_tenant
            ON executed_actions (tenant_id, timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_executed_status
            ON executed_actions (status, timestamp);

        CREATE INDEX IF NOT EXISTS idx_executed_retry_of
            ON executed_actions (retry_of)
            WHERE retry_of IS NOT NULL;

        CREATE TABLE IF NOT EXISTS pending_approvals (
            id                  TEXT PRIMARY KEY NOT NULL,
            tenant_id           TEXT NOT NULL,
            rule_id             TEXT NOT NULL,
            rule_name           TEXT NOT NULL,
            candidate_id        TEXT NOT NULL,
            related_entity_id   TEXT,
            action              TEXT NOT NULL,
            explanation         TEXT NOT NULL,
            requested_by        TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_approvals_tenant
            ON pending_approvals (tenant_id, created_at);

        CREATE TABLE IF NOT EXISTS audit_log (
            id                  TEXT PRIMARY KEY NOT NULL,
            tenant_id           TEXT NOT NULL,
            user_id             TEXT,
            action_type         TEXT NOT NULL,
            rule_id             TEXT NOT NULL,
            rule_name           TEXT NOT NULL,
            candidate_id        TEXT NOT NULL,
            related_entity_id   TEXT,
            params              TEXT NOT NULL,
            result              TEXT NOT NULL
                                CHECK (result IN ('executed', 'pending_approval', 'advised', 'failed', 'undone', 'rejected')),
            explanation         TEXT NOT NULL,
            error               TEXT,
            timestamp           TEXT NOT NULL,
            undone_by           TEXT,
            undone_at           TEXT,
            record_id           TEXT,
            approval_id         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_audit_tenant
            ON audit_log (tenant_id, timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_audit_candidate
            ON audit_log (candidate_id, timestamp DESC);

        CREATE TRIGGER IF NOT EXISTS audit_log_no_update
            BEFORE UPDATE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
            BEFORE DELETE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
        END;

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');

        COMMIT;
        ",
    )
    .map_err(|e| StorageError::Database(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
