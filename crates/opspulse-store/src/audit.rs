//! Append-only audit log.
//!
//! The engine writes every state transition and alert decision here and
//! never reads it back for logic, with one soft exception: the
//! "already notified within N minutes" window check that suppresses
//! duplicate one-shot status notices.

use chrono::{DateTime, Utc};
use opspulse_core::error::{OpsPulseError, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{OpsDb, parse_ts, ts};

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    /// None when the parent task vanished mid-write; the original id then
    /// lives in `detail`.
    pub task_id: Option<String>,
    pub subtask_id: Option<String>,
    pub action: String,
    pub actor: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl OpsDb {
    /// Append an audit entry.
    pub fn audit(
        &self,
        task_id: Option<&str>,
        subtask_id: Option<&str>,
        action: &str,
        actor: &str,
        detail: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_log (task_id, subtask_id, action, actor, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![task_id, subtask_id, action, actor, detail, ts(Utc::now())],
        )
        .map_err(|e| OpsPulseError::Store(format!("Audit write: {e}")))?;
        Ok(())
    }

    /// Append an audit entry for a task that may have been concurrently
    /// deleted: the id moves into the detail text, task_id goes NULL.
    pub fn audit_orphaned(&self, task_id: &str, subtask_id: Option<&str>, action: &str, actor: &str, detail: &str) -> Result<()> {
        let merged = format!("[task {task_id} missing] {detail}");
        self.audit(None, subtask_id, action, actor, &merged)
    }

    /// Whether `action` was already logged for (task, subtask) at or after
    /// `since`. Best-effort duplicate suppression for one-shot notices.
    pub fn recently_logged(
        &self,
        task_id: &str,
        subtask_id: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM audit_log
                 WHERE task_id = ?1 AND subtask_id = ?2 AND action = ?3 AND created_at >= ?4",
                params![task_id, subtask_id, action, ts(since)],
                |row| row.get(0),
            )
            .map_err(|e| OpsPulseError::Store(format!("Audit window: {e}")))?;
        Ok(count > 0)
    }

    /// Latest entries, newest first (diagnostics/UI sink).
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, subtask_id, action, actor, detail, created_at
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| OpsPulseError::Store(format!("Prepare audit: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    subtask_id: row.get(2)?,
                    action: row.get(3)?,
                    actor: row.get(4)?,
                    detail: row.get(5)?,
                    created_at: parse_ts(&row.get::<_, String>(6)?),
                })
            })
            .map_err(|e| OpsPulseError::Store(format!("Query audit: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Retention cleanup: drop entries created before `cutoff`.
    pub fn prune_audit(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM audit_log WHERE created_at < ?1", params![ts(cutoff)])
            .map_err(|e| OpsPulseError::Store(format!("Prune audit: {e}")))?;
        Ok(n)
    }
}
