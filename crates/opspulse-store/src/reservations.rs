//! Alert reservations — the at-most-once gate for escalation delivery.
//!
//! A reservation row existing means "this exact notification has been
//! dispatched or is reserved for dispatch". The composite primary key is
//! the only correctness mechanism: whichever worker's INSERT lands first
//! owns the send, every other concurrent attempt sees zero affected rows
//! and skips silently.

use chrono::{DateTime, Utc};
use opspulse_core::error::{OpsPulseError, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{OpsDb, parse_ts, ts};

/// Bucket of the immediate (first) alert of a campaign.
pub const IMMEDIATE_BUCKET: i64 = -1;

/// One reserved notification slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertReservation {
    pub task_id: String,
    pub subtask_id: String,
    pub alert_group: String,
    pub bucket: i64,
    pub title: String,
    pub next_call_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OpsDb {
    /// Reserve one notification slot. Returns `true` only for the caller
    /// that actually inserted the row — that caller alone is authorized
    /// to produce the external notification.
    pub fn try_reserve_alert(
        &self,
        task_id: &str,
        subtask_id: &str,
        alert_group: &str,
        bucket: i64,
        title: &str,
        next_call_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT INTO alert_reservations
                 (task_id, subtask_id, alert_group, bucket, title, next_call_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (task_id, subtask_id, alert_group, bucket) DO NOTHING",
                params![
                    task_id,
                    subtask_id,
                    alert_group,
                    bucket,
                    title,
                    next_call_at.map(ts),
                    ts(Utc::now()),
                ],
            )
            .map_err(|e| OpsPulseError::Store(format!("Reserve alert: {e}")))?;
        Ok(changed == 1)
    }

    /// Push a reservation's next-eligible time forward. Scheduling
    /// metadata only — never part of the at-most-once guarantee, and the
    /// guard means the value can only move forward.
    pub fn push_next_call(
        &self,
        task_id: &str,
        subtask_id: &str,
        alert_group: &str,
        bucket: i64,
        next: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE alert_reservations SET next_call_at = ?1
             WHERE task_id = ?2 AND subtask_id = ?3 AND alert_group = ?4 AND bucket = ?5
               AND (next_call_at IS NULL OR next_call_at < ?1)",
            params![ts(next), task_id, subtask_id, alert_group, bucket],
        )
        .map_err(|e| OpsPulseError::Store(format!("Push next_call: {e}")))?;
        Ok(())
    }

    /// Buckets already reserved for a (task, subtask, group), ascending.
    pub fn reserved_buckets(
        &self,
        task_id: &str,
        subtask_id: &str,
        alert_group: &str,
    ) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT bucket FROM alert_reservations
                 WHERE task_id = ?1 AND subtask_id = ?2 AND alert_group = ?3
                 ORDER BY bucket",
            )
            .map_err(|e| OpsPulseError::Store(format!("Prepare buckets: {e}")))?;
        let rows = stmt
            .query_map(params![task_id, subtask_id, alert_group], |row| row.get(0))
            .map_err(|e| OpsPulseError::Store(format!("Query buckets: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Drop every reservation of one task. Rollover runs this once a
    /// task's cycle fully completes, so the (task, subtask, group, bucket)
    /// key is reusable by the next cycle's campaign.
    pub fn clear_task_reservations(&self, task_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "DELETE FROM alert_reservations WHERE task_id = ?1",
                params![task_id],
            )
            .map_err(|e| OpsPulseError::Store(format!("Clear reservations: {e}")))?;
        Ok(n)
    }

    /// Retention cleanup: remove reservations created before `cutoff`.
    pub fn prune_reservations(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "DELETE FROM alert_reservations WHERE created_at < ?1",
                params![ts(cutoff)],
            )
            .map_err(|e| OpsPulseError::Store(format!("Prune reservations: {e}")))?;
        Ok(n)
    }

    /// All reservations (diagnostics/tests).
    pub fn list_reservations(&self) -> Result<Vec<AlertReservation>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT task_id, subtask_id, alert_group, bucket, title, next_call_at, created_at
                 FROM alert_reservations ORDER BY task_id, subtask_id, alert_group, bucket",
            )
            .map_err(|e| OpsPulseError::Store(format!("Prepare reservations: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AlertReservation {
                    task_id: row.get(0)?,
                    subtask_id: row.get(1)?,
                    alert_group: row.get(2)?,
                    bucket: row.get(3)?,
                    title: row.get(4)?,
                    next_call_at: row.get::<_, Option<String>>(5)?.map(|s| parse_ts(&s)),
                    created_at: parse_ts(&row.get::<_, String>(6)?),
                })
            })
            .map_err(|e| OpsPulseError::Store(format!("Query reservations: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
