//! Tracked instances — the per-day mutable rows the engine operates on.
//!
//! The composite `UNIQUE (run_date, period, task_id, subtask_id)` key is
//! what makes materialization idempotent, and the guarded compare-and-set
//! UPDATEs here are what keep concurrent sweeps from double-claiming a
//! transition: whoever matches the WHERE clause wins, everyone else sees
//! zero affected rows and walks away.

use chrono::{DateTime, NaiveDate, Utc};
use opspulse_core::error::{OpsPulseError, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{OpsDb, parse_ts, ts};
use crate::templates::{Period, parse_name_list};

/// Instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
    Delayed,
    Cancelled,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::InProgress => "in_progress",
            TrackStatus::Completed => "completed",
            TrackStatus::Overdue => "overdue",
            TrackStatus::Delayed => "delayed",
            TrackStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TrackStatus::Pending),
            "in_progress" => Some(TrackStatus::InProgress),
            "completed" => Some(TrackStatus::Completed),
            "overdue" => Some(TrackStatus::Overdue),
            "delayed" => Some(TrackStatus::Delayed),
            "cancelled" => Some(TrackStatus::Cancelled),
            _ => None,
        }
    }
}

/// A tracked instance row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracker {
    pub id: i64,
    pub run_date: NaiveDate,
    pub period: Period,
    pub task_id: String,
    pub subtask_id: String,
    pub status: TrackStatus,
    pub scheduled_time: String,
    pub sla_hours: i64,
    pub sla_minutes: i64,
    pub owner: String,
    pub report_managers: Vec<String>,
    pub escalation_managers: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub delay_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last mutation time; for `overdue` rows this anchors the repeat
    /// escalation bucket math.
    pub updated_at: DateTime<Utc>,
}

/// Seed values for a new instance (snapshot of the template).
#[derive(Debug, Clone)]
pub struct NewTracker {
    pub run_date: NaiveDate,
    pub period: Period,
    pub task_id: String,
    pub subtask_id: String,
    pub scheduled_time: String,
    pub sla_hours: i64,
    pub sla_minutes: i64,
    pub owner: String,
    pub report_managers: Vec<String>,
    pub escalation_managers: Vec<String>,
}

const TRACKER_SELECT: &str = "SELECT id, run_date, period, task_id, subtask_id, status, \
     scheduled_time, sla_hours, sla_minutes, owner, report_managers, escalation_managers, \
     started_at, completed_at, delay_reason, created_at, updated_at FROM trackers";

fn row_to_tracker(row: &rusqlite::Row) -> rusqlite::Result<Tracker> {
    let run_date: String = row.get(1)?;
    let period: String = row.get(2)?;
    let status: String = row.get(5)?;
    let report: String = row.get(10)?;
    let escalation: String = row.get(11)?;
    Ok(Tracker {
        id: row.get(0)?,
        run_date: NaiveDate::parse_from_str(&run_date, "%Y-%m-%d").unwrap_or(NaiveDate::MIN),
        period: Period::parse(&period).unwrap_or(Period::Daily),
        task_id: row.get(3)?,
        subtask_id: row.get(4)?,
        status: TrackStatus::parse(&status).unwrap_or(TrackStatus::Pending),
        scheduled_time: row.get(6)?,
        sla_hours: row.get(7)?,
        sla_minutes: row.get(8)?,
        owner: row.get(9)?,
        report_managers: parse_name_list(&report),
        escalation_managers: parse_name_list(&escalation),
        started_at: row.get::<_, Option<String>>(12)?.map(|s| parse_ts(&s)),
        completed_at: row.get::<_, Option<String>>(13)?.map(|s| parse_ts(&s)),
        delay_reason: row.get(14)?,
        created_at: parse_ts(&row.get::<_, String>(15)?),
        updated_at: parse_ts(&row.get::<_, String>(16)?),
    })
}

fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Build a trusted `IN (...)` list from status enums. Enum strings only,
/// never user input.
fn status_in_clause(allowed: &[TrackStatus]) -> String {
    allowed
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl OpsDb {
    /// Insert a tracked instance unless the (run_date, period, task,
    /// subtask) slot already exists. Never overwrites an existing row's
    /// status or timestamps. Returns whether a row was created.
    pub fn insert_tracker_if_absent(&self, t: &NewTracker) -> Result<bool> {
        let now = ts(Utc::now());
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT INTO trackers
                 (run_date, period, task_id, subtask_id, status, scheduled_time,
                  sla_hours, sla_minutes, owner, report_managers, escalation_managers,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT (run_date, period, task_id, subtask_id) DO NOTHING",
                params![
                    date_str(t.run_date),
                    t.period.as_str(),
                    t.task_id,
                    t.subtask_id,
                    t.scheduled_time,
                    t.sla_hours,
                    t.sla_minutes,
                    t.owner,
                    serde_json::to_string(&t.report_managers).unwrap_or_else(|_| "[]".into()),
                    serde_json::to_string(&t.escalation_managers).unwrap_or_else(|_| "[]".into()),
                    now,
                ],
            )
            .map_err(|e| OpsPulseError::Store(format!("Insert tracker: {e}")))?;
        Ok(changed == 1)
    }

    /// Fetch one instance by id.
    pub fn tracker(&self, id: i64) -> Result<Option<Tracker>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{TRACKER_SELECT} WHERE id = ?1"))
            .map_err(|e| OpsPulseError::Store(format!("Prepare tracker: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], row_to_tracker)
            .map_err(|e| OpsPulseError::Store(format!("Query tracker: {e}")))?;
        Ok(rows.next().and_then(|r| r.ok()))
    }

    /// Fetch one instance by its natural key.
    pub fn tracker_by_key(
        &self,
        run_date: NaiveDate,
        period: Period,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<Option<Tracker>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TRACKER_SELECT} WHERE run_date = ?1 AND period = ?2 AND task_id = ?3 AND subtask_id = ?4"
            ))
            .map_err(|e| OpsPulseError::Store(format!("Prepare tracker: {e}")))?;
        let mut rows = stmt
            .query_map(
                params![date_str(run_date), period.as_str(), task_id, subtask_id],
                row_to_tracker,
            )
            .map_err(|e| OpsPulseError::Store(format!("Query tracker: {e}")))?;
        Ok(rows.next().and_then(|r| r.ok()))
    }

    /// All instances of a task for one run date, subtask order.
    pub fn trackers_for_task(&self, task_id: &str, run_date: NaiveDate) -> Result<Vec<Tracker>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TRACKER_SELECT} WHERE task_id = ?1 AND run_date = ?2 ORDER BY subtask_id"
            ))
            .map_err(|e| OpsPulseError::Store(format!("Prepare trackers: {e}")))?;
        let rows = stmt
            .query_map(params![task_id, date_str(run_date)], row_to_tracker)
            .map_err(|e| OpsPulseError::Store(format!("Query trackers: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Every instance currently in `status`, oldest first.
    pub fn trackers_with_status(&self, status: TrackStatus) -> Result<Vec<Tracker>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TRACKER_SELECT} WHERE status = ?1 ORDER BY run_date, task_id, subtask_id"
            ))
            .map_err(|e| OpsPulseError::Store(format!("Prepare trackers: {e}")))?;
        let rows = stmt
            .query_map(params![status.as_str()], row_to_tracker)
            .map_err(|e| OpsPulseError::Store(format!("Query trackers: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// `pending → overdue`, compare-and-set. The WHERE guard means two
    /// racing evaluators cannot both win; the loser gets `false` and must
    /// not escalate.
    pub fn mark_overdue_if_pending(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE trackers SET status = 'overdue', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![ts(now), id],
            )
            .map_err(|e| OpsPulseError::Store(format!("Mark overdue: {e}")))?;
        Ok(changed == 1)
    }

    /// Manual start. `started_at` is only stamped once, so re-entering
    /// in_progress is idempotent on the timestamp.
    pub fn start_tracker(
        &self,
        id: i64,
        allowed_from: &[TrackStatus],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE trackers SET status = 'in_progress',
                     started_at = COALESCE(started_at, ?1), updated_at = ?1
                     WHERE id = ?2 AND status IN ({})",
                    status_in_clause(allowed_from)
                ),
                params![ts(now), id],
            )
            .map_err(|e| OpsPulseError::Store(format!("Start tracker: {e}")))?;
        Ok(changed == 1)
    }

    /// Manual completion.
    pub fn complete_tracker(
        &self,
        id: i64,
        allowed_from: &[TrackStatus],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE trackers SET status = 'completed', completed_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND status IN ({})",
                    status_in_clause(allowed_from)
                ),
                params![ts(now), id],
            )
            .map_err(|e| OpsPulseError::Store(format!("Complete tracker: {e}")))?;
        Ok(changed == 1)
    }

    /// Manual delay with reason.
    pub fn delay_tracker(
        &self,
        id: i64,
        allowed_from: &[TrackStatus],
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE trackers SET status = 'delayed', delay_reason = ?1, updated_at = ?2
                     WHERE id = ?3 AND status IN ({})",
                    status_in_clause(allowed_from)
                ),
                params![reason, ts(now), id],
            )
            .map_err(|e| OpsPulseError::Store(format!("Delay tracker: {e}")))?;
        Ok(changed == 1)
    }

    /// Manual cancellation.
    pub fn cancel_tracker(
        &self,
        id: i64,
        allowed_from: &[TrackStatus],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE trackers SET status = 'cancelled', updated_at = ?1
                     WHERE id = ?2 AND status IN ({})",
                    status_in_clause(allowed_from)
                ),
                params![ts(now), id],
            )
            .map_err(|e| OpsPulseError::Store(format!("Cancel tracker: {e}")))?;
        Ok(changed == 1)
    }
}
