//! Definition-store read contract: task/subtask templates.
//!
//! Templates are owned by the host application's CRUD layer; the engine
//! only reads them. Manager lists arrive in several legacy encodings
//! (JSON array, CSV, bracketed string) and are normalized to a plain
//! ordered `Vec<String>` here, once, at the boundary — nothing downstream
//! re-parses text formats.

use chrono::NaiveDate;
use opspulse_core::error::{OpsPulseError, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{OpsDb, ts};

/// Recurrence period of a task template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Period::Daily),
            "weekly" => Some(Period::Weekly),
            "monthly" => Some(Period::Monthly),
            _ => None,
        }
    }
}

/// A recurring checklist definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub name: String,
    pub period: Period,
    /// First calendar day (business tz) the task materializes for.
    pub effective_from: NaiveDate,
    pub active: bool,
    pub owner: String,
    pub report_managers: Vec<String>,
    pub escalation_managers: Vec<String>,
    /// Rollup-derived aggregate status (active, in_progress, completed,
    /// delayed, overdue).
    pub status: String,
}

/// One ordered step of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskTemplate {
    pub id: String,
    pub task_id: String,
    pub name: String,
    pub position: i64,
    /// Scheduled start, HH:MM in the business timezone.
    pub scheduled_time: String,
    pub sla_hours: i64,
    pub sla_minutes: i64,
}

/// Normalize a manager-list field into an ordered list of names.
///
/// Accepts a JSON array (`["A","B"]`), a CSV line (`A, B`), or the legacy
/// bracketed form (`[A, B]`). Empty segments are dropped, surrounding
/// quotes and whitespace stripped.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        return list
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    // Bracketed-but-not-JSON falls through to CSV handling on the inside.
    let inner = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);
    inner
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<TaskTemplate> {
    let period: String = row.get(2)?;
    let effective: String = row.get(3)?;
    let report: String = row.get(6)?;
    let escalation: String = row.get(7)?;
    Ok(TaskTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        period: Period::parse(&period).unwrap_or(Period::Daily),
        effective_from: NaiveDate::parse_from_str(&effective, "%Y-%m-%d")
            .unwrap_or(NaiveDate::MIN),
        active: row.get::<_, i64>(4)? != 0,
        owner: row.get(5)?,
        report_managers: parse_name_list(&report),
        escalation_managers: parse_name_list(&escalation),
        status: row.get(8)?,
    })
}

const TEMPLATE_SELECT: &str = "SELECT id, name, period, effective_from, active, owner, \
     report_managers, escalation_managers, status FROM task_templates";

impl OpsDb {
    /// All active templates of `period` whose effective-from date has
    /// passed as of `today`.
    pub fn active_templates(&self, period: Period, today: NaiveDate) -> Result<Vec<TaskTemplate>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TEMPLATE_SELECT} WHERE active = 1 AND period = ?1 AND effective_from <= ?2 ORDER BY id"
            ))
            .map_err(|e| OpsPulseError::Store(format!("Prepare templates: {e}")))?;
        let rows = stmt
            .query_map(
                params![period.as_str(), today.format("%Y-%m-%d").to_string()],
                row_to_template,
            )
            .map_err(|e| OpsPulseError::Store(format!("Query templates: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Every template regardless of period/active flag (rollup uses this).
    pub fn all_templates(&self) -> Result<Vec<TaskTemplate>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{TEMPLATE_SELECT} ORDER BY id"))
            .map_err(|e| OpsPulseError::Store(format!("Prepare templates: {e}")))?;
        let rows = stmt
            .query_map([], row_to_template)
            .map_err(|e| OpsPulseError::Store(format!("Query templates: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Look up one template.
    pub fn template(&self, task_id: &str) -> Result<Option<TaskTemplate>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{TEMPLATE_SELECT} WHERE id = ?1"))
            .map_err(|e| OpsPulseError::Store(format!("Prepare template: {e}")))?;
        let mut rows = stmt
            .query_map(params![task_id], row_to_template)
            .map_err(|e| OpsPulseError::Store(format!("Query template: {e}")))?;
        Ok(rows.next().and_then(|r| r.ok()))
    }

    /// Subtasks of a task, ordered by position.
    pub fn subtasks_for(&self, task_id: &str) -> Result<Vec<SubtaskTemplate>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, name, position, scheduled_time, sla_hours, sla_minutes
                 FROM subtask_templates WHERE task_id = ?1 ORDER BY position, id",
            )
            .map_err(|e| OpsPulseError::Store(format!("Prepare subtasks: {e}")))?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(SubtaskTemplate {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    name: row.get(2)?,
                    position: row.get(3)?,
                    scheduled_time: row.get(4)?,
                    sla_hours: row.get(5)?,
                    sla_minutes: row.get(6)?,
                })
            })
            .map_err(|e| OpsPulseError::Store(format!("Query subtasks: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Persist the rollup-derived aggregate status.
    pub fn set_template_status(&self, task_id: &str, status: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE task_templates SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, ts(chrono::Utc::now()), task_id],
        )
        .map_err(|e| OpsPulseError::Store(format!("Set template status: {e}")))?;
        Ok(())
    }

    /// Insert or replace a template. Definition CRUD belongs to the host
    /// app; this exists for fixtures and the demo seeder.
    pub fn upsert_template(&self, t: &TaskTemplate) -> Result<()> {
        let now = ts(chrono::Utc::now());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO task_templates
             (id, name, period, effective_from, active, owner, report_managers, escalation_managers, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, period = excluded.period,
                effective_from = excluded.effective_from, active = excluded.active,
                owner = excluded.owner, report_managers = excluded.report_managers,
                escalation_managers = excluded.escalation_managers,
                updated_at = excluded.updated_at",
            params![
                t.id,
                t.name,
                t.period.as_str(),
                t.effective_from.format("%Y-%m-%d").to_string(),
                t.active as i64,
                t.owner,
                serde_json::to_string(&t.report_managers).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&t.escalation_managers).unwrap_or_else(|_| "[]".into()),
                t.status,
                now,
            ],
        )
        .map_err(|e| OpsPulseError::Store(format!("Upsert template: {e}")))?;
        Ok(())
    }

    /// Insert or replace a subtask template (fixtures/demo seeder).
    pub fn upsert_subtask(&self, s: &SubtaskTemplate) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subtask_templates
             (id, task_id, name, position, scheduled_time, sla_hours, sla_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, position = excluded.position,
                scheduled_time = excluded.scheduled_time,
                sla_hours = excluded.sla_hours, sla_minutes = excluded.sla_minutes",
            params![s.id, s.task_id, s.name, s.position, s.scheduled_time, s.sla_hours, s.sla_minutes],
        )
        .map_err(|e| OpsPulseError::Store(format!("Upsert subtask: {e}")))?;
        Ok(())
    }

    /// Delete a template (CASCADE removes its subtasks). Fixture helper.
    pub fn delete_template(&self, task_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM task_templates WHERE id = ?1", params![task_id])
            .map_err(|e| OpsPulseError::Store(format!("Delete template: {e}")))?;
        Ok(())
    }
}
