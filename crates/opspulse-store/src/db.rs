//! OpsPulse database — SQLite schema and connection management.

use opspulse_core::error::{OpsPulseError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

/// OpsPulse database handle.
///
/// Wraps a single connection behind a mutex; every worker process opens
/// its own handle on the shared database file, so in-process serialization
/// here never substitutes for the store-level constraints that guard
/// cross-process races.
pub struct OpsDb {
    conn: Mutex<Connection>,
}

impl OpsDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| OpsPulseError::Store(format!("DB open error: {e}")))?;

        // WAL allows concurrent readers/writers across processes and
        // prevents "database is locked" errors under sweep overlap.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| OpsPulseError::Store(format!("DB pragma error: {e}")))?;

        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Acquire the connection guard.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OpsPulseError::Store(format!("Lock poisoned: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            -- Recurring checklist definitions (edited by the host app's
            -- CRUD layer; read-only for the engine).
            CREATE TABLE IF NOT EXISTS task_templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                period TEXT NOT NULL DEFAULT 'daily',        -- daily, weekly, monthly
                effective_from TEXT NOT NULL,                -- YYYY-MM-DD
                active INTEGER NOT NULL DEFAULT 1,
                owner TEXT NOT NULL DEFAULT '',
                report_managers TEXT NOT NULL DEFAULT '[]',
                escalation_managers TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'active',       -- rollup-derived aggregate
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subtask_templates (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                name TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                scheduled_time TEXT NOT NULL DEFAULT '09:00', -- HH:MM business tz
                sla_hours INTEGER NOT NULL DEFAULT 0,
                sla_minutes INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (task_id) REFERENCES task_templates(id) ON DELETE CASCADE
            );

            -- One mutable row per (run_date, period, task, subtask).
            -- Owner/manager columns are snapshots taken at materialization
            -- time; later template edits never retarget an in-flight day.
            CREATE TABLE IF NOT EXISTS trackers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_date TEXT NOT NULL,                      -- YYYY-MM-DD business tz
                period TEXT NOT NULL,
                task_id TEXT NOT NULL,
                subtask_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                scheduled_time TEXT NOT NULL,
                sla_hours INTEGER NOT NULL DEFAULT 0,
                sla_minutes INTEGER NOT NULL DEFAULT 0,
                owner TEXT NOT NULL DEFAULT '',
                report_managers TEXT NOT NULL DEFAULT '[]',
                escalation_managers TEXT NOT NULL DEFAULT '[]',
                started_at TEXT,
                completed_at TEXT,
                delay_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (run_date, period, task_id, subtask_id)
            );
            CREATE INDEX IF NOT EXISTS idx_trackers_status ON trackers(status);
            CREATE INDEX IF NOT EXISTS idx_trackers_task ON trackers(task_id, run_date);

            -- A row here means 'this exact notification is dispatched or
            -- reserved for dispatch'. The primary key is the sole
            -- at-most-once mechanism under concurrent sweeps.
            CREATE TABLE IF NOT EXISTS alert_reservations (
                task_id TEXT NOT NULL,
                subtask_id TEXT NOT NULL,
                alert_group TEXT NOT NULL,
                bucket INTEGER NOT NULL,                     -- -1 immediate, 0.. repeats
                title TEXT NOT NULL DEFAULT '',
                next_call_at TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (task_id, subtask_id, alert_group, bucket)
            );

            -- Append-only. task_id is nullable on purpose: a concurrently
            -- deleted parent degrades to a free-text record instead of a
            -- failed write.
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT,
                subtask_id TEXT,
                action TEXT NOT NULL,
                actor TEXT NOT NULL DEFAULT 'system',
                detail TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(task_id, subtask_id, action, created_at);

            -- Cluster-wide lease locks with non-blocking try-acquire.
            CREATE TABLE IF NOT EXISTS sweep_locks (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            -- External user directory (read-only here); target of fuzzy
            -- recipient resolution.
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT ''
            );
        ",
        )
        .map_err(|e| OpsPulseError::Store(format!("Migration error: {e}")))?;
        Ok(())
    }
}

/// Format a timestamp the way every table stores it.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Parse a stored timestamp, falling back to epoch on malformed data.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}
