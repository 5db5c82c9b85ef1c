//! User directory reads — the external identity source recipient names
//! resolve against. Read-only from the engine's perspective; the upsert
//! exists for fixtures and the demo seeder.

use opspulse_core::error::{OpsPulseError, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::OpsDb;

/// One directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
}

impl OpsDb {
    /// All directory users, ordered by id.
    pub fn users(&self) -> Result<Vec<DirectoryUser>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, full_name, email FROM users ORDER BY id")
            .map_err(|e| OpsPulseError::Store(format!("Prepare users: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DirectoryUser {
                    id: row.get(0)?,
                    full_name: row.get(1)?,
                    email: row.get(2)?,
                })
            })
            .map_err(|e| OpsPulseError::Store(format!("Query users: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Insert or replace a directory user (fixtures/demo seeder).
    pub fn upsert_user(&self, u: &DirectoryUser) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, full_name, email) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET full_name = excluded.full_name, email = excluded.email",
            params![u.id, u.full_name, u.email],
        )
        .map_err(|e| OpsPulseError::Store(format!("Upsert user: {e}")))?;
        Ok(())
    }
}
