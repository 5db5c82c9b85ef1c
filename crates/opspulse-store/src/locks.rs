//! Cluster-wide sweep locks.
//!
//! Lease rows with try-acquire semantics: a worker either wins the name
//! in one statement or skips its tick. No blocking, no queueing. A lease
//! left behind by a crashed holder is taken over once its TTL expires.

use chrono::{DateTime, Duration, Utc};
use opspulse_core::error::{OpsPulseError, Result};
use rusqlite::params;

use crate::db::{OpsDb, ts};

impl OpsDb {
    /// Try to take the named lock for `ttl_secs`. Returns `true` iff this
    /// holder owns the lease now; `false` means someone else holds an
    /// unexpired lease and the caller must skip, not wait.
    pub fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expires = now + Duration::seconds(ttl_secs);
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT INTO sweep_locks (name, holder, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    holder = excluded.holder,
                    acquired_at = excluded.acquired_at,
                    expires_at = excluded.expires_at
                 WHERE sweep_locks.expires_at <= ?3",
                params![name, holder, ts(now), ts(expires)],
            )
            .map_err(|e| OpsPulseError::Store(format!("Acquire lock: {e}")))?;
        Ok(changed == 1)
    }

    /// Release the lock if this holder still owns it. Releasing a lease
    /// someone else took over is a silent no-op.
    pub fn release_lock(&self, name: &str, holder: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM sweep_locks WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )
        .map_err(|e| OpsPulseError::Store(format!("Release lock: {e}")))?;
        Ok(())
    }

    /// Cleanup: drop leases that expired before `now`.
    pub fn prune_expired_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM sweep_locks WHERE expires_at <= ?1", params![ts(now)])
            .map_err(|e| OpsPulseError::Store(format!("Prune locks: {e}")))?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::temp_db;

    #[test]
    fn test_second_acquirer_skips() {
        let (db, path) = temp_db("locks");
        let now = Utc::now();
        assert!(db.try_acquire_lock("sla_sweep", "worker-a", 120, now).unwrap());
        assert!(!db.try_acquire_lock("sla_sweep", "worker-b", 120, now).unwrap());
        // Release frees the name immediately.
        db.release_lock("sla_sweep", "worker-a").unwrap();
        assert!(db.try_acquire_lock("sla_sweep", "worker-b", 120, now).unwrap());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stale_lease_takeover() {
        let (db, path) = temp_db("locks-ttl");
        let t0 = Utc::now();
        assert!(db.try_acquire_lock("sla_sweep", "worker-a", 60, t0).unwrap());
        // Before expiry: denied. After: taken over.
        let before = t0 + Duration::seconds(59);
        assert!(!db.try_acquire_lock("sla_sweep", "worker-b", 60, before).unwrap());
        let after = t0 + Duration::seconds(61);
        assert!(db.try_acquire_lock("sla_sweep", "worker-b", 60, after).unwrap());
        // The old holder's release no longer owns the row.
        db.release_lock("sla_sweep", "worker-a").unwrap();
        assert!(!db.try_acquire_lock("sla_sweep", "worker-c", 60, after).unwrap());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_independent_names() {
        let (db, path) = temp_db("locks-names");
        let now = Utc::now();
        assert!(db.try_acquire_lock("sla_sweep", "a", 60, now).unwrap());
        assert!(db.try_acquire_lock("cleanup", "a", 60, now).unwrap());
        assert_eq!(db.prune_expired_locks(now + Duration::seconds(61)).unwrap(), 2);
        std::fs::remove_file(&path).ok();
    }
}
