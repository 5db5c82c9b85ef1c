//! Task-status rollup.
//!
//! Derives each template's aggregate status from its current cycle's
//! instances. Precedence: overdue > delayed > completed > in_progress >
//! active.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use opspulse_core::error::Result;
use opspulse_store::{OpsDb, TrackStatus, Tracker};

use crate::clock::business_today;
use crate::materializer::run_date_for;

/// Aggregate status of one set of instances.
pub fn derive_status(trackers: &[Tracker]) -> &'static str {
    if trackers.is_empty() {
        return "active";
    }
    if trackers.iter().any(|t| t.status == TrackStatus::Overdue) {
        return "overdue";
    }
    if trackers.iter().any(|t| t.status == TrackStatus::Delayed) {
        return "delayed";
    }
    if trackers.iter().all(|t| t.status == TrackStatus::Completed) {
        return "completed";
    }
    if trackers
        .iter()
        .any(|t| matches!(t.status, TrackStatus::InProgress | TrackStatus::Completed))
    {
        return "in_progress";
    }
    "active"
}

/// Re-derive and persist the aggregate status of every active template.
/// Returns how many templates changed.
pub fn rollup_task_statuses(db: &OpsDb, tz: Tz, now: DateTime<Utc>) -> Result<usize> {
    let today = business_today(tz, now);
    let mut changed = 0;
    for template in db.all_templates()? {
        if !template.active {
            continue;
        }
        let run_date = run_date_for(template.period, today);
        let trackers = db.trackers_for_task(&template.id, run_date)?;
        let derived = derive_status(&trackers);
        if derived != template.status {
            db.set_template_status(&template.id, derived)?;
            tracing::debug!("Task '{}' rolled up to {derived}", template.id);
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::materialize;
    use crate::test_fixtures::{seed_defs, temp_db, tz};
    use opspulse_store::Period;

    #[test]
    fn test_precedence_table() {
        let (db, path) = temp_db("rollup-prec");
        seed_defs(&db, "t1", Period::Daily, 3);
        let now = Utc::now();
        let today = business_today(tz(), now);
        materialize(&db, Period::Daily, today).unwrap();
        let rows = db.trackers_for_task("t1", today).unwrap();

        // all pending → active
        assert_eq!(derive_status(&rows), "active");

        // one in progress → in_progress
        db.start_tracker(rows[0].id, &[TrackStatus::Pending], now).unwrap();
        let rows = db.trackers_for_task("t1", today).unwrap();
        assert_eq!(derive_status(&rows), "in_progress");

        // a delayed one outranks it
        db.delay_tracker(rows[1].id, &[TrackStatus::Pending], "waiting on vendor", now).unwrap();
        let rows = db.trackers_for_task("t1", today).unwrap();
        assert_eq!(derive_status(&rows), "delayed");

        // an overdue one outranks everything
        db.mark_overdue_if_pending(rows[2].id, now).unwrap();
        let rows = db.trackers_for_task("t1", today).unwrap();
        assert_eq!(derive_status(&rows), "overdue");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_all_completed() {
        let (db, path) = temp_db("rollup-done");
        seed_defs(&db, "t1", Period::Daily, 2);
        let now = Utc::now();
        let today = business_today(tz(), now);
        materialize(&db, Period::Daily, today).unwrap();
        for t in db.trackers_for_task("t1", today).unwrap() {
            db.start_tracker(t.id, &[TrackStatus::Pending], now).unwrap();
            db.complete_tracker(t.id, &[TrackStatus::InProgress], now).unwrap();
        }
        let rows = db.trackers_for_task("t1", today).unwrap();
        assert_eq!(derive_status(&rows), "completed");

        assert_eq!(rollup_task_statuses(&db, tz(), now).unwrap(), 1);
        assert_eq!(db.template("t1").unwrap().unwrap().status, "completed");
        // Unchanged second pass writes nothing.
        assert_eq!(rollup_task_statuses(&db, tz(), now).unwrap(), 0);
        std::fs::remove_file(&path).ok();
    }
}
