//! SLA evaluator — the time-based half of the state machine.
//!
//! Only `pending` instances are eligible: the instant the clock passes an
//! instance's scheduled time it goes overdue, and the winner of that
//! compare-and-set (and only the winner) hands the instance to the
//! escalation engine. Instances a human already moved — in progress,
//! completed, delayed, cancelled — are never touched here, which is what
//! protects a concurrent manual completion from being stomped by a stale
//! read.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use opspulse_core::error::Result;
use opspulse_store::{OpsDb, Period, TrackStatus};

use crate::clock::{business_today, due_at_utc};
use crate::escalation::{EscalationPolicy, escalate_immediate, escalate_repeats};
use crate::materializer::materialize;
use crate::notify::Notification;

/// What one sweep did.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Instances lazily materialized before evaluation.
    pub ensured: usize,
    /// pending → overdue transitions this worker won.
    pub marked_overdue: usize,
    /// Notifications this worker won the right to send.
    pub notifications: Vec<Notification>,
}

/// One full SLA sweep: lazy materialization, overdue transitions with
/// immediate alerts, then the repeat-reminder scan. Safe under overlap
/// from any number of workers.
pub fn sla_sweep(
    db: &OpsDb,
    tz: Tz,
    policy: &EscalationPolicy,
    now: DateTime<Utc>,
) -> Result<SweepOutcome> {
    let today = business_today(tz, now);
    let mut outcome = SweepOutcome::default();

    // A missed materialization tick must not freeze the day: the sweep
    // itself ensures instances exist before judging them.
    for period in [Period::Daily, Period::Weekly, Period::Monthly] {
        outcome.ensured += materialize(db, period, today)?;
    }

    for t in db.trackers_with_status(TrackStatus::Pending)? {
        let due = due_at_utc(tz, t.run_date, &t.scheduled_time);
        if now < due {
            continue;
        }
        // Guarded transition: the loser of a concurrent race sees zero
        // affected rows and must not escalate.
        if !db.mark_overdue_if_pending(t.id, now)? {
            continue;
        }
        outcome.marked_overdue += 1;
        tracing::info!(
            "⏰ {}/{} went overdue (scheduled {} {})",
            t.task_id,
            t.subtask_id,
            t.run_date,
            t.scheduled_time
        );
        db.audit(
            Some(&t.task_id),
            Some(&t.subtask_id),
            "marked_overdue",
            "system",
            &format!("scheduled {} {}", t.run_date, t.scheduled_time),
        )?;
        if let Some(n) = escalate_immediate(db, policy, &t, now)? {
            outcome.notifications.push(n);
        }
    }

    // SLA budgets are display-only for the overdue trigger; for work in
    // flight they surface as a log-level observation, nothing more.
    for t in db.trackers_with_status(TrackStatus::InProgress)? {
        if let Some(started) = t.started_at {
            let budget = Duration::minutes(t.sla_hours * 60 + t.sla_minutes);
            if budget > Duration::zero() && now >= started + budget {
                tracing::warn!(
                    "⚠️ {}/{} exceeded its SLA budget ({}h{}m) while in progress",
                    t.task_id,
                    t.subtask_id,
                    t.sla_hours,
                    t.sla_minutes
                );
            }
        }
    }

    outcome
        .notifications
        .extend(escalate_repeats(db, policy, now)?);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{seed_defs, temp_db, tz};
    use chrono::TimeZone;

    /// 2026-08-06 in +07:00, one minute past the 06:00 schedule.
    fn just_past_due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 23, 1, 0).unwrap()
    }

    fn just_before_due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 22, 59, 0).unwrap()
    }

    #[test]
    fn test_sweep_materializes_then_marks_overdue() {
        let (db, path) = temp_db("eval-mark");
        seed_defs(&db, "t1", Period::Daily, 3);

        // Before the scheduled time: rows appear, nothing goes overdue.
        let early = sla_sweep(&db, tz(), &EscalationPolicy::default(), just_before_due()).unwrap();
        assert_eq!(early.ensured, 3);
        assert_eq!(early.marked_overdue, 0);
        assert!(early.notifications.is_empty());

        // One minute past: all three flip, all three alert immediately.
        let outcome = sla_sweep(&db, tz(), &EscalationPolicy::default(), just_past_due()).unwrap();
        assert_eq!(outcome.marked_overdue, 3);
        assert_eq!(outcome.notifications.len(), 3);

        // Re-running the same sweep is a complete no-op.
        let again = sla_sweep(&db, tz(), &EscalationPolicy::default(), just_past_due()).unwrap();
        assert_eq!(again.marked_overdue, 0);
        assert!(again.notifications.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sweep_leaves_manually_moved_instances_alone() {
        let (db, path) = temp_db("eval-manual");
        seed_defs(&db, "t1", Period::Daily, 2);
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        sla_sweep(&db, tz(), &EscalationPolicy::default(), just_before_due()).unwrap();

        // A human started one subtask before it slipped.
        let t = db.tracker_by_key(date, Period::Daily, "t1", "t1-s0").unwrap().unwrap();
        db.start_tracker(t.id, &[TrackStatus::Pending], just_before_due()).unwrap();

        let outcome = sla_sweep(&db, tz(), &EscalationPolicy::default(), just_past_due()).unwrap();
        assert_eq!(outcome.marked_overdue, 1); // only the untouched one
        let started = db.tracker(t.id).unwrap().unwrap();
        assert_eq!(started.status, TrackStatus::InProgress);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_concurrent_sweeps_single_alert() {
        // N threads race full sweeps on the same file; the reservation
        // key must keep the immediate alert to exactly one send.
        let (db, path) = temp_db("eval-race");
        seed_defs(&db, "t1", Period::Daily, 1);
        drop(db);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let p = path.clone();
            handles.push(std::thread::spawn(move || {
                let db = OpsDb::open(&p).unwrap();
                let outcome =
                    sla_sweep(&db, tz(), &EscalationPolicy::default(), just_past_due()).unwrap();
                outcome.notifications.len()
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1);

        let db = OpsDb::open(&path).unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        assert_eq!(
            db.reserved_buckets("t1", "t1-s0", &format!("overdue#{date}")).unwrap(),
            vec![-1]
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_settlement_scenario() {
        // "Daily Settlement" / "Report Gen" at 06:00: overdue at 06:01,
        // bucket -1 reserved; repeat at 06:16 reserves bucket 0; manual
        // completion at 06:20 stops all further reservations.
        let (db, path) = temp_db("eval-scenario");
        seed_defs(&db, "settle", Period::Daily, 1);
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let grp = format!("overdue#{date}");
        let policy = EscalationPolicy::default();

        let t0601 = just_past_due();
        let first = sla_sweep(&db, tz(), &policy, t0601).unwrap();
        assert_eq!(first.marked_overdue, 1);
        assert_eq!(first.notifications.len(), 1);
        assert_eq!(db.reserved_buckets("settle", "settle-s0", &grp).unwrap(), vec![-1]);

        let t0616 = t0601 + Duration::minutes(15);
        let second = sla_sweep(&db, tz(), &policy, t0616).unwrap();
        assert_eq!(second.marked_overdue, 0);
        assert_eq!(second.notifications.len(), 1);
        assert_eq!(db.reserved_buckets("settle", "settle-s0", &grp).unwrap(), vec![-1, 0]);

        let t0620 = t0601 + Duration::minutes(19);
        let tracker = db.tracker_by_key(date, Period::Daily, "settle", "settle-s0").unwrap().unwrap();
        assert!(db.complete_tracker(tracker.id, &[TrackStatus::Overdue], t0620).unwrap());

        // Sweeps long after completion reserve nothing further.
        let t0700 = t0601 + Duration::minutes(59);
        let later = sla_sweep(&db, tz(), &policy, t0700).unwrap();
        assert!(later.notifications.is_empty());
        assert_eq!(db.reserved_buckets("settle", "settle-s0", &grp).unwrap(), vec![-1, 0]);
        std::fs::remove_file(&path).ok();
    }
}
