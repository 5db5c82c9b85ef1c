//! Manual status actions.
//!
//! The only way an instance moves to in_progress, completed, delayed, or
//! cancelled is a human-driven call landing here. Validation is the
//! state machine; the store's guarded UPDATE is the referee when two
//! updates race.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use opspulse_core::error::{OpsPulseError, Result};
use opspulse_store::{OpsDb, TrackStatus, Tracker};

use crate::clock::business_today;
use crate::escalation::{EscalationPolicy, NoticeKind, status_notice};
use crate::materializer::{ensure_task_current, run_date_for};
use crate::notify::Notification;

/// One user-driven status change.
#[derive(Debug, Clone)]
pub struct ManualUpdate {
    pub task_id: String,
    pub subtask_id: String,
    pub new_status: TrackStatus,
    pub actor: String,
    /// Required when `new_status` is `Delayed`.
    pub reason: Option<String>,
}

/// States a manual transition may start from, per target.
fn allowed_from(target: TrackStatus) -> &'static [TrackStatus] {
    match target {
        TrackStatus::InProgress => &[TrackStatus::Pending, TrackStatus::Overdue],
        TrackStatus::Completed => &[TrackStatus::InProgress, TrackStatus::Overdue],
        TrackStatus::Delayed => &[TrackStatus::Pending, TrackStatus::InProgress],
        TrackStatus::Cancelled => &[
            TrackStatus::Pending,
            TrackStatus::InProgress,
            TrackStatus::Overdue,
            TrackStatus::Delayed,
        ],
        // pending/overdue are never manual targets
        _ => &[],
    }
}

/// Apply a manual status change to the task's *current* instance,
/// materializing it lazily first. On success returns the one-shot
/// notification (completed/delayed) the caller should dispatch, if one
/// is due.
pub fn apply_manual(
    db: &OpsDb,
    tz: Tz,
    policy: &EscalationPolicy,
    update: &ManualUpdate,
    now: DateTime<Utc>,
) -> Result<Option<Notification>> {
    let today = business_today(tz, now);
    ensure_task_current(db, &update.task_id, today)?;

    let template = db.template(&update.task_id)?.ok_or_else(|| {
        OpsPulseError::Validation(format!("Unknown task '{}'", update.task_id))
    })?;
    let run_date = run_date_for(template.period, today);
    let tracker: Tracker = db
        .tracker_by_key(run_date, template.period, &update.task_id, &update.subtask_id)?
        .ok_or_else(|| {
            OpsPulseError::Validation(format!(
                "No instance of {}/{} for {run_date}",
                update.task_id, update.subtask_id
            ))
        })?;

    let from = allowed_from(update.new_status);
    if from.is_empty() {
        return Err(OpsPulseError::Validation(format!(
            "'{}' is not a manual target status",
            update.new_status.as_str()
        )));
    }

    let applied = match update.new_status {
        TrackStatus::InProgress => db.start_tracker(tracker.id, from, now)?,
        TrackStatus::Completed => db.complete_tracker(tracker.id, from, now)?,
        TrackStatus::Delayed => {
            let reason = update
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| {
                    OpsPulseError::Validation("A reason is required to delay an instance".into())
                })?;
            db.delay_tracker(tracker.id, from, reason, now)?
        }
        TrackStatus::Cancelled => db.cancel_tracker(tracker.id, from, now)?,
        _ => unreachable!("filtered above"),
    };

    if !applied {
        return Err(OpsPulseError::Validation(format!(
            "Cannot move {}/{} from '{}' to '{}'",
            update.task_id,
            update.subtask_id,
            tracker.status.as_str(),
            update.new_status.as_str()
        )));
    }

    tracing::info!(
        "✏️ {} set {}/{} to {}",
        update.actor,
        update.task_id,
        update.subtask_id,
        update.new_status.as_str()
    );
    db.audit(
        Some(&update.task_id),
        Some(&update.subtask_id),
        &format!("status_{}", update.new_status.as_str()),
        &update.actor,
        update.reason.as_deref().unwrap_or(""),
    )?;

    let refreshed = db.tracker(tracker.id)?.unwrap_or(tracker);
    match update.new_status {
        TrackStatus::Completed => status_notice(db, policy, &refreshed, NoticeKind::Completed, now),
        TrackStatus::Delayed => status_notice(db, policy, &refreshed, NoticeKind::Delayed, now),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{seed_defs, temp_db, tz};
    use opspulse_store::Period;

    fn update(task: &str, subtask: &str, to: TrackStatus, reason: Option<&str>) -> ManualUpdate {
        ManualUpdate {
            task_id: task.into(),
            subtask_id: subtask.into(),
            new_status: to,
            actor: "alice".into(),
            reason: reason.map(String::from),
        }
    }

    #[test]
    fn test_lazy_materialization_then_start() {
        let (db, path) = temp_db("status-lazy");
        seed_defs(&db, "t1", Period::Daily, 1);
        let now = Utc::now();
        let policy = EscalationPolicy::default();

        // No scheduled trigger has run, yet the action succeeds.
        let out = apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::InProgress, None), now);
        assert!(out.unwrap().is_none());

        let today = business_today(tz(), now);
        let t = db.tracker_by_key(today, Period::Daily, "t1", "t1-s0").unwrap().unwrap();
        assert_eq!(t.status, TrackStatus::InProgress);
        assert!(t.started_at.is_some());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_delay_requires_reason() {
        let (db, path) = temp_db("status-reason");
        seed_defs(&db, "t1", Period::Daily, 1);
        let now = Utc::now();
        let policy = EscalationPolicy::default();

        let missing = apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Delayed, None), now);
        assert!(matches!(missing, Err(OpsPulseError::Validation(_))));
        let blank = apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Delayed, Some("  ")), now);
        assert!(matches!(blank, Err(OpsPulseError::Validation(_))));

        let ok = apply_manual(
            &db,
            tz(),
            &policy,
            &update("t1", "t1-s0", TrackStatus::Delayed, Some("vendor outage")),
            now,
        )
        .unwrap();
        // Delayed emits a one-shot notice.
        assert!(ok.is_some());
        assert!(ok.unwrap().body.contains("vendor outage"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_validation_matrix() {
        let (db, path) = temp_db("status-matrix");
        seed_defs(&db, "t1", Period::Daily, 1);
        let now = Utc::now();
        let policy = EscalationPolicy::default();

        // pending → completed is not allowed
        assert!(apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Completed, None), now).is_err());
        // pending/overdue are not manual targets
        assert!(apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Pending, None), now).is_err());
        assert!(apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Overdue, None), now).is_err());

        apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::InProgress, None), now).unwrap();
        let notice = apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Completed, None), now).unwrap();
        assert!(notice.is_some());

        // completed is terminal for the day
        assert!(apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Cancelled, None), now).is_err());
        assert!(apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::InProgress, None), now).is_err());

        // unknown task/subtask
        assert!(apply_manual(&db, tz(), &policy, &update("nope", "s", TrackStatus::InProgress, None), now).is_err());
        assert!(apply_manual(&db, tz(), &policy, &update("t1", "nope", TrackStatus::InProgress, None), now).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_overdue_can_still_be_completed() {
        let (db, path) = temp_db("status-overdue");
        seed_defs(&db, "t1", Period::Daily, 1);
        let now = Utc::now();
        let policy = EscalationPolicy::default();
        let today = business_today(tz(), now);

        crate::materializer::materialize(&db, Period::Daily, today).unwrap();
        let t = db.tracker_by_key(today, Period::Daily, "t1", "t1-s0").unwrap().unwrap();
        db.mark_overdue_if_pending(t.id, now).unwrap();

        let notice = apply_manual(&db, tz(), &policy, &update("t1", "t1-s0", TrackStatus::Completed, None), now).unwrap();
        assert!(notice.is_some());
        assert_eq!(db.tracker(t.id).unwrap().unwrap().status, TrackStatus::Completed);
        std::fs::remove_file(&path).ok();
    }
}
