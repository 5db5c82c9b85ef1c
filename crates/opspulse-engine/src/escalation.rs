//! Escalation / dedup engine.
//!
//! For every overdue instance the engine decides whether a notification
//! is due *now*, reserves the unique alert slot for it, and only the
//! worker whose INSERT landed builds the outbound notification. Repeat
//! reminders use time-bucket numbers that are a pure function of how long
//! the instance has been overdue, so overlapping sweeps can never
//! double-send and the reserved set stays gap-free.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use opspulse_core::error::Result;
use opspulse_store::reservations::IMMEDIATE_BUCKET;
use opspulse_store::{OpsDb, TrackStatus, Tracker};

use crate::notify::{Notification, NotifyPriority};
use crate::recipients::{Resolution, resolve};

/// Campaign family for schedule-slip alerts.
pub const OVERDUE_GROUP: &str = "overdue";

/// Escalation cadence knobs.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    /// Minutes after the immediate alert before repeats become eligible.
    pub initial_delay_minutes: i64,
    /// Minutes between repeat reminders.
    pub repeat_interval_minutes: i64,
    /// Audit-window suppression for one-shot status notices.
    pub oneshot_window_minutes: i64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            initial_delay_minutes: 15,
            repeat_interval_minutes: 15,
            oneshot_window_minutes: 10,
        }
    }
}

impl From<&opspulse_core::config::EscalationConfig> for EscalationPolicy {
    fn from(cfg: &opspulse_core::config::EscalationConfig) -> Self {
        Self {
            initial_delay_minutes: cfg.initial_delay_minutes,
            repeat_interval_minutes: cfg.repeat_interval_minutes,
            oneshot_window_minutes: cfg.oneshot_window_minutes,
        }
    }
}

/// Repeat bucket for an instance overdue this many minutes, or None while
/// still inside the initial delay. Bucket 0 becomes eligible the moment
/// the initial delay elapses, then one more per repeat interval. Pure —
/// every worker computes the same bucket from the same clock, and the
/// reservation key does the rest.
pub fn bucket_for(minutes_overdue: i64, policy: &EscalationPolicy) -> Option<i64> {
    if minutes_overdue < policy.initial_delay_minutes {
        return None;
    }
    Some((minutes_overdue - policy.initial_delay_minutes) / policy.repeat_interval_minutes)
}

/// One campaign per (group, cycle run-date): yesterday's reservations can
/// never shadow today's alerts, and retention cleanup stays pure hygiene.
fn campaign(group: &str, run_date: NaiveDate) -> String {
    format!("{group}#{run_date}")
}

/// Human labels for a tracker, falling back to raw ids when the template
/// was deleted out from under us.
fn labels(db: &OpsDb, t: &Tracker) -> (String, String, bool) {
    match db.template(&t.task_id) {
        Ok(Some(template)) => {
            let subtask = db
                .subtasks_for(&t.task_id)
                .ok()
                .and_then(|subs| subs.into_iter().find(|s| s.id == t.subtask_id))
                .map(|s| s.name)
                .unwrap_or_else(|| t.subtask_id.clone());
            (template.name, subtask, true)
        }
        _ => (t.task_id.clone(), t.subtask_id.clone(), false),
    }
}

/// Snapshot audience of an instance: owner ∪ report managers ∪ escalation
/// managers, input order, deduplicated.
fn audience(t: &Tracker) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |n: &str| {
        let n = n.trim();
        if !n.is_empty() && !names.iter().any(|x| x == n) {
            names.push(n.to_string());
        }
    };
    push(&t.owner);
    t.report_managers.iter().for_each(|n| push(n));
    t.escalation_managers.iter().for_each(|n| push(n));
    names
}

/// Resolve the audience against the directory; unresolved names are
/// logged and skipped, never fatal.
fn recipients_for(db: &OpsDb, t: &Tracker) -> Result<Resolution> {
    let directory = db.users()?;
    let resolution = resolve(&audience(t), &directory);
    if !resolution.unresolved.is_empty() {
        tracing::warn!(
            "⚠️ Unresolved alert recipients for {}/{}: {:?}",
            t.task_id,
            t.subtask_id,
            resolution.unresolved
        );
    }
    Ok(resolution)
}

/// Record an alert decision, degrading to an orphan entry if the parent
/// task is gone.
fn audit_alert(db: &OpsDb, t: &Tracker, template_exists: bool, action: &str, detail: &str) -> Result<()> {
    if template_exists {
        db.audit(Some(&t.task_id), Some(&t.subtask_id), action, "system", detail)
    } else {
        db.audit_orphaned(&t.task_id, Some(&t.subtask_id), action, "system", detail)
    }
}

fn build_notification(
    title: String,
    body: String,
    campaign: String,
    recipients: Vec<String>,
    priority: NotifyPriority,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        title,
        body,
        campaign,
        recipients,
        priority,
        timestamp: now,
    }
}

/// Immediate (bucket −1) alert for an instance that just went overdue.
/// Exactly one concurrent caller gets `Some(..)` back; everyone else
/// lost the reservation race and returns None.
pub fn escalate_immediate(
    db: &OpsDb,
    policy: &EscalationPolicy,
    t: &Tracker,
    now: DateTime<Utc>,
) -> Result<Option<Notification>> {
    let grp = campaign(OVERDUE_GROUP, t.run_date);
    let (task_name, subtask_name, template_exists) = labels(db, t);
    let title = format!("⏰ Overdue: {task_name} / {subtask_name}");
    let repeats_from = now + Duration::minutes(policy.initial_delay_minutes);

    if !db.try_reserve_alert(&t.task_id, &t.subtask_id, &grp, IMMEDIATE_BUCKET, &title, Some(repeats_from))? {
        return Ok(None);
    }

    audit_alert(db, t, template_exists, "overdue_alert", "bucket -1 reserved")?;

    let resolution = recipients_for(db, t)?;
    if resolution.resolved.is_empty() {
        tracing::warn!("⚠️ No resolvable recipients for {grp}, alert reserved but undeliverable");
        return Ok(None);
    }
    let body = format!(
        "'{subtask_name}' of '{task_name}' was scheduled for {} on {} and has not started.",
        t.scheduled_time, t.run_date
    );
    Ok(Some(build_notification(
        title,
        body,
        grp,
        resolution.ids(),
        NotifyPriority::High,
        now,
    )))
}

/// Repeat-reminder scan across every still-overdue instance. For each,
/// computes the current bucket from elapsed time, silently back-fills any
/// buckets a stalled scheduler skipped (keeps the reserved set gap-free
/// without re-firing stale reminders), and notifies only on winning the
/// current bucket.
pub fn escalate_repeats(
    db: &OpsDb,
    policy: &EscalationPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<Notification>> {
    let mut out = Vec::new();
    for t in db.trackers_with_status(TrackStatus::Overdue)? {
        let minutes_overdue = (now - t.updated_at).num_minutes();
        let Some(bucket) = bucket_for(minutes_overdue, policy) else {
            continue;
        };
        let grp = campaign(OVERDUE_GROUP, t.run_date);
        let (task_name, subtask_name, template_exists) = labels(db, &t);
        let title = format!("🔁 Still overdue: {task_name} / {subtask_name}");

        for missed in 0..bucket {
            db.try_reserve_alert(&t.task_id, &t.subtask_id, &grp, missed, &title, None)?;
        }

        if !db.try_reserve_alert(
            &t.task_id,
            &t.subtask_id,
            &grp,
            bucket,
            &title,
            Some(now + Duration::minutes(policy.repeat_interval_minutes)),
        )? {
            continue;
        }

        // The campaign's next-eligible marker rides on the immediate row.
        db.push_next_call(
            &t.task_id,
            &t.subtask_id,
            &grp,
            IMMEDIATE_BUCKET,
            now + Duration::minutes(policy.repeat_interval_minutes),
        )?;
        audit_alert(db, &t, template_exists, "overdue_repeat", &format!("bucket {bucket} reserved"))?;

        let resolution = recipients_for(db, &t)?;
        if resolution.resolved.is_empty() {
            continue;
        }
        let body = format!(
            "'{subtask_name}' of '{task_name}' has been overdue for {minutes_overdue} minutes (reminder #{}).",
            bucket + 1
        );
        out.push(build_notification(
            title,
            body,
            grp,
            resolution.ids(),
            NotifyPriority::Urgent,
            now,
        ));
    }
    Ok(out)
}

/// Which one-shot notice a manual transition produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Completed,
    Delayed,
}

impl NoticeKind {
    fn action(&self) -> &'static str {
        match self {
            NoticeKind::Completed => "completed_notice",
            NoticeKind::Delayed => "delayed_notice",
        }
    }
}

/// One-shot notification for a completed/delayed transition. Uses the
/// audit-log window check as best-effort duplicate suppression — weaker
/// than the bucket gate, fine for non-repeating events.
pub fn status_notice(
    db: &OpsDb,
    policy: &EscalationPolicy,
    t: &Tracker,
    kind: NoticeKind,
    now: DateTime<Utc>,
) -> Result<Option<Notification>> {
    let action = kind.action();
    let since = now - Duration::minutes(policy.oneshot_window_minutes);
    if db.recently_logged(&t.task_id, &t.subtask_id, action, since)? {
        tracing::debug!("Suppressed duplicate {action} for {}/{}", t.task_id, t.subtask_id);
        return Ok(None);
    }

    let (task_name, subtask_name, template_exists) = labels(db, t);
    audit_alert(db, t, template_exists, action, "notice sent")?;

    let resolution = recipients_for(db, t)?;
    if resolution.resolved.is_empty() {
        return Ok(None);
    }
    let (title, body, priority) = match kind {
        NoticeKind::Completed => (
            format!("✅ Completed: {task_name} / {subtask_name}"),
            format!("'{subtask_name}' of '{task_name}' finished at {}.", now.format("%H:%M UTC")),
            NotifyPriority::Normal,
        ),
        NoticeKind::Delayed => (
            format!("🕓 Delayed: {task_name} / {subtask_name}"),
            format!(
                "'{subtask_name}' of '{task_name}' was delayed: {}",
                t.delay_reason.as_deref().unwrap_or("no reason recorded")
            ),
            NotifyPriority::High,
        ),
    };
    Ok(Some(build_notification(
        title,
        body,
        campaign(action, t.run_date),
        resolution.ids(),
        priority,
        now,
    )))
}
