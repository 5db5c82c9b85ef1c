//! Instance materializer.
//!
//! Turns templates into the day's tracked instances. Safe to run from
//! anywhere, any number of times: creation is insert-if-absent on the
//! (run_date, period, task, subtask) key, and existing rows are never
//! touched. The scheduled triggers call it on a cadence; the evaluator
//! and manual actions call it lazily so a missed tick can't freeze a
//! task's day.

use chrono::{Datelike, Duration, NaiveDate};
use opspulse_core::error::Result;
use opspulse_store::{NewTracker, OpsDb, Period, TaskTemplate, TrackStatus};

/// The run date anchoring instance identity for `period` on `today`:
/// daily → today, weekly → Monday of today's week, monthly → first of
/// today's month. Lazy creation and the scheduled triggers both go
/// through this, so they always agree on which row is "current".
pub fn run_date_for(period: Period, today: NaiveDate) -> NaiveDate {
    match period {
        Period::Daily => today,
        Period::Weekly => today - Duration::days(today.weekday().num_days_from_monday() as i64),
        Period::Monthly => today.with_day(1).unwrap_or(today),
    }
}

/// Seed every subtask row of one template for `run_date`. Returns how
/// many rows were actually created.
fn seed_task(db: &OpsDb, template: &TaskTemplate, run_date: NaiveDate) -> Result<usize> {
    let mut created = 0;
    for subtask in db.subtasks_for(&template.id)? {
        let fresh = db.insert_tracker_if_absent(&NewTracker {
            run_date,
            period: template.period,
            task_id: template.id.clone(),
            subtask_id: subtask.id.clone(),
            scheduled_time: subtask.scheduled_time.clone(),
            sla_hours: subtask.sla_hours,
            sla_minutes: subtask.sla_minutes,
            owner: template.owner.clone(),
            report_managers: template.report_managers.clone(),
            escalation_managers: template.escalation_managers.clone(),
        })?;
        if fresh {
            created += 1;
        }
    }
    if created > 0 {
        tracing::info!("📋 Materialized {} instance(s) of '{}' for {}", created, template.name, run_date);
        db.audit(
            Some(&template.id),
            None,
            "materialized",
            "system",
            &format!("{created} instance(s) for {run_date}"),
        )?;
    }
    Ok(created)
}

/// Ensure instances exist for every active template of `period` whose
/// effective-from date has passed. Idempotent.
pub fn materialize(db: &OpsDb, period: Period, today: NaiveDate) -> Result<usize> {
    let run_date = run_date_for(period, today);
    let mut created = 0;
    for template in db.active_templates(period, today)? {
        created += seed_task(db, &template, run_date)?;
    }
    Ok(created)
}

/// Lazily ensure one task's current instances exist. Any code path that
/// reads a task intraday calls this first.
pub fn ensure_task_current(db: &OpsDb, task_id: &str, today: NaiveDate) -> Result<usize> {
    let Some(template) = db.template(task_id)? else {
        return Ok(0);
    };
    if !template.active || template.effective_from > today {
        return Ok(0);
    }
    seed_task(db, &template, run_date_for(template.period, today))
}

/// Same-day reset for finished daily tasks: once every instance of a
/// daily task is completed for `today`, pre-create tomorrow's row set
/// from the template's *current* metadata, and clear the task's spent
/// alert reservations so the next cycle's campaign starts clean.
pub fn rollover_completed_daily(db: &OpsDb, today: NaiveDate) -> Result<usize> {
    let tomorrow = today + Duration::days(1);
    let mut created = 0;
    for template in db.active_templates(Period::Daily, today)? {
        let rows = db.trackers_for_task(&template.id, today)?;
        if rows.is_empty() || rows.iter().any(|t| t.status != TrackStatus::Completed) {
            continue;
        }
        let fresh = seed_task(db, &template, tomorrow)?;
        if fresh > 0 {
            db.clear_task_reservations(&template.id)?;
            tracing::info!("🔄 Rolled '{}' over to {}", template.name, tomorrow);
            db.audit(
                Some(&template.id),
                None,
                "rollover",
                "system",
                &format!("pre-created {fresh} instance(s) for {tomorrow}"),
            )?;
        }
        created += fresh;
    }
    Ok(created)
}
