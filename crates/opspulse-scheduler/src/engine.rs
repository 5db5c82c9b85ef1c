//! Scheduler engine — the periodic trigger loops.
//!
//! A trigger that cannot run (overlap flag set, cluster lock held, store
//! down) skips its tick instead of waiting or crashing; the next tick is
//! always imminent, so no retry/backoff state is kept anywhere.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use opspulse_core::OpsPulseConfig;
use opspulse_core::error::Result;
use opspulse_engine::escalation::EscalationPolicy;
use opspulse_engine::evaluator::sla_sweep;
use opspulse_engine::materializer::{materialize, rollover_completed_daily};
use opspulse_engine::notify::{Notification, Notifier};
use opspulse_engine::rollup::rollup_task_statuses;
use opspulse_store::{OpsDb, Period};

/// Cluster lease name serializing evaluation + escalation fleet-wide.
const SLA_SWEEP_LOCK: &str = "sla_sweep";

static HOLDER_SEQ: AtomicU64 = AtomicU64::new(0);

fn every(secs: u64) -> tokio::time::Interval {
    tokio::time::interval(std::time::Duration::from_secs(secs.max(1)))
}

/// One process's scheduler. Spawn the loops with [`Scheduler::spawn_all`]
/// or drive individual triggers directly (one-shot CLI, tests).
pub struct Scheduler {
    db: Arc<OpsDb>,
    tz: Tz,
    policy: EscalationPolicy,
    config: OpsPulseConfig,
    notifier: Arc<dyn Notifier>,
    holder: String,
    // "currently running" flags per trigger family; compare-and-set so
    // an overlapping tick skips instead of queueing. The fast and
    // redundant SLA sweeps share one flag: one sweep at a time per
    // process.
    sweep_running: AtomicBool,
    materialize_running: AtomicBool,
    rollup_running: AtomicBool,
    cleanup_running: AtomicBool,
}

impl Scheduler {
    /// Build a scheduler for this process.
    pub fn new(db: Arc<OpsDb>, config: OpsPulseConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let tz = config.timezone()?;
        let holder = format!(
            "worker-{}-{}",
            std::process::id(),
            HOLDER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        Ok(Self {
            db,
            tz,
            policy: EscalationPolicy::from(&config.escalation),
            config,
            notifier,
            holder,
            sweep_running: AtomicBool::new(false),
            materialize_running: AtomicBool::new(false),
            rollup_running: AtomicBool::new(false),
            cleanup_running: AtomicBool::new(false),
        })
    }

    /// Try to claim a trigger flag. `false` means a sibling tick of the
    /// same family is still running in this process.
    fn claim(flag: &AtomicBool) -> bool {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deliver won notifications. Failures are logged and dropped — the
    /// reservation already happened and is never rolled back.
    async fn dispatch(&self, notifications: Vec<Notification>) {
        for n in notifications {
            if let Err(e) = self.notifier.deliver(&n).await {
                tracing::warn!("⚠️ Delivery failed for '{}' ({}): {e}", n.title, n.campaign);
            }
        }
    }

    /// SLA sweep tick: evaluator + escalation, behind the in-process flag
    /// and the cluster lease. `label` distinguishes the fast sweep from
    /// the redundant one in logs.
    pub async fn run_sla_sweep(&self, label: &str) {
        if !Self::claim(&self.sweep_running) {
            tracing::debug!("{label}: previous sweep still running, skipping tick");
            return;
        }

        let now = Utc::now();
        let swept = match self.db.try_acquire_lock(
            SLA_SWEEP_LOCK,
            &self.holder,
            self.config.escalation.lock_ttl_secs,
            now,
        ) {
            Ok(true) => {
                let outcome = sla_sweep(&self.db, self.tz, &self.policy, now);
                if let Err(e) = self.db.release_lock(SLA_SWEEP_LOCK, &self.holder) {
                    tracing::warn!("{label}: lock release failed: {e}");
                }
                match outcome {
                    Ok(outcome) => {
                        if outcome.marked_overdue > 0 {
                            tracing::info!(
                                "{label}: {} instance(s) marked overdue, {} alert(s) won",
                                outcome.marked_overdue,
                                outcome.notifications.len()
                            );
                        }
                        Some(outcome.notifications)
                    }
                    Err(e) => {
                        tracing::warn!("{label}: sweep failed, contributing nothing this tick: {e}");
                        None
                    }
                }
            }
            Ok(false) => {
                tracing::debug!("{label}: cluster lock held elsewhere, skipping tick");
                None
            }
            Err(e) => {
                tracing::warn!("{label}: lock acquisition failed: {e}");
                None
            }
        };

        self.sweep_running.store(false, Ordering::Release);
        if let Some(notifications) = swept {
            self.dispatch(notifications).await;
        }
    }

    /// Materialization tick for one period. The daily tick also runs the
    /// same-day rollover for fully completed tasks.
    pub async fn run_materialization(&self, period: Period) {
        if !Self::claim(&self.materialize_running) {
            return;
        }
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        if let Err(e) = materialize(&self.db, period, today) {
            tracing::warn!("Materialization ({}) failed: {e}", period.as_str());
        } else if period == Period::Daily {
            if let Err(e) = rollover_completed_daily(&self.db, today) {
                tracing::warn!("Rollover failed: {e}");
            }
        }
        self.materialize_running.store(false, Ordering::Release);
    }

    /// Task aggregate-status rollup tick.
    pub async fn run_rollup(&self) {
        if !Self::claim(&self.rollup_running) {
            return;
        }
        match rollup_task_statuses(&self.db, self.tz, Utc::now()) {
            Ok(changed) if changed > 0 => tracing::info!("📊 Rolled up {changed} task status(es)"),
            Ok(_) => {}
            Err(e) => tracing::warn!("Rollup failed: {e}"),
        }
        self.rollup_running.store(false, Ordering::Release);
    }

    /// Retention cleanup tick: stale audit rows, spent reservations,
    /// expired leases.
    pub async fn run_cleanup(&self) {
        if !Self::claim(&self.cleanup_running) {
            return;
        }
        let now = Utc::now();
        let audit_cutoff = now - Duration::days(self.config.retention.audit_days);
        let reservation_cutoff = now - Duration::hours(self.config.retention.reservation_hours);
        let audit = self.db.prune_audit(audit_cutoff);
        let reservations = self.db.prune_reservations(reservation_cutoff);
        let locks = self.db.prune_expired_locks(now);
        match (audit, reservations, locks) {
            (Ok(a), Ok(r), Ok(l)) => {
                if a + r + l > 0 {
                    tracing::info!("🧹 Cleanup: {a} audit row(s), {r} reservation(s), {l} lease(s)");
                }
            }
            (a, r, l) => {
                for e in [a.err(), r.err(), l.err()].into_iter().flatten() {
                    tracing::warn!("Cleanup step failed: {e}");
                }
            }
        }
        self.cleanup_running.store(false, Ordering::Release);
    }

    /// Spawn every periodic loop. Returns the join handles; dropping
    /// them detaches the loops, aborting them stops the scheduler.
    pub fn spawn_all(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let cadence = self.config.sweep.clone();
        tracing::info!(
            "⏰ Scheduler started (sla {}s, redundant {}s, materialize {}s, rollup {}s, cleanup {}s)",
            cadence.sla_sweep_secs,
            cadence.redundant_sweep_secs,
            cadence.materialize_secs,
            cadence.rollup_secs,
            cadence.cleanup_secs
        );

        let mut handles = Vec::new();

        let s = Arc::clone(self);
        let secs = cadence.sla_sweep_secs;
        handles.push(tokio::spawn(async move {
            let mut interval = every(secs);
            loop {
                interval.tick().await;
                s.run_sla_sweep("sla-sweep").await;
            }
        }));

        let s = Arc::clone(self);
        let secs = cadence.redundant_sweep_secs;
        handles.push(tokio::spawn(async move {
            let mut interval = every(secs);
            loop {
                interval.tick().await;
                s.run_sla_sweep("redundant-sweep").await;
            }
        }));

        for (period, secs) in [
            (Period::Daily, cadence.materialize_secs),
            (Period::Weekly, cadence.weekly_secs),
            (Period::Monthly, cadence.monthly_secs),
        ] {
            let s = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let mut interval = every(secs);
                loop {
                    interval.tick().await;
                    s.run_materialization(period).await;
                }
            }));
        }

        let s = Arc::clone(self);
        let secs = cadence.rollup_secs;
        handles.push(tokio::spawn(async move {
            let mut interval = every(secs);
            loop {
                interval.tick().await;
                s.run_rollup().await;
            }
        }));

        let s = Arc::clone(self);
        let secs = cadence.cleanup_secs;
        handles.push(tokio::spawn(async move {
            let mut interval = every(secs);
            loop {
                interval.tick().await;
                s.run_cleanup().await;
            }
        }));

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use opspulse_store::{DirectoryUser, SubtaskTemplate, TaskTemplate, TrackStatus};
    use std::sync::Mutex;

    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, notification: &Notification) -> std::result::Result<(), String> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn temp_db(tag: &str) -> (Arc<OpsDb>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("opspulse-sched-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        (Arc::new(OpsDb::open(&path).unwrap()), path)
    }

    /// Template scheduled at 00:00 business time: always past due today.
    fn seed_past_due(db: &OpsDb) {
        db.upsert_template(&TaskTemplate {
            id: "t1".into(),
            name: "Daily Settlement".into(),
            period: opspulse_store::Period::Daily,
            effective_from: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            active: true,
            owner: "Alice Tran".into(),
            report_managers: vec![],
            escalation_managers: vec![],
            status: "active".into(),
        })
        .unwrap();
        db.upsert_subtask(&SubtaskTemplate {
            id: "s1".into(),
            task_id: "t1".into(),
            name: "Report Gen".into(),
            position: 0,
            scheduled_time: "00:00".into(),
            sla_hours: 1,
            sla_minutes: 0,
        })
        .unwrap();
        db.upsert_user(&DirectoryUser {
            id: "u-alice".into(),
            full_name: "Alice Tran".into(),
            email: "alice.tran@example.com".into(),
        })
        .unwrap();
    }

    fn scheduler(db: &Arc<OpsDb>) -> (Arc<Scheduler>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier { sent: Mutex::new(Vec::new()) });
        let config = OpsPulseConfig::default();
        let s = Scheduler::new(Arc::clone(db), config, notifier.clone()).unwrap();
        (Arc::new(s), notifier)
    }

    #[tokio::test]
    async fn test_two_schedulers_one_alert() {
        let (db, path) = temp_db("fleet");
        seed_past_due(&db);
        let (a, notifier_a) = scheduler(&db);
        let (b, notifier_b) = scheduler(&db);

        // Two "processes" tick at the same instant. Whichever loses the
        // lock skips; a later winner re-sweeping finds nothing left.
        tokio::join!(a.run_sla_sweep("sla-sweep"), b.run_sla_sweep("sla-sweep"));

        let total = notifier_a.sent.lock().unwrap().len() + notifier_b.sent.lock().unwrap().len();
        assert_eq!(total, 1);

        // Exactly one marked_overdue audit entry, no duplicates.
        let marks = db
            .recent_audit(50)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == "marked_overdue")
            .count();
        assert_eq!(marks, 1);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_sweep_skips_while_lock_held_elsewhere() {
        let (db, path) = temp_db("lockskip");
        seed_past_due(&db);
        let (s, notifier) = scheduler(&db);

        // Another process in the fleet holds the lease.
        assert!(db.try_acquire_lock(SLA_SWEEP_LOCK, "other-process", 120, Utc::now()).unwrap());
        s.run_sla_sweep("sla-sweep").await;

        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(db.recent_audit(50).unwrap().is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_materialization_and_cleanup_ticks() {
        let (db, path) = temp_db("ticks");
        seed_past_due(&db);
        let (s, _notifier) = scheduler(&db);

        s.run_materialization(opspulse_store::Period::Daily).await;
        let today = Utc::now().with_timezone(&s.tz).date_naive();
        let rows = db.trackers_for_task("t1", today).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TrackStatus::Pending);

        s.run_rollup().await;
        assert_eq!(db.template("t1").unwrap().unwrap().status, "active");

        // Cleanup with default retention touches nothing fresh.
        s.run_cleanup().await;
        assert_eq!(db.trackers_for_task("t1", today).unwrap().len(), 1);
        std::fs::remove_file(&path).ok();
    }
}
