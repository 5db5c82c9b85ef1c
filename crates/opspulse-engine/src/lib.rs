//! # OpsPulse Engine
//!
//! The tracking core: materializes recurring checklist instances for each
//! business day, drives the per-subtask SLA state machine, and escalates
//! overdue work to human owners with store-gated at-most-once delivery.
//!
//! Everything here is driven by the scheduler crate at fixed cadences and
//! is safe to re-run: materialization is insert-if-absent, status
//! transitions are guarded compare-and-sets, and alert sends are gated by
//! reservation rows. Sweeps return the notifications they won the right
//! to send; actual delivery is the caller's (scheduler's) job and its
//! failures never roll anything back.

pub mod clock;
#[cfg(test)]
pub(crate) mod test_fixtures;
pub mod escalation;
pub mod evaluator;
pub mod materializer;
pub mod notify;
pub mod recipients;
pub mod rollup;
pub mod status;

pub use escalation::{EscalationPolicy, NoticeKind, OVERDUE_GROUP, bucket_for};
pub use evaluator::{SweepOutcome, sla_sweep};
pub use materializer::{ensure_task_current, materialize, rollover_completed_daily, run_date_for};
pub use notify::{Notification, Notifier, NotifyPriority, NullNotifier, WebhookNotifier};
pub use recipients::{Resolution, resolve};
pub use rollup::{derive_status, rollup_task_statuses};
pub use status::{ManualUpdate, apply_manual};
