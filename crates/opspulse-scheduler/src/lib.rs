//! # OpsPulse Scheduler
//!
//! Drives the engine at fixed cadences: fast SLA sweep, a slower
//! redundant sweep, daily/weekly/monthly materialization, task-status
//! rollup, and retention cleanup. Each trigger is idempotent, guarded
//! against in-process self-overlap with an atomic flag, and the SLA
//! sweep additionally holds a cluster-wide lease so exactly one process
//! in the fleet evaluates and escalates per tick.

pub mod engine;

pub use engine::Scheduler;
