//! # OpsPulse Store
//!
//! SQLite persistence for the operations tracker. One database file holds
//! the task/subtask definitions (read-only from the engine's perspective),
//! the per-day tracked instances, alert reservations, the append-only
//! audit log, the sweep lease locks, and the user directory.
//!
//! All cross-process coordination lives here as store-level constructs:
//! composite unique keys, `INSERT ... ON CONFLICT DO NOTHING` reservation
//! slots, guarded compare-and-set UPDATEs, and a lease table for the
//! cluster-wide sweep lock. Worker processes hold no shared memory.

pub mod audit;
pub mod db;
pub mod directory;
pub mod locks;
pub mod reservations;
pub mod templates;
pub mod trackers;

pub use audit::AuditEntry;
pub use db::OpsDb;
pub use directory::DirectoryUser;
pub use reservations::AlertReservation;
pub use templates::{Period, SubtaskTemplate, TaskTemplate, parse_name_list};
pub use trackers::{NewTracker, TrackStatus, Tracker};
