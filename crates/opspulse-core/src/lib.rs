//! # OpsPulse Core
//!
//! Shared foundation for the OpsPulse operations tracker: configuration
//! and the crate-wide error type. Everything else (store, engine,
//! scheduler) builds on these.

pub mod config;
pub mod error;

pub use config::OpsPulseConfig;
pub use error::{OpsPulseError, Result};
