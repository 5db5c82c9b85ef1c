//! OpsPulse error types.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OpsPulseError>;

/// All OpsPulse errors.
#[derive(Error, Debug)]
pub enum OpsPulseError {
    /// Relational store failure (open, migrate, query).
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration load/parse failure.
    #[error("Config error: {0}")]
    Config(String),

    /// Outbound notification failure.
    #[error("Notify error: {0}")]
    Notify(String),

    /// Rejected manual status transition or bad input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
