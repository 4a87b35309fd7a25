//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store file could not be read or written.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file could not be serialized or deserialized.
    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Schedule already exists.
    #[error("schedule already exists: {0}")]
    ScheduleExists(String),

    /// Schedule not found.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// Start time did not parse as HH:MM 24-hour.
    #[error("invalid start time '{0}', expected HH:MM (24-hour)")]
    InvalidTime(String),

    /// Duration did not parse as a positive value with an optional
    /// minute/hour/day suffix.
    #[error("invalid duration '{0}', expected e.g. 30m, 2h, 1d or plain minutes")]
    InvalidDuration(String),

    /// Invalid schedule configuration.
    #[error("invalid schedule configuration: {0}")]
    InvalidConfig(String),
}
