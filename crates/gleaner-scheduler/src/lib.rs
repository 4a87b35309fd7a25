//! Scheduling engine for Gleaner.
//!
//! This crate provides a persistent polling scheduler that:
//! - Stores schedules as a JSON file with atomic writes
//! - Detects conflicts between predicted execution windows
//! - Suggests safe alternative start times around conflicts
//! - Runs due schedules through a pluggable job runner

mod conflict;
mod error;
mod executor;
mod scheduler;
mod sequence;
mod store;
mod suggest;
mod types;

pub use conflict::{Conflict, Probe, Window, detect_conflicts, overlaps, slot_is_safe, window};
pub use error::SchedulerError;
pub use executor::{CommandRunner, Executor, JobRunner, RunReport};
pub use scheduler::Scheduler;
pub use sequence::sequential_time;
pub use store::ScheduleStore;
pub use suggest::suggest_safe_times;
pub use types::{
    DurationUnit, RunKind, Schedule, estimate_run_minutes, format_duration, parse_duration,
    parse_start_time,
};
