//! Execution-window math and conflict detection.

use std::fmt;

use chrono::{Duration, NaiveTime};
use tracing::debug;

use crate::Schedule;

/// A predicted half-open execution window `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// The minimal fields needed to test a start time for conflicts.
///
/// Conflict checks on hypothetical times use a probe instead of building a
/// throwaway `Schedule` record.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub start_time: NaiveTime,
    pub estimated_duration_minutes: u32,
}

impl Probe {
    pub fn of(schedule: &Schedule) -> Self {
        Self {
            start_time: schedule.start_time,
            estimated_duration_minutes: schedule.estimated_duration_minutes,
        }
    }

    /// A probe at a different start time with the same predicted duration.
    pub fn at(self, start_time: NaiveTime) -> Self {
        Self { start_time, ..self }
    }
}

/// A detected conflict with another active schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Both schedules declare the same start time. Simultaneous starts are
    /// always unsafe, so this is reported independently of window overlap.
    SameStart { name: String, start: NaiveTime },
    /// The predicted execution windows overlap.
    WindowOverlap { name: String },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::SameStart { name, start } => {
                write!(f, "direct time conflict with '{}' at {}", name, start.format("%H:%M"))
            }
            Conflict::WindowOverlap { name } => {
                write!(f, "execution overlap with '{}'", name)
            }
        }
    }
}

/// Compute the execution window for `start` and a predicted duration.
///
/// Returns `None` when the window would cross midnight; such windows are out
/// of scope and callers treat them as "no conflict detectable".
pub fn window(start: NaiveTime, estimated_minutes: u32) -> Option<Window> {
    let (end, wrapped_days) =
        start.overflowing_add_signed(Duration::minutes(i64::from(estimated_minutes)));
    if wrapped_days != 0 {
        debug!(
            start = %start.format("%H:%M"),
            estimated_minutes,
            "execution window crosses midnight, skipping conflict math"
        );
        return None;
    }
    Some(Window { start, end })
}

/// Half-open interval overlap. Touching windows (`a.end == b.start`) do not
/// overlap.
pub fn overlaps(a: Window, b: Window) -> bool {
    (a.start <= b.start && b.start < a.end) || (b.start <= a.start && a.start < b.end)
}

/// Detect conflicts between a probe and every active schedule other than
/// `exclude_id`. Pure: mutates nothing. An empty result means the probe's
/// start time is safe.
pub fn detect_conflicts(probe: Probe, exclude_id: Option<&str>, schedules: &[Schedule]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let probe_window = window(probe.start_time, probe.estimated_duration_minutes);

    for other in schedules {
        if !other.is_active || exclude_id == Some(other.id.as_str()) {
            continue;
        }

        if other.start_time == probe.start_time {
            conflicts.push(Conflict::SameStart {
                name: other.name.clone(),
                start: other.start_time,
            });
        }

        if let (Some(pw), Some(ow)) = (
            probe_window,
            window(other.start_time, other.estimated_duration_minutes),
        ) && overlaps(pw, ow)
        {
            conflicts.push(Conflict::WindowOverlap {
                name: other.name.clone(),
            });
        }
    }

    conflicts
}

/// Whether a start time is conflict-free for the probe.
pub fn slot_is_safe(probe: Probe, exclude_id: Option<&str>, schedules: &[Schedule]) -> bool {
    detect_conflicts(probe, exclude_id, schedules).is_empty()
}
