//! Sequencing: the earliest safe start after everything currently scheduled.

use chrono::{NaiveTime, Timelike};

use crate::Schedule;

/// Gap left after the last active schedule's window.
const SEQUENCE_BUFFER_MINUTES: u32 = 10;

/// Sequenced starts at or past this hour roll to the next morning.
const LATE_NIGHT_CUTOFF_HOUR: u32 = 23;

/// Start hour used when a sequenced time rolls past the cutoff.
const NEXT_DAY_START_HOUR: u32 = 8;

/// Compute the earliest start time strictly after every active schedule's
/// window ends, plus a buffer.
///
/// This serializes against *everything* active, not just direct conflicts;
/// a stricter and simpler policy than the suggester. Returns `None` when
/// there are no active schedules to sequence after. A result landing at or
/// past 23:00 rolls to 08:00, the next-day start.
pub fn sequential_time(schedules: &[Schedule]) -> Option<NaiveTime> {
    let latest_end = schedules
        .iter()
        .filter(|s| s.is_active)
        .map(|s| {
            s.start_time.hour() * 60 + s.start_time.minute() + s.estimated_duration_minutes
        })
        .max()?;

    let sequenced = latest_end + SEQUENCE_BUFFER_MINUTES;
    if sequenced >= LATE_NIGHT_CUTOFF_HOUR * 60 {
        return NaiveTime::from_hms_opt(NEXT_DAY_START_HOUR, 0, 0);
    }
    NaiveTime::from_hms_opt(sequenced / 60, sequenced % 60, 0)
}
