//! Schedule types and input parsing.

use chrono::{DateTime, Duration, Local, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SchedulerError;

/// Minutes of predicted work per fetched contact (6 seconds each).
const MINUTES_PER_TEN_CONTACTS: u32 = 1;

/// A persisted schedule definition.
///
/// The execution window `[start_time, start_time + estimated_duration_minutes)`
/// is purely predictive: it drives conflict detection and never bounds a real
/// run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique identifier, assigned at creation, immutable.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Units of work, executed in order during one run. Never empty.
    pub search_terms: Vec<String>,
    /// Wall-clock anchor for when the schedule first becomes due.
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    /// Recurrence interval in minutes when `is_recurring`; 0 otherwise.
    pub duration_minutes: u32,
    /// Max contacts to fetch per search term in one run.
    pub limit_per_run: u32,
    /// Whether duplicate suppression is requested from the job runner.
    pub skip_duplicates: bool,
    pub is_recurring: bool,
    pub is_active: bool,
    /// Completion timestamp of the last run, if any.
    #[serde(default)]
    pub last_run: Option<DateTime<Local>>,
    #[serde(default)]
    pub total_runs: u32,
    /// Predicted execution-window length in minutes. Always >= 1.
    pub estimated_duration_minutes: u32,
    /// Deferred-start policy: the declared start time is known to conflict,
    /// so wait for running conflicting schedules to finish. Cleared after
    /// the schedule executes once.
    #[serde(default)]
    pub auto_sequence: bool,
    /// True strictly while the executor is mid-run for this schedule.
    /// Reset on every exit path, and reset as stale on store load.
    #[serde(default)]
    pub currently_running: bool,
}

/// Why a schedule is due this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Never ran before and the current minute matches `start_time`.
    First,
    /// Recurring and the interval since `last_run` has elapsed.
    Recurring,
}

impl Schedule {
    /// Create a one-time schedule.
    pub fn one_time(
        name: impl Into<String>,
        search_terms: Vec<String>,
        start_time: NaiveTime,
        limit_per_run: u32,
        skip_duplicates: bool,
    ) -> Self {
        let estimated = estimate_run_minutes(search_terms.len(), limit_per_run);
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            search_terms,
            start_time,
            duration_minutes: 0,
            limit_per_run,
            skip_duplicates,
            is_recurring: false,
            is_active: true,
            last_run: None,
            total_runs: 0,
            estimated_duration_minutes: estimated,
            auto_sequence: false,
            currently_running: false,
        }
    }

    /// Create a recurring schedule that re-runs `interval_minutes` after each
    /// completed run.
    pub fn recurring(
        name: impl Into<String>,
        search_terms: Vec<String>,
        start_time: NaiveTime,
        interval_minutes: u32,
        limit_per_run: u32,
        skip_duplicates: bool,
    ) -> Self {
        let mut schedule = Self::one_time(name, search_terms, start_time, limit_per_run, skip_duplicates);
        schedule.duration_minutes = interval_minutes;
        schedule.is_recurring = true;
        schedule
    }

    /// Check whether this schedule is due at `now`, and why.
    ///
    /// The first run is a point-in-time check at minute resolution, so the
    /// polling tick must be fine enough to observe every wall-clock minute.
    pub fn due_kind(&self, now: DateTime<Local>) -> Option<RunKind> {
        if !self.is_active || self.currently_running {
            return None;
        }
        if self.total_runs == 0 {
            let t = now.time();
            if t.hour() == self.start_time.hour() && t.minute() == self.start_time.minute() {
                return Some(RunKind::First);
            }
        } else if self.is_recurring
            && let Some(last) = self.last_run
            && now >= last + Duration::minutes(i64::from(self.duration_minutes))
        {
            return Some(RunKind::Recurring);
        }
        None
    }
}

/// Predict how many minutes one run of a schedule will take.
///
/// 0.1 minutes per contact across all terms, plus a buffer of at least five
/// minutes that grows with the term count.
pub fn estimate_run_minutes(term_count: usize, limit_per_run: u32) -> u32 {
    let terms = u32::try_from(term_count).unwrap_or(u32::MAX);
    let total_contacts = terms.saturating_mul(limit_per_run);
    let estimated = total_contacts.saturating_mul(MINUTES_PER_TEN_CONTACTS) / 10;
    let buffer = terms.saturating_mul(2).max(5);
    estimated.saturating_add(buffer)
}

/// Parse a wall-clock start time in 24-hour `HH:MM` form.
pub fn parse_start_time(input: &str) -> Result<NaiveTime, SchedulerError> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|_| SchedulerError::InvalidTime(input.to_string()))
}

/// Supported duration units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    fn as_minutes(self) -> u32 {
        match self {
            DurationUnit::Minutes => 1,
            DurationUnit::Hours => 60,
            DurationUnit::Days => 24 * 60,
        }
    }
}

// Longest suffixes first so "minutes" is not consumed as "m".
const UNIT_SUFFIXES: &[(&str, DurationUnit)] = &[
    ("minutes", DurationUnit::Minutes),
    ("minute", DurationUnit::Minutes),
    ("mins", DurationUnit::Minutes),
    ("min", DurationUnit::Minutes),
    ("m", DurationUnit::Minutes),
    ("hours", DurationUnit::Hours),
    ("hour", DurationUnit::Hours),
    ("h", DurationUnit::Hours),
    ("days", DurationUnit::Days),
    ("day", DurationUnit::Days),
    ("d", DurationUnit::Days),
];

/// Parse a duration like `30m`, `45 min`, `2h`, `1d`, or a bare number of
/// minutes. Zero and malformed input are rejected, never coerced.
pub fn parse_duration(input: &str) -> Result<u32, SchedulerError> {
    let lowered = input.trim().to_ascii_lowercase();
    let invalid = || SchedulerError::InvalidDuration(input.to_string());

    let (value_part, unit) = UNIT_SUFFIXES
        .iter()
        .find_map(|(suffix, unit)| lowered.strip_suffix(suffix).map(|rest| (rest, *unit)))
        .unwrap_or((lowered.as_str(), DurationUnit::Minutes));

    let value: u32 = value_part.trim().parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    value.checked_mul(unit.as_minutes()).ok_or_else(invalid)
}

/// Render a minute count in a human-readable form, e.g. "1 hour 30 minutes".
pub fn format_duration(minutes: u32) -> String {
    fn plural(n: u32, word: &str) -> String {
        if n == 1 {
            format!("{n} {word}")
        } else {
            format!("{n} {word}s")
        }
    }

    if minutes < 60 {
        format!("{minutes} minutes")
    } else if minutes < 24 * 60 {
        let hours = minutes / 60;
        let mins = minutes % 60;
        if mins == 0 {
            plural(hours, "hour")
        } else {
            format!("{} {}", plural(hours, "hour"), plural(mins, "minute"))
        }
    } else {
        let days = minutes / (24 * 60);
        let hours = (minutes % (24 * 60)) / 60;
        if hours == 0 {
            plural(days, "day")
        } else {
            format!("{} {}", plural(days, "day"), plural(hours, "hour"))
        }
    }
}

/// Serde adapter for `NaiveTime` as a `"HH:MM"` string.
pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M").map_err(D::Error::custom)
    }
}
