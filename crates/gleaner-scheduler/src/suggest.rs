//! Safe-time suggestion: heuristic search over the day's timeline for
//! conflict-free start times near the current wall-clock time.

use chrono::{NaiveTime, Timelike};

use crate::conflict::{self, Probe};
use crate::Schedule;

/// Gap kept between a suggested window and a conflicting one.
const CONFLICT_BUFFER_MINUTES: i32 = 10;

/// A suggestion must be at least this far past "now".
const NOW_BUFFER_MINUTES: i32 = 5;

/// Step between scanned candidate slots.
const SCAN_STEP_MINUTES: i32 = 30;

/// Latest slot considered when scanning past conflicts (22:00).
const SCAN_END_MINUTES: i32 = 22 * 60;

/// At most this many slots from each of the before/after scans.
const MAX_SLOTS_PER_SCAN: usize = 4;

/// Below this many found slots, fall back to fixed offsets from now.
const FALLBACK_THRESHOLD: usize = 3;

/// Maximum number of suggestions returned.
const MAX_SUGGESTIONS: usize = 8;

/// Virtual distance penalty for suggestions at or before "now", so future
/// times win at equal raw distance.
const PAST_PENALTY_MINUTES: i32 = 30;

/// Suggest up to eight conflict-free start times for the probe, ranked by
/// proximity to `now`. Every returned time is verified against the conflict
/// detector, so constructing a schedule at any of them yields an empty
/// conflict set.
pub fn suggest_safe_times(
    probe: Probe,
    exclude_id: Option<&str>,
    schedules: &[Schedule],
    now: NaiveTime,
) -> Vec<NaiveTime> {
    let conflicting: Vec<&Schedule> = schedules
        .iter()
        .filter(|s| s.is_active && exclude_id != Some(s.id.as_str()))
        .filter(|s| !conflict::detect_conflicts(probe, exclude_id, std::slice::from_ref(*s)).is_empty())
        .collect();

    let mut candidates = Vec::new();
    candidates.extend(slots_before_conflicts(probe, exclude_id, schedules, &conflicting, now));
    candidates.extend(slots_after_conflicts(probe, exclude_id, schedules, &conflicting));

    if candidates.len() < FALLBACK_THRESHOLD {
        candidates.extend(fallback_slots(probe, exclude_id, schedules, now));
    }

    // Dedup on the HH:MM representation, preserving first-seen order.
    let mut seen = Vec::new();
    candidates.retain(|t| {
        let key = t.format("%H:%M").to_string();
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });

    candidates.sort_by_key(|t| distance_from_now(*t, now));
    candidates.truncate(MAX_SUGGESTIONS);
    candidates
}

/// Slots that let the probe finish (plus buffer) before the earliest
/// conflicting schedule begins.
fn slots_before_conflicts(
    probe: Probe,
    exclude_id: Option<&str>,
    schedules: &[Schedule],
    conflicting: &[&Schedule],
    now: NaiveTime,
) -> Vec<NaiveTime> {
    let Some(earliest_start) = conflicting.iter().map(|s| minutes(s.start_time)).min() else {
        return Vec::new();
    };

    let latest_start =
        earliest_start - probe.estimated_duration_minutes as i32 - CONFLICT_BUFFER_MINUTES;
    let scan_from = minutes(now) + NOW_BUFFER_MINUTES;
    if latest_start <= scan_from {
        return Vec::new();
    }

    scan_slots(probe, exclude_id, schedules, scan_from, latest_start)
}

/// Slots after the latest conflicting schedule's window ends.
fn slots_after_conflicts(
    probe: Probe,
    exclude_id: Option<&str>,
    schedules: &[Schedule],
    conflicting: &[&Schedule],
) -> Vec<NaiveTime> {
    let Some(latest_end) = conflicting
        .iter()
        .filter_map(|s| conflict::window(s.start_time, s.estimated_duration_minutes))
        .map(|w| minutes(w.end))
        .max()
    else {
        return Vec::new();
    };

    scan_slots(
        probe,
        exclude_id,
        schedules,
        latest_end + CONFLICT_BUFFER_MINUTES,
        SCAN_END_MINUTES,
    )
}

/// Walk half-hour slots in `[from, until]`, keeping verified-safe ones.
fn scan_slots(
    probe: Probe,
    exclude_id: Option<&str>,
    schedules: &[Schedule],
    from: i32,
    until: i32,
) -> Vec<NaiveTime> {
    let mut slots = Vec::new();
    let mut at = snap_to_half_hour(from);
    if at < from {
        at += SCAN_STEP_MINUTES;
    }
    while at <= until && slots.len() < MAX_SLOTS_PER_SCAN {
        if let Some(t) = time_of_day(at)
            && conflict::slot_is_safe(probe.at(t), exclude_id, schedules)
        {
            slots.push(t);
        }
        at += SCAN_STEP_MINUTES;
    }
    slots
}

/// Fixed offsets from now, clipped to daytime hours, when the scans found
/// too little.
fn fallback_slots(
    probe: Probe,
    exclude_id: Option<&str>,
    schedules: &[Schedule],
    now: NaiveTime,
) -> Vec<NaiveTime> {
    let base = minutes(now);
    let last_offset = if now.hour() > 7 { -60 } else { 240 };
    let offsets = [60, 120, 180, last_offset];

    let mut slots = Vec::new();
    for offset in offsets {
        let at = snap_to_half_hour(base + offset);
        let Some(t) = time_of_day(at) else { continue };
        if (6..=22).contains(&t.hour())
            && conflict::slot_is_safe(probe.at(t), exclude_id, schedules)
        {
            slots.push(t);
        }
    }
    slots
}

/// Absolute minute distance from now, with a penalty on times at or before
/// now so future times sort first at equal raw distance.
fn distance_from_now(t: NaiveTime, now: NaiveTime) -> i32 {
    let diff = (minutes(t) - minutes(now)).abs();
    if minutes(t) > minutes(now) {
        diff
    } else {
        diff + PAST_PENALTY_MINUTES
    }
}

fn minutes(t: NaiveTime) -> i32 {
    (t.hour() * 60 + t.minute()) as i32
}

fn time_of_day(minutes: i32) -> Option<NaiveTime> {
    if !(0..24 * 60).contains(&minutes) {
        return None;
    }
    NaiveTime::from_hms_opt(minutes as u32 / 60, minutes as u32 % 60, 0)
}

/// Snap to the nearest half-hour boundary.
fn snap_to_half_hour(at: i32) -> i32 {
    let rem = at.rem_euclid(60);
    if rem < 15 {
        at - rem
    } else if rem < 45 {
        at - rem + 30
    } else {
        at - rem + 60
    }
}
