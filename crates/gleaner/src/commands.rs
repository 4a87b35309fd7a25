//! Schedule management subcommands.

use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use miette::Result;
use tokio::sync::RwLock;

use gleaner_scheduler::{
    CommandRunner, Executor, Probe, Schedule, ScheduleStore, detect_conflicts,
    estimate_run_minutes, format_duration, parse_duration, parse_start_time, sequential_time,
    suggest_safe_times,
};

use crate::OnConflict;

#[allow(clippy::too_many_arguments)]
pub fn add(
    store_path: &Path,
    name: &str,
    at: &str,
    terms: Vec<String>,
    every: Option<&str>,
    limit: u32,
    skip_duplicates: bool,
    on_conflict: OnConflict,
) -> Result<()> {
    let start_time = parse_start_time(at).map_err(|e| miette::miette!("{}", e))?;

    let mut store = ScheduleStore::load(store_path);
    let mut schedule = match every {
        Some(every) => {
            let interval = parse_duration(every).map_err(|e| miette::miette!("{}", e))?;
            Schedule::recurring(name, terms, start_time, interval, limit, skip_duplicates)
        }
        None => Schedule::one_time(name, terms, start_time, limit, skip_duplicates),
    };

    let conflicts = detect_conflicts(Probe::of(&schedule), None, store.schedules());
    if !conflicts.is_empty() {
        match on_conflict {
            OnConflict::Reject => {
                println!("cannot add '{}' at {}:", schedule.name, at);
                for conflict in &conflicts {
                    println!("  - {conflict}");
                }
                let suggestions = suggest_safe_times(
                    Probe::of(&schedule),
                    None,
                    store.schedules(),
                    Local::now().time(),
                );
                if !suggestions.is_empty() {
                    println!("safe alternatives:");
                    for time in suggestions {
                        println!("  - {}", time.format("%H:%M"));
                    }
                }
                return Err(miette::miette!(
                    "schedule conflicts with {} existing schedule(s)",
                    conflicts.len()
                ));
            }
            OnConflict::Force => {
                for conflict in &conflicts {
                    println!("ignoring: {conflict}");
                }
            }
            OnConflict::Sequence => {
                if let Some(sequenced) = sequential_time(store.schedules()) {
                    println!(
                        "moved '{}' from {} to {}",
                        schedule.name,
                        at,
                        sequenced.format("%H:%M")
                    );
                    schedule.start_time = sequenced;
                }
            }
            OnConflict::Auto => {
                schedule.auto_sequence = true;
                println!(
                    "'{}' keeps {} but will wait for running schedules",
                    schedule.name, at
                );
            }
        }
    }

    let id = schedule.id.clone();
    let start = schedule.start_time;
    store
        .insert(schedule)
        .map_err(|e| miette::miette!("{}", e))?;
    store.save().map_err(|e| miette::miette!("{}", e))?;

    println!("added '{}' at {} (id {})", name, start.format("%H:%M"), id);
    Ok(())
}

/// Update an existing schedule. Only the provided fields change; the
/// predicted duration is re-derived and the conflict check re-runs against
/// everything else with the same policy choices as `add`.
#[allow(clippy::too_many_arguments)]
pub fn edit(
    store_path: &Path,
    id: &str,
    name: Option<&str>,
    at: Option<&str>,
    terms: Option<Vec<String>>,
    limit: Option<u32>,
    on_conflict: OnConflict,
) -> Result<()> {
    let mut store = ScheduleStore::load(store_path);
    let mut updated = store
        .get(id)
        .ok_or_else(|| miette::miette!("schedule not found: {id}"))?
        .clone();

    if let Some(name) = name {
        updated.name = name.to_string();
    }
    if let Some(at) = at {
        updated.start_time = parse_start_time(at).map_err(|e| miette::miette!("{}", e))?;
    }
    if let Some(terms) = terms {
        if terms.is_empty() {
            return Err(miette::miette!("schedule must have at least one search term"));
        }
        updated.search_terms = terms;
    }
    if let Some(limit) = limit {
        if limit == 0 {
            return Err(miette::miette!("limit must be greater than zero"));
        }
        updated.limit_per_run = limit;
    }
    updated.estimated_duration_minutes =
        estimate_run_minutes(updated.search_terms.len(), updated.limit_per_run);

    let conflicts = detect_conflicts(Probe::of(&updated), Some(id), store.schedules());
    if !conflicts.is_empty() {
        match on_conflict {
            OnConflict::Reject => {
                println!(
                    "cannot move '{}' to {}:",
                    updated.name,
                    updated.start_time.format("%H:%M")
                );
                for conflict in &conflicts {
                    println!("  - {conflict}");
                }
                let suggestions = suggest_safe_times(
                    Probe::of(&updated),
                    Some(id),
                    store.schedules(),
                    Local::now().time(),
                );
                if !suggestions.is_empty() {
                    println!("safe alternatives:");
                    for time in suggestions {
                        println!("  - {}", time.format("%H:%M"));
                    }
                }
                return Err(miette::miette!(
                    "edit conflicts with {} existing schedule(s)",
                    conflicts.len()
                ));
            }
            OnConflict::Force => {
                for conflict in &conflicts {
                    println!("ignoring: {conflict}");
                }
            }
            OnConflict::Sequence => {
                let others: Vec<Schedule> = store
                    .schedules()
                    .iter()
                    .filter(|s| s.id != id)
                    .cloned()
                    .collect();
                if let Some(sequenced) = sequential_time(&others) {
                    println!(
                        "moved '{}' to {}",
                        updated.name,
                        sequenced.format("%H:%M")
                    );
                    updated.start_time = sequenced;
                }
            }
            OnConflict::Auto => {
                updated.auto_sequence = true;
                println!(
                    "'{}' keeps {} but will wait for running schedules",
                    updated.name,
                    updated.start_time.format("%H:%M")
                );
            }
        }
    }

    println!(
        "updated '{}' at {}",
        updated.name,
        updated.start_time.format("%H:%M")
    );
    if let Some(slot) = store.get_mut(id) {
        *slot = updated;
    }
    store.save().map_err(|e| miette::miette!("{}", e))?;
    Ok(())
}

pub fn list(store_path: &Path) -> Result<()> {
    let store = ScheduleStore::load(store_path);
    if store.is_empty() {
        println!("no schedules");
        return Ok(());
    }

    for s in store.schedules() {
        let status = if s.currently_running {
            "running"
        } else if s.is_active {
            "active"
        } else {
            "disabled"
        };
        let cadence = if s.is_recurring {
            format!("every {}", format_duration(s.duration_minutes))
        } else {
            "one-time".to_string()
        };
        println!(
            "{}  {}  {} at {}, {}, ~{}",
            s.id,
            status,
            s.name,
            s.start_time.format("%H:%M"),
            cadence,
            format_duration(s.estimated_duration_minutes),
        );
        println!(
            "    terms: {} | limit {} | runs {} | last run {}",
            s.search_terms.join(", "),
            s.limit_per_run,
            s.total_runs,
            s.last_run
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
        );
    }
    Ok(())
}

pub fn remove(store_path: &Path, id: &str) -> Result<()> {
    let mut store = ScheduleStore::load(store_path);
    let removed = store.remove(id).map_err(|e| miette::miette!("{}", e))?;
    store.save().map_err(|e| miette::miette!("{}", e))?;
    println!("removed '{}'", removed.name);
    Ok(())
}

pub fn set_active(store_path: &Path, id: &str, active: bool) -> Result<()> {
    let mut store = ScheduleStore::load(store_path);
    store
        .set_active(id, active)
        .map_err(|e| miette::miette!("{}", e))?;
    store.save().map_err(|e| miette::miette!("{}", e))?;
    println!("{} {}", if active { "enabled" } else { "disabled" }, id);
    Ok(())
}

pub async fn run_now(
    store_path: &Path,
    id: &str,
    runner: &str,
    runner_args: Vec<String>,
    term_timeout_minutes: u64,
) -> Result<()> {
    let store = Arc::new(RwLock::new(ScheduleStore::load(store_path)));
    let runner = Arc::new(CommandRunner::new(runner, runner_args));
    let mut executor = Executor::new(store, runner);
    if term_timeout_minutes > 0 {
        executor = executor
            .with_term_timeout(std::time::Duration::from_secs(term_timeout_minutes * 60));
    }

    let report = executor
        .execute(id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!(
        "completed {}/{} terms in {} (estimated {})",
        report.succeeded,
        report.total,
        format_duration(report.elapsed_minutes),
        format_duration(report.estimated_minutes),
    );
    Ok(())
}

pub fn check(store_path: &Path) -> Result<()> {
    let store = ScheduleStore::load(store_path);
    let active: Vec<&Schedule> = store.schedules().iter().filter(|s| s.is_active).collect();

    let mut clean = true;
    for (i, schedule) in active.iter().enumerate() {
        for other in active.iter().skip(i + 1) {
            let conflicts = detect_conflicts(
                Probe::of(schedule),
                Some(&schedule.id),
                std::slice::from_ref(*other),
            );
            for conflict in conflicts {
                println!("'{}': {conflict}", schedule.name);
                clean = false;
            }
        }
    }

    if clean {
        println!("no conflicts among {} active schedule(s)", active.len());
    }
    Ok(())
}

pub fn export(store_path: &Path, path: &Path) -> Result<()> {
    let store = ScheduleStore::load(store_path);
    let count = store.export(path).map_err(|e| miette::miette!("{}", e))?;
    println!("exported {} schedule(s) to {}", count, path.display());
    Ok(())
}

pub fn import(store_path: &Path, path: &Path) -> Result<()> {
    let mut store = ScheduleStore::load(store_path);
    let count = store.import(path).map_err(|e| miette::miette!("{}", e))?;
    store.save().map_err(|e| miette::miette!("{}", e))?;
    println!("imported {} schedule(s) from {}", count, path.display());
    Ok(())
}
