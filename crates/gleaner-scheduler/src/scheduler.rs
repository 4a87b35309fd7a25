//! The polling scheduler loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::conflict::{overlaps, window};
use crate::executor::Executor;
use crate::{RunKind, Schedule, ScheduleStore};

/// How often the loop samples the clock. First runs match on the wall-clock
/// minute, so the tick must be shorter than a minute.
const TICK_SECS: u64 = 1;

/// How often the loop logs that it is alive, in seconds.
const HEARTBEAT_SECS: u32 = 30;

/// Polls the store for due schedules and dispatches them to the executor.
///
/// Runs execute on spawned tasks so a long scrape never blocks the loop's
/// clock sampling or shutdown handling. The executor marks a schedule as
/// running before its task is spawned, so a schedule can never be dispatched
/// twice.
pub struct Scheduler {
    store: Arc<RwLock<ScheduleStore>>,
    executor: Arc<Executor>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<RwLock<ScheduleStore>>, executor: Arc<Executor>) -> Self {
        Self {
            store,
            executor,
            tick: Duration::from_secs(TICK_SECS),
        }
    }

    /// Override the polling interval. Tests use this to tighten the loop.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run the scheduler loop until `shutdown_rx` flips to true, then wait
    /// for in-flight runs to finish.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("scheduler starting");
        let mut inflight = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                info!("scheduler shutting down");
                break;
            }

            while let Some(result) = inflight.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "schedule run task panicked");
                }
            }

            let now = Local::now();
            self.dispatch_due(now, &mut inflight).await;

            if now.second() % HEARTBEAT_SECS == 0 {
                debug!(
                    time = %now.format("%H:%M:%S"),
                    inflight = inflight.len(),
                    "scheduler heartbeat"
                );
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("scheduler received shutdown signal");
                    }
                }
                _ = sleep(self.tick) => {}
            }
        }

        if !inflight.is_empty() {
            info!(count = inflight.len(), "waiting for in-flight runs to finish");
            while let Some(result) = inflight.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "schedule run task panicked");
                }
            }
        }
        info!("scheduler shut down gracefully");
    }

    /// Find schedules due at `now` and start each one that passes the
    /// runtime conflict checks. A schedule dispatched this tick counts as
    /// running for the checks on later candidates in the same tick.
    async fn dispatch_due(&self, now: DateTime<Local>, inflight: &mut JoinSet<()>) {
        let (due, mut running) = {
            let store = self.store.read().await;
            let due: Vec<(Schedule, RunKind)> = store
                .schedules()
                .iter()
                .filter_map(|s| s.due_kind(now).map(|kind| (s.clone(), kind)))
                .collect();
            let running: Vec<Schedule> = store
                .schedules()
                .iter()
                .filter(|s| s.is_active && s.currently_running)
                .cloned()
                .collect();
            (due, running)
        };

        for (schedule, kind) in due {
            if schedule.auto_sequence && !running.is_empty() {
                info!(
                    name = %schedule.name,
                    "waiting for running schedule before sequenced start"
                );
                continue;
            }

            if let Some(blocker) = running
                .iter()
                .find(|r| would_conflict_while_running(&schedule, r))
            {
                info!(
                    name = %schedule.name,
                    blocked_by = %blocker.name,
                    "queued behind running schedule"
                );
                continue;
            }

            match kind {
                RunKind::First => info!(
                    name = %schedule.name,
                    start = %schedule.start_time.format("%H:%M"),
                    "schedule reached its start time"
                ),
                RunKind::Recurring => info!(
                    name = %schedule.name,
                    interval_minutes = schedule.duration_minutes,
                    "recurring schedule is due again"
                ),
            }

            match self.executor.claim(&schedule.id).await {
                Ok(claimed) => {
                    let executor = Arc::clone(&self.executor);
                    inflight.spawn(async move {
                        executor.run_claimed(claimed).await;
                    });
                    let mut started = schedule;
                    started.currently_running = true;
                    running.push(started);
                }
                Err(e) => {
                    warn!(name = %schedule.name, error = %e, "failed to claim due schedule");
                }
            }
        }
    }
}

/// Runtime gate applied just before dispatch. Anything already running
/// blocks a new start outright; otherwise the predicted windows decide.
fn would_conflict_while_running(candidate: &Schedule, other: &Schedule) -> bool {
    if other.currently_running {
        return true;
    }
    match (
        window(candidate.start_time, candidate.estimated_duration_minutes),
        window(other.start_time, other.estimated_duration_minutes),
    ) {
        (Some(a), Some(b)) => overlaps(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::JobRunner;
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run_term(&self, term: &str, _limit: u32, _skip: bool) -> Result<(), String> {
            self.calls.lock().unwrap().push(term.to_string());
            Ok(())
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule_due_now(name: &str, now: DateTime<Local>) -> Schedule {
        Schedule::one_time(
            name,
            vec![format!("{name}-term")],
            t(now.hour(), now.minute()),
            10,
            false,
        )
    }

    #[test]
    fn test_running_schedule_blocks_everything() {
        let now = Local::now();
        let candidate = schedule_due_now("candidate", now);
        // Far away in time, but actively running.
        let mut other = Schedule::one_time("other", vec!["x".into()], t(3, 0), 10, false);
        other.currently_running = true;
        assert!(would_conflict_while_running(&candidate, &other));
    }

    #[test]
    fn test_non_running_schedule_blocks_only_on_overlap() {
        let mut candidate = Schedule::one_time("a", vec!["x".into()], t(9, 0), 10, false);
        candidate.estimated_duration_minutes = 60;
        let mut near = Schedule::one_time("b", vec!["x".into()], t(9, 30), 10, false);
        near.estimated_duration_minutes = 60;
        let mut far = Schedule::one_time("c", vec!["x".into()], t(14, 0), 10, false);
        far.estimated_duration_minutes = 60;

        assert!(would_conflict_while_running(&candidate, &near));
        assert!(!would_conflict_while_running(&candidate, &far));
    }

    #[tokio::test]
    async fn test_dispatch_runs_due_schedule() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        let schedule = schedule_due_now("due", now);
        let id = schedule.id.clone();

        let mut store = ScheduleStore::load(dir.path().join("schedules.json"));
        store.insert(schedule).unwrap();
        let store = Arc::new(RwLock::new(store));

        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
        });
        let executor = Arc::new(Executor::new(Arc::clone(&store), runner.clone()));
        let scheduler = Scheduler::new(Arc::clone(&store), executor);

        let mut inflight = JoinSet::new();
        scheduler.dispatch_due(now, &mut inflight).await;
        while inflight.join_next().await.is_some() {}

        assert_eq!(*runner.calls.lock().unwrap(), vec!["due-term".to_string()]);
        let store = store.read().await;
        let schedule = store.get(&id).unwrap();
        assert_eq!(schedule.total_runs, 1);
        assert!(!schedule.currently_running);
    }

    #[tokio::test]
    async fn test_auto_sequence_defers_while_another_runs() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        let mut waiting = schedule_due_now("waiting", now);
        waiting.auto_sequence = true;
        let waiting_id = waiting.id.clone();
        let mut busy = Schedule::one_time("busy", vec!["x".into()], t(3, 0), 10, false);
        busy.currently_running = true;

        let mut store = ScheduleStore::load(dir.path().join("schedules.json"));
        store.insert(waiting).unwrap();
        store.insert(busy).unwrap();
        let store = Arc::new(RwLock::new(store));

        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
        });
        let executor = Arc::new(Executor::new(Arc::clone(&store), runner.clone()));
        let scheduler = Scheduler::new(Arc::clone(&store), executor);

        let mut inflight = JoinSet::new();
        scheduler.dispatch_due(now, &mut inflight).await;
        assert!(inflight.is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());
        let store = store.read().await;
        assert_eq!(store.get(&waiting_id).unwrap().total_runs, 0);
    }

    #[tokio::test]
    async fn test_same_tick_claims_block_overlapping_peers() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        // Two schedules due in the same tick with the same start minute. The
        // first claim must gate the second.
        let first = schedule_due_now("first", now);
        let second = schedule_due_now("second", now);
        let second_id = second.id.clone();

        let mut store = ScheduleStore::load(dir.path().join("schedules.json"));
        store.insert(first).unwrap();
        store.insert(second).unwrap();
        let store = Arc::new(RwLock::new(store));

        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
        });
        let executor = Arc::new(Executor::new(Arc::clone(&store), runner.clone()));
        let scheduler = Scheduler::new(Arc::clone(&store), executor);

        let mut inflight = JoinSet::new();
        scheduler.dispatch_due(now, &mut inflight).await;
        while inflight.join_next().await.is_some() {}

        assert_eq!(*runner.calls.lock().unwrap(), vec!["first-term".to_string()]);
        let store = store.read().await;
        assert_eq!(store.get(&second_id).unwrap().total_runs, 0);
    }
}
