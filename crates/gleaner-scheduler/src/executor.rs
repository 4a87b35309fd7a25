//! Job execution: drives one schedule's search terms through the external
//! job runner and keeps run statistics persisted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{ScheduleStore, SchedulerError};

/// One unit of scraping work. The engine invokes the runner and observes
/// only a success/failure outcome; everything else about the scrape is the
/// runner's business.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_term(&self, term: &str, limit: u32, skip_duplicates: bool) -> Result<(), String>;
}

/// Runs each search term as an external command, appending
/// `-s <term> --limit <n> [--skip-duplicates]` to the configured base
/// arguments. A non-zero exit status or spawn failure is a failed term.
pub struct CommandRunner {
    program: String,
    base_args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }
}

#[async_trait]
impl JobRunner for CommandRunner {
    async fn run_term(&self, term: &str, limit: u32, skip_duplicates: bool) -> Result<(), String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("-s")
            .arg(term)
            .arg("--limit")
            .arg(limit.to_string());
        if skip_duplicates {
            cmd.arg("--skip-duplicates");
        }

        match cmd.status().await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(format!("runner exited with {status}")),
            Err(e) => Err(format!("failed to spawn runner: {e}")),
        }
    }
}

/// Outcome of one schedule run, for calibration and monitoring only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Terms that completed successfully.
    pub succeeded: usize,
    /// Terms attempted.
    pub total: usize,
    /// Actual wall-clock minutes the run took, saturated on overflow.
    pub elapsed_minutes: u32,
    /// The schedule's predicted window length, for comparison.
    pub estimated_minutes: u32,
}

/// Snapshot of the fields one run needs, taken while claiming the schedule.
pub(crate) struct ClaimedRun {
    id: String,
    name: String,
    search_terms: Vec<String>,
    limit_per_run: u32,
    skip_duplicates: bool,
    estimated_minutes: u32,
}

/// Executes schedules against a [`JobRunner`], persisting state on every
/// transition so a crash mid-run is observable and recoverable.
pub struct Executor {
    store: Arc<RwLock<ScheduleStore>>,
    runner: Arc<dyn JobRunner>,
    term_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(store: Arc<RwLock<ScheduleStore>>, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            store,
            runner,
            term_timeout: None,
        }
    }

    /// Bound each runner invocation by a timeout; a timed-out term counts
    /// as failed.
    pub fn with_term_timeout(mut self, timeout: Duration) -> Self {
        self.term_timeout = Some(timeout);
        self
    }

    /// Run a schedule to completion: claim it, run every term, record stats.
    pub async fn execute(&self, id: &str) -> Result<RunReport, SchedulerError> {
        let claimed = self.claim(id).await?;
        Ok(self.run_claimed(claimed).await)
    }

    /// Mark the schedule as running and persist immediately, snapshotting
    /// the fields the run needs. The scheduler loop claims before spawning
    /// so no schedule ever has two concurrent executions.
    pub(crate) async fn claim(&self, id: &str) -> Result<ClaimedRun, SchedulerError> {
        let mut store = self.store.write().await;
        let schedule = store
            .get_mut(id)
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?;

        schedule.currently_running = true;
        let claimed = ClaimedRun {
            id: schedule.id.clone(),
            name: schedule.name.clone(),
            search_terms: schedule.search_terms.clone(),
            limit_per_run: schedule.limit_per_run,
            skip_duplicates: schedule.skip_duplicates,
            estimated_minutes: schedule.estimated_duration_minutes,
        };

        if let Err(e) = store.save() {
            warn!(id, error = %e, "failed to persist running flag, continuing in-memory");
        }
        Ok(claimed)
    }

    /// Run a claimed schedule's terms in order. An individual term failure
    /// never aborts the run, and the completion bookkeeping (flags, stats,
    /// persistence) happens on every exit path, including a panicking
    /// runner.
    pub(crate) async fn run_claimed(&self, run: ClaimedRun) -> RunReport {
        info!(id = %run.id, name = %run.name, terms = run.search_terms.len(), "executing schedule");
        let started = Instant::now();
        let total = run.search_terms.len();

        // The term loop gets its own task: if the runner panics, the panic
        // is contained there and the completion block below still runs.
        // The counter survives the abort so partial successes are reported.
        let succeeded = Arc::new(AtomicUsize::new(0));
        let worker = {
            let runner = Arc::clone(&self.runner);
            let succeeded = Arc::clone(&succeeded);
            let bound = self.term_timeout;
            let terms = run.search_terms.clone();
            let limit = run.limit_per_run;
            let skip_duplicates = run.skip_duplicates;
            tokio::spawn(async move {
                for (index, term) in terms.iter().enumerate() {
                    info!(term = %term, position = index + 1, total, "running search term");
                    match run_term_bounded(runner.as_ref(), bound, term, limit, skip_duplicates)
                        .await
                    {
                        Ok(()) => {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => warn!(term = %term, %error, "search term failed"),
                    }
                }
            })
        };
        if let Err(e) = worker.await {
            warn!(id = %run.id, error = %e, "run aborted partway, recording completed terms only");
        }
        let succeeded = succeeded.load(Ordering::Relaxed);

        let report = RunReport {
            succeeded,
            total,
            elapsed_minutes: u32::try_from(started.elapsed().as_secs() / 60)
                .unwrap_or(u32::MAX),
            estimated_minutes: run.estimated_minutes,
        };

        {
            let mut store = self.store.write().await;
            if let Some(schedule) = store.get_mut(&run.id) {
                schedule.currently_running = false;
                schedule.last_run = Some(Local::now());
                schedule.total_runs += 1;
                schedule.auto_sequence = false;
            }
            if let Err(e) = store.save() {
                warn!(id = %run.id, error = %e, "failed to persist run completion, continuing in-memory");
            }

            // Schedules that deferred on this run get picked up by the loop
            // on its next tick.
            let waiting: Vec<&str> = store
                .schedules()
                .iter()
                .filter(|s| s.is_active && s.auto_sequence)
                .map(|s| s.name.as_str())
                .collect();
            if !waiting.is_empty() {
                info!(?waiting, "deferred schedules will be reconsidered");
            }
        }

        info!(
            id = %run.id,
            succeeded = report.succeeded,
            total = report.total,
            elapsed_minutes = report.elapsed_minutes,
            estimated_minutes = report.estimated_minutes,
            "schedule run completed"
        );
        report
    }
}

async fn run_term_bounded(
    runner: &dyn JobRunner,
    bound: Option<Duration>,
    term: &str,
    limit: u32,
    skip_duplicates: bool,
) -> Result<(), String> {
    match bound {
        Some(timeout) => {
            match tokio::time::timeout(timeout, runner.run_term(term, limit, skip_duplicates)).await
            {
                Ok(result) => result,
                Err(_) => Err(format!("runner timed out after {}s", timeout.as_secs())),
            }
        }
        None => runner.run_term(term, limit, skip_duplicates).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Schedule;
    use chrono::NaiveTime;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockRunner {
        fail_terms: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockRunner {
        fn new(fail_terms: &[&str]) -> Self {
            Self {
                fail_terms: fail_terms.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobRunner for MockRunner {
        async fn run_term(&self, term: &str, _limit: u32, _skip: bool) -> Result<(), String> {
            self.calls.lock().unwrap().push(term.to_string());
            if self.fail_terms.contains(term) {
                Err("simulated failure".into())
            } else {
                Ok(())
            }
        }
    }

    struct ExplodingRunner {
        panic_on: String,
    }

    #[async_trait]
    impl JobRunner for ExplodingRunner {
        async fn run_term(&self, term: &str, _limit: u32, _skip: bool) -> Result<(), String> {
            if term == self.panic_on {
                panic!("runner crashed");
            }
            Ok(())
        }
    }

    struct SleepingRunner;

    #[async_trait]
    impl JobRunner for SleepingRunner {
        async fn run_term(&self, _term: &str, _limit: u32, _skip: bool) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn store_with(dir: &TempDir, schedule: Schedule) -> Arc<RwLock<ScheduleStore>> {
        let mut store = ScheduleStore::load(dir.path().join("schedules.json"));
        store.insert(schedule).unwrap();
        Arc::new(RwLock::new(store))
    }

    #[tokio::test]
    async fn test_partial_failure_still_counts_one_run() {
        let dir = TempDir::new().unwrap();
        let mut schedule = Schedule::one_time(
            "mixed",
            vec!["one".into(), "two".into(), "three".into()],
            t(9, 0),
            10,
            false,
        );
        schedule.auto_sequence = true;
        let id = schedule.id.clone();
        let store = store_with(&dir, schedule);

        let runner = Arc::new(MockRunner::new(&["one"]));
        let executor = Executor::new(Arc::clone(&store), runner.clone());

        let report = executor.execute(&id).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.total, 3);

        let store = store.read().await;
        let schedule = store.get(&id).unwrap();
        assert_eq!(schedule.total_runs, 1);
        assert!(schedule.is_active);
        assert!(!schedule.currently_running);
        assert!(!schedule.auto_sequence);
        assert!(schedule.last_run.is_some());
        // Terms run in order, and a failure never stops the rest.
        assert_eq!(
            *runner.calls.lock().unwrap(),
            vec!["one".to_string(), "two".into(), "three".into()]
        );
    }

    #[tokio::test]
    async fn test_running_flag_persisted_while_executing() {
        let dir = TempDir::new().unwrap();
        let schedule = Schedule::one_time("claimed", vec!["term".into()], t(9, 0), 10, false);
        let id = schedule.id.clone();
        let store = store_with(&dir, schedule);

        let executor = Executor::new(Arc::clone(&store), Arc::new(MockRunner::new(&[])));
        executor.claim(&id).await.unwrap();

        // The flag reaches disk before any term runs, so a crash mid-run is
        // observable on restart.
        let on_disk = ScheduleStore::load(dir.path().join("schedules.json"));
        assert!(store.read().await.get(&id).unwrap().currently_running);
        // ...and the loader treats it as stale.
        assert!(!on_disk.get(&id).unwrap().currently_running);
    }

    #[tokio::test]
    async fn test_runner_panic_still_clears_running_state() {
        let dir = TempDir::new().unwrap();
        let mut schedule = Schedule::one_time(
            "volatile",
            vec!["one".into(), "boom".into(), "three".into()],
            t(9, 0),
            10,
            false,
        );
        schedule.auto_sequence = true;
        let id = schedule.id.clone();
        let store = store_with(&dir, schedule);

        let executor = Executor::new(
            Arc::clone(&store),
            Arc::new(ExplodingRunner {
                panic_on: "boom".into(),
            }),
        );

        // The run aborts at the second term but the completion bookkeeping
        // must still happen, or the schedule stays wedged as running.
        let report = executor.execute(&id).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.total, 3);

        let store = store.read().await;
        let schedule = store.get(&id).unwrap();
        assert!(!schedule.currently_running);
        assert_eq!(schedule.total_runs, 1);
        assert!(schedule.last_run.is_some());
        assert!(!schedule.auto_sequence);
        assert!(schedule.is_active);

        // The cleared flag reached disk too.
        let on_disk = ScheduleStore::load(dir.path().join("schedules.json"));
        assert!(!on_disk.get(&id).unwrap().currently_running);
        assert_eq!(on_disk.get(&id).unwrap().total_runs, 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_schedule_errors() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RwLock::new(ScheduleStore::load(
            dir.path().join("schedules.json"),
        )));
        let executor = Executor::new(store, Arc::new(MockRunner::new(&[])));
        assert!(matches!(
            executor.execute("missing").await,
            Err(SchedulerError::ScheduleNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_term_timeout_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        let schedule = Schedule::one_time("slow", vec!["stuck".into()], t(9, 0), 10, false);
        let id = schedule.id.clone();
        let store = store_with(&dir, schedule);

        let executor = Executor::new(store, Arc::new(SleepingRunner))
            .with_term_timeout(Duration::from_secs(60));

        let report = executor.execute(&id).await.unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.total, 1);
        // The paused clock advanced exactly to the timeout.
        assert_eq!(report.elapsed_minutes, 1);
    }
}
