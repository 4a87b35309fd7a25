//! The `run` subcommand: wires the store, executor, and polling loop
//! together and runs until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::sync::{RwLock, watch};
use tracing::info;

use gleaner_scheduler::{CommandRunner, Executor, ScheduleStore, Scheduler};

pub async fn run(
    store_path: &Path,
    runner: &str,
    runner_args: Vec<String>,
    term_timeout_minutes: u64,
) -> Result<()> {
    let store = Arc::new(RwLock::new(ScheduleStore::load(store_path)));

    let runner = Arc::new(CommandRunner::new(runner, runner_args));
    let mut executor = Executor::new(Arc::clone(&store), runner);
    if term_timeout_minutes > 0 {
        executor =
            executor.with_term_timeout(Duration::from_secs(term_timeout_minutes * 60));
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let scheduler = Scheduler::new(store, Arc::new(executor));
    scheduler.run(shutdown_rx).await;

    Ok(())
}
