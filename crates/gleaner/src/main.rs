//! Gleaner: scheduled scraping runs with conflict resolution.
//!
//! Main binary with subcommands:
//! - `run`: the scheduler daemon (polling loop, job execution)
//! - `add`/`list`/`remove`/`enable`/`disable`: schedule management
//! - `run-now`: execute a schedule immediately
//! - `check`: pairwise conflict report
//! - `export`/`import`: schedule file exchange

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod daemon;

#[derive(Parser)]
#[command(name = "gleaner")]
#[command(about = "Scheduled scraping runs with conflict resolution", long_about = None)]
struct Cli {
    /// Path to the schedule store file
    #[arg(long, env = "GLEANER_STORE", default_value = "schedules.json", global = true)]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// What to do when a new schedule conflicts with existing ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OnConflict {
    /// Refuse the schedule and print safe alternatives
    Reject,
    /// Keep the requested time despite conflicts
    Force,
    /// Move the schedule to run after every existing window
    Sequence,
    /// Keep the time but defer at runtime while anything is running
    Auto,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon
    Run {
        /// Program invoked for each search term
        #[arg(long, env = "GLEANER_RUNNER")]
        runner: String,

        /// Extra arguments passed to the runner before per-term flags
        #[arg(long, value_delimiter = ',')]
        runner_args: Vec<String>,

        /// Per-term timeout in minutes (0 disables the bound)
        #[arg(long, default_value = "0")]
        term_timeout: u64,
    },

    /// Add a schedule
    Add {
        /// Schedule name
        name: String,

        /// Start time in 24-hour HH:MM
        #[arg(long)]
        at: String,

        /// Search terms (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        terms: Vec<String>,

        /// Repeat interval, e.g. "90", "2h", "1 day" (omit for one-time)
        #[arg(long)]
        every: Option<String>,

        /// Max contacts to collect per term per run
        #[arg(long, default_value = "25")]
        limit: u32,

        /// Skip contacts already collected in earlier runs
        #[arg(long)]
        skip_duplicates: bool,

        /// Conflict handling policy
        #[arg(long, value_enum, default_value_t = OnConflict::Reject)]
        on_conflict: OnConflict,
    },

    /// Edit a schedule by id
    Edit {
        id: String,

        /// New schedule name
        #[arg(long)]
        name: Option<String>,

        /// New start time in 24-hour HH:MM
        #[arg(long)]
        at: Option<String>,

        /// Replacement search terms (comma-separated)
        #[arg(long, value_delimiter = ',')]
        terms: Option<Vec<String>>,

        /// New per-term contact limit
        #[arg(long)]
        limit: Option<u32>,

        /// Conflict handling policy for the re-check
        #[arg(long, value_enum, default_value_t = OnConflict::Reject)]
        on_conflict: OnConflict,
    },

    /// List all schedules
    List,

    /// Remove a schedule by id
    Remove {
        id: String,
    },

    /// Activate a schedule
    Enable {
        id: String,
    },

    /// Deactivate a schedule without deleting it
    Disable {
        id: String,
    },

    /// Execute a schedule immediately
    RunNow {
        id: String,

        /// Program invoked for each search term
        #[arg(long, env = "GLEANER_RUNNER")]
        runner: String,

        /// Extra arguments passed to the runner before per-term flags
        #[arg(long, value_delimiter = ',')]
        runner_args: Vec<String>,

        /// Per-term timeout in minutes (0 disables the bound)
        #[arg(long, default_value = "0")]
        term_timeout: u64,
    },

    /// Report conflicts between active schedules
    Check,

    /// Write all schedules to a file
    Export {
        path: PathBuf,
    },

    /// Load schedules from a file, assigning fresh ids
    Import {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gleaner=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            runner,
            runner_args,
            term_timeout,
        } => daemon::run(&cli.store, &runner, runner_args, term_timeout).await,

        Commands::Add {
            name,
            at,
            terms,
            every,
            limit,
            skip_duplicates,
            on_conflict,
        } => commands::add(
            &cli.store,
            &name,
            &at,
            terms,
            every.as_deref(),
            limit,
            skip_duplicates,
            on_conflict,
        ),

        Commands::Edit {
            id,
            name,
            at,
            terms,
            limit,
            on_conflict,
        } => commands::edit(
            &cli.store,
            &id,
            name.as_deref(),
            at.as_deref(),
            terms,
            limit,
            on_conflict,
        ),

        Commands::List => commands::list(&cli.store),

        Commands::Remove { id } => commands::remove(&cli.store, &id),

        Commands::Enable { id } => commands::set_active(&cli.store, &id, true),

        Commands::Disable { id } => commands::set_active(&cli.store, &id, false),

        Commands::RunNow {
            id,
            runner,
            runner_args,
            term_timeout,
        } => commands::run_now(&cli.store, &id, &runner, runner_args, term_timeout).await,

        Commands::Check => commands::check(&cli.store),

        Commands::Export { path } => commands::export(&cli.store, &path),

        Commands::Import { path } => commands::import(&cli.store, &path),
    }
}
