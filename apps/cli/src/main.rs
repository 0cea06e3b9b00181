//! Foresight CLI - command-line interface for the training orchestrator
//!
//! The `foresight` binary submits training jobs and streams their events,
//! and inspects or maintains the persisted session records.

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use commands::types::{CleanupArgs, TrainArgs};
use commands::{Context, cancel, config, reconcile, sessions, status, train};

/// Foresight CLI - price-model training orchestration
#[derive(Parser, Debug)]
#[command(
    name = "foresight",
    author,
    version,
    about = "Foresight - training job orchestration",
    long_about = "Submits price-model training jobs, streams their progress as JSON lines,\n\
                  and inspects the persisted session records."
)]
struct Args {
    /// Log level or filter directive (overrides the configured level)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (defaults to ./foresight.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session database (overrides storage.database_path)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a training job and stream its events
    ///
    /// Prints one JSON object per event on stdout until the job reaches a
    /// terminal state. Ctrl-C cancels the job.
    Train(TrainArgs),

    /// Show the status of one session
    Status {
        /// Session ID
        session_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List sessions that are currently in progress
    Active {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List all stored sessions, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Request cancellation of a running session
    Cancel {
        /// Session ID
        session_id: String,
    },

    /// Fail sessions whose worker is gone and cancel overdue ones
    Reconcile {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete old finished sessions
    Cleanup(CleanupArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let mut settings = foresight_core::Config::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }
    if let Some(database) = args.database {
        settings.storage.database_path = Some(database);
    }
    foresight_core::logging::init(&settings.logging)?;

    let ctx = Context::new(settings);
    match command {
        Command::Train(train_args) => train::execute(&ctx, train_args).await?,
        Command::Status { session_id, json } => status::execute(&ctx, &session_id, json)?,
        Command::Active { json } => sessions::active(&ctx, json)?,
        Command::List { json } => sessions::list(&ctx, json)?,
        Command::Cancel { session_id } => cancel::execute(&ctx, &session_id)?,
        Command::Reconcile { json } => reconcile::execute(&ctx, json)?,
        Command::Cleanup(cleanup_args) => sessions::cleanup(&ctx, &cleanup_args)?,
        Command::Config => config::execute(&ctx)?,
    }

    Ok(())
}
