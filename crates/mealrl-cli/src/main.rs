//! mealrl CLI - offline training and table inspection
//!
//! Trains tabular agents against the built-in grid world or a remote
//! kitchen simulator, and summarizes persisted tables.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::unused_async)]
#![allow(clippy::cast_precision_loss)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{remote, report, train};

#[derive(Parser)]
#[command(name = "mealrl")]
#[command(author, version, about = "mealrl - tabular RL recipe recommendation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on the built-in grid environment
    Train(train::TrainArgs),

    /// Train with Q-learning against the kitchen simulator
    TrainRemote(remote::RemoteArgs),

    /// Summarize a persisted table
    Report(report::ReportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from mealrl.env file (before parsing args)
    let env_file = mealrl_core::util::load_env_file();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mealrl_cli={log_level},mealrl_rl={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = env_file {
        debug!("Loaded environment from {:?}", path);
    }

    match cli.command {
        Commands::Train(args) => train::run(args).await,
        Commands::TrainRemote(args) => remote::run(args).await,
        Commands::Report(args) => report::run(&args),
    }
}
