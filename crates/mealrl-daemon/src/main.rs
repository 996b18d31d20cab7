//! mealrl daemon - online recipe recommendation service
//!
//! Serves `predict` and `feedback` over HTTP for a single tabular agent
//! whose table is persisted after every piece of feedback.

// Pedantic clippy allows - intentional design decisions for this crate:
// - doc_markdown: route paths and file names are pervasive in docs
// - cast_precision_loss: counters are reported as floats
// - unused_async: Async handlers maintain consistency in axum
// - manual_let_else: match with Ok/Some patterns is often clearer than let-else
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::unused_async)]
#![allow(clippy::manual_let_else)]

use std::sync::Arc;

use anyhow::Result;
use mealrl_core::util::load_env_file;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;

use crate::config::Config;
use crate::daemon::MealRlDaemon;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from mealrl.env file first
    let env_file = load_env_file();

    // Load configuration to get log settings
    let config = Config::load()?;

    // Initialize tracing with optional file logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "mealrld={level},mealrl_rl={level},tower_http=debug",
            level = config.server.log_level
        )
        .into()
    });

    let file_logging_enabled = if !config.server.log_file.is_empty() {
        let log_path = std::path::Path::new(&config.server.log_file);
        let log_dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let log_filename = log_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("mealrld.log");

        match std::fs::create_dir_all(log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Log to both file and stdout
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
                    .init();

                // The guard flushes on drop; keep it for the whole process
                Box::leak(Box::new(guard));
                true
            }
            Err(e) => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer())
                    .init();
                eprintln!(
                    "Warning: Could not set up file logging to '{}': {}. Using stdout only.",
                    config.server.log_file, e
                );
                false
            }
        }
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        false
    };

    info!("Starting mealrl daemon v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = env_file {
        info!("Loaded environment from {:?}", path);
    }
    if file_logging_enabled {
        info!("Logging to file: {}", config.server.log_file);
    } else if !config.server.log_file.is_empty() {
        warn!("File logging was configured but could not be enabled");
    }
    info!(
        "Configuration loaded: bind_address={}, rule={}, model={:?}",
        config.server.bind_address,
        config.agent.rule.as_str(),
        config.agent.model_path
    );

    let daemon = Arc::new(MealRlDaemon::new(config)?);
    let daemon_handle = daemon.clone();

    let daemon_task = tokio::spawn(async move {
        if let Err(e) = daemon.run().await {
            error!("Daemon error: {}", e);
        }
    });

    // Wait for shutdown signal (SIGINT or SIGTERM)
    shutdown_signal().await;

    info!("Initiating graceful shutdown...");
    daemon_handle.shutdown();
    let _ = daemon_task.await;

    info!("mealrl daemon stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}. Using fallback.", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}. Using Ctrl+C only.", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            info!("Received SIGTERM");
        }
    }
}
