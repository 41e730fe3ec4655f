//! taskqd server binary.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Arc;
use taskqd::cli::{Cli, Command};
use taskqd::config::Config;
use taskqd::coordinator::Coordinator;
use taskqd::coordinator::dispatch::ShellExecutor;
use taskqd::db::Database;
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // CLI overrides
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(worker_id) = &cli.worker_id {
        config.coordinator.worker_id = worker_id.clone();
    }

    match cli.command {
        Some(Command::Serve) | None => run_server(config).await,
    }
}

async fn run_server(config: Config) -> Result<()> {
    info!("Starting taskqd v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {:?}", config.server.db_path);

    let db = Database::open_with_backoff(&config.server.db_path, &config.backoff).await?;
    info!("Task store initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let coordinator = Coordinator::new(
        db.clone(),
        config.coordinator.clone(),
        Arc::new(ShellExecutor),
    );
    let coordinator_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { coordinator.run(rx).await })
    };

    let api_handle = {
        let db = db.clone();
        let port = config.server.port;
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = taskqd::api::start_server(db, port, rx).await {
                warn!(error = %e, "API server exited with error");
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown_tx.send(true)?;

    // The coordinator bounds its own drain by the configured grace period.
    let _ = coordinator_handle.await;
    let _ = api_handle.await;

    info!("Shutdown complete");
    Ok(())
}
