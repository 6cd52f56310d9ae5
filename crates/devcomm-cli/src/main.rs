//! `devcomm` gateway.
//!
//! Reads `<deviceId> <deviceModel> <hexFrame>` lines from stdin, dispatches
//! each frame and prints the outcome as one JSON line. Due retries are swept
//! in the background until stdin closes or Ctrl-C is pressed.

mod config;
mod input;

use anyhow::{Context, Result};
use clap::Parser;
use config::GatewayConfig;
use devcomm_core::SystemClock;
use devcomm_dispatch::{DispatchCoordinator, LifecycleManager};
use devcomm_protocol::{AdapterRegistry, LoggingServiceClient};
use devcomm_storage::{Database, SqliteMessageStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "devcomm", version, about = "Device communication gateway")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the configured one
    #[arg(short, long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = GatewayConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    run(config).await
}

async fn run(config: GatewayConfig) -> Result<()> {
    let db = Database::connect(config.database.clone())
        .await
        .with_context(|| format!("failed to open {}", config.database.path))?;
    let store = Arc::new(SqliteMessageStore::new(db.pool().clone()));
    let lifecycle = Arc::new(LifecycleManager::new(
        store,
        Arc::new(SystemClock),
        config.dispatch.backoff.build(),
    ));
    let registry = Arc::new(AdapterRegistry::with_builtin(Arc::new(LoggingServiceClient)));
    let coordinator = DispatchCoordinator::new(registry, lifecycle, config.dispatch.clone());

    let shutdown = CancellationToken::new();
    let sweeper = coordinator.spawn_retry_sweeper(shutdown.clone());
    info!(database = %config.database.path, "gateway ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };

        let request = match input::parse_line(&line) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, "skipping input line");
                continue;
            }
        };

        match coordinator.submit(request).await {
            Ok(outcome) => {
                let mut json = serde_json::to_vec(&outcome)?;
                json.push(b'\n');
                stdout.write_all(&json).await?;
                stdout.flush().await?;
            }
            Err(err) => error!(error = %err, code = err.error_code(), "dispatch failed"),
        }
    }

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        error!(error = %err, "retry sweeper panicked");
    }
    coordinator.shutdown().await;

    let stats = coordinator.lifecycle().stats().await?;
    info!(
        total = stats.total(),
        in_flight = stats.in_flight(),
        "gateway stopped"
    );
    db.close().await;
    Ok(())
}
