//! Armitage server binary.
//!
//! `serve` boots the HTTP surface plus the background sweepers (temp-file
//! registry, event retention). `check-config` resolves and prints the
//! effective configuration without starting anything.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use armitage::api::{build_router, Container};
use armitage::config::Settings;
use armitage::logging;

/// Interval between temp-file registry sweeps.
const TEMP_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between event-retention sweeps.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Parser)]
#[command(name = "armitage", about = "Multi-agent orchestration runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve,
    /// Resolve and print the effective configuration.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::Serve => serve(settings).await,
        Command::CheckConfig => {
            logging::init_cli(&settings.log_level);
            println!("{settings:#?}");
            Ok(())
        }
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let _logging_guard = logging::init_production(&settings.logs_dir, &settings.log_level)?;
    info!(listen_addr = %settings.listen_addr, "armitage starting");

    let listen_addr = settings.listen_addr.clone();
    let container = Arc::new(
        Container::build(settings)
            .await
            .context("failed to build runtime container")?,
    );

    spawn_temp_sweeper(Arc::clone(&container));
    spawn_retention_sweeper(Arc::clone(&container));

    let router = build_router(Arc::clone(&container));
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listen_addr, "listening");
    axum::serve(listener, router)
        .await
        .context("server terminated")?;
    Ok(())
}

/// Periodically remove expired spill files.
fn spawn_temp_sweeper(container: Arc<Container>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TEMP_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let report = container.large_response.sweep().await;
            if let Some(removed) = report.get("removed").and_then(|r| r.as_array()) {
                if !removed.is_empty() {
                    info!(count = removed.len(), "temp files swept");
                }
            }
        }
    });
}

/// Periodically delete events past the retention window (indexed backend
/// only).
fn spawn_retention_sweeper(container: Arc<Container>) {
    let Some(events) = container.indexed_events.clone() else {
        return;
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match events.sweep_expired().await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "expired events swept");
                }
                Ok(_) => {}
                Err(error) => warn!(%error, "event retention sweep failed"),
            }
        }
    });
}
