//! `watergrid` daemon.
//!
//! `watergrid serve` (the default) refreshes the snapshot in the background
//! and serves it over HTTP until Ctrl-C. `watergrid refresh` runs a single
//! fetch→merge→write cycle and prints the resulting status.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use watergrid_service::config::Config;
use watergrid_service::ingest::usgs::UsgsClient;
use watergrid_service::logging::{self, DataSource};
use watergrid_service::refresh::{RefreshCoordinator, RefreshScheduler};
use watergrid_service::server::{self, ServerContext};
use watergrid_service::store::SnapshotStore;

#[derive(Debug, Parser)]
#[command(name = "watergrid", version, about = "USGS water data snapshot service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh periodically and serve the snapshot over HTTP.
    Serve,
    /// Run one refresh cycle and exit.
    Refresh,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init_logger(&config.log_level, config.log_file.as_deref())
        .context("Failed to open log file")?;

    // The blocking HTTP client must be built outside the tokio runtime.
    let source = UsgsClient::new(&config.base_url, config.request_timeout())
        .context("Failed to build USGS HTTP client")?;
    let coordinator = Arc::new(RefreshCoordinator::new(
        SnapshotStore::new(&config.snapshot_path),
        Box::new(source),
        config.refresh_settings(),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Refresh => refresh_once(&coordinator),
        Command::Serve => serve(&config, coordinator),
    }
}

fn refresh_once(coordinator: &RefreshCoordinator) -> Result<()> {
    let outcome = coordinator.run_cycle();
    let status = coordinator.status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    let summary = outcome.context("Refresh failed")?;
    println!(
        "Saved {} readings to {}",
        summary.rows,
        coordinator.store().path().display()
    );
    Ok(())
}

fn serve(config: &Config, coordinator: Arc<RefreshCoordinator>) -> Result<()> {
    let addr = config.socket_addr()?;
    let scheduler = RefreshScheduler::spawn(coordinator.clone(), config.refresh_interval())
        .context("Failed to start refresh thread")?;

    let ctx = Arc::new(ServerContext {
        coordinator,
        stations: config.stations.clone(),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let served = runtime.block_on(async move {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        server::serve(listener, ctx, async {
            if tokio::signal::ctrl_c().await.is_err() {
                logging::warn(DataSource::System, None, "could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("HTTP server failed")
    });

    // Let any in-flight /data refreshes finish before the scheduler goes.
    runtime.shutdown_timeout(std::time::Duration::from_secs(30));
    logging::info(DataSource::System, None, "stopping refresh scheduler");
    scheduler.shutdown();
    served
}
