//! Market-Data Core - Entry Point
//!
//! Initializes configuration, logging and metrics, starts the
//! market-data pipeline, and runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml (path from `MARKET_CORE_CONFIG`) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create the Prometheus registry and alert notifier
//! 4. Load warm-start snapshots, if configured
//! 5. Start the pipeline (hub loop, primary feed, backup poller)
//! 6. Spawn the HTTP server (/live, /ready, /metrics, read + alerts)
//! 7. Wait for SIGINT → graceful shutdown (not-ready → stop → save → exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use market_data_core::adapters::http::{HttpServer, HttpState};
use market_data_core::adapters::metrics::MetricsRegistry;
use market_data_core::adapters::notify;
use market_data_core::adapters::persistence::SnapshotFile;
use market_data_core::adapters::pipeline::Pipeline;
use market_data_core::config;

/// Environment variable naming the config file.
const CONFIG_ENV: &str = "MARKET_CORE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.service.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        symbols = config.symbols.len(),
        "Starting market-data core"
    );

    // ── 3. Metrics + notifier ───────────────────────────────
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);
    let notifier = notify::from_config(&config.alerts).context("Failed to build notifier")?;

    // ── 4. Warm start ───────────────────────────────────────
    let snapshot_file = config.persistence.snapshot_path.as_deref().map(SnapshotFile::new);
    let seed = match &snapshot_file {
        Some(file) => file.load().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load snapshots, starting cold");
            Vec::new()
        }),
        None => Vec::new(),
    };

    // ── 5. Start the pipeline ───────────────────────────────
    let pipeline = Pipeline::start(&config, Arc::clone(&metrics), notifier, seed)
        .context("Failed to start market-data pipeline")?;

    // ── 6. HTTP server ──────────────────────────────────────
    let (http_shutdown_tx, _) = broadcast::channel::<()>(1);
    let http_state = HttpState::new(pipeline.service(), Arc::clone(&metrics));
    let http_handle = if config.http.enabled {
        let server = HttpServer::new(http_state.clone(), config.http.bind_address.clone());
        let shutdown_rx = http_shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown_rx).await {
                error!(error = %e, "HTTP server failed");
            }
        }))
    } else {
        None
    };

    info!("All tasks spawned, market-data core is running");

    // ── 7. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT, shutting down");
    } else {
        info!("SIGINT received, initiating graceful shutdown");
    }

    // Readiness probe → 503 before anything stops.
    http_state.mark_shutting_down();

    let grace = config.service.shutdown_grace();
    let snapshots = pipeline.stop().await;

    if let Some(file) = &snapshot_file {
        if let Err(e) = file.save(&snapshots).await {
            warn!(error = %e, "Failed to save snapshots");
        }
    }

    let _ = http_shutdown_tx.send(());
    if let Some(handle) = http_handle {
        if tokio::time::timeout(grace, handle).await.is_err() {
            warn!("HTTP server did not stop within grace period");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
