//! Pipeline Supervisor - Lifecycle of the Market-Data Core
//!
//! Builds the hub, the alert evaluator and both feed adapters from one
//! config, spawns exactly three long-running tasks (primary feed,
//! backup poller, hub delivery loop) and coordinates their shutdown.
//!
//! `start`/`stop` are an explicit method pair: every pipeline is an
//! isolated instance, so tests can run several side by side.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::feeds::{BackupPoller, PrimaryFeed, PrimaryState, RestQuoteClient};
use super::metrics::MetricsRegistry;
use crate::config::loader::validate_config;
use crate::config::AppConfig;
use crate::domain::health::FeedHealth;
use crate::domain::snapshot::Snapshot;
use crate::domain::symbol::SymbolMapper;
use crate::ports::notifier::Notifier;
use crate::ports::quote_source::QuoteSource;
use crate::ports::tick_sink::TickSink;
use crate::usecases::alert_evaluator::AlertEvaluator;
use crate::usecases::hub::{DistributionHub, HubHandle, HubSettings};
use crate::usecases::market_data::MarketDataService;

/// A running market-data core.
pub struct Pipeline {
  /// Front door to the hub.
  hub: HubHandle,
  /// Query surface handed to the HTTP layer.
  service: MarketDataService,
  /// Shared primary outage flag.
  health: Arc<FeedHealth>,
  /// Primary adapter connection state.
  primary_state: watch::Receiver<PrimaryState>,
  /// Shutdown broadcaster.
  shutdown_tx: broadcast::Sender<()>,
  /// Named long-running tasks.
  tasks: Vec<(&'static str, JoinHandle<()>)>,
  /// Bound on draining at shutdown.
  grace: Duration,
}

impl Pipeline {
  /// Start against the configured REST backup source.
  pub fn start(
    config: &AppConfig,
    metrics: Arc<MetricsRegistry>,
    notifier: Arc<dyn Notifier>,
    seed: Vec<Snapshot>,
  ) -> Result<Self> {
    let source = Arc::new(RestQuoteClient::new(&config.feeds.backup)?);
    Self::start_with_source(config, metrics, notifier, source, seed)
  }

  /// Start with an explicit backup quote source.
  ///
  /// `seed` warm-starts the snapshot store before any tick is processed.
  /// The config is validated first; nothing is spawned if it is invalid.
  #[instrument(skip_all, name = "pipeline_start")]
  pub fn start_with_source(
    config: &AppConfig,
    metrics: Arc<MetricsRegistry>,
    notifier: Arc<dyn Notifier>,
    source: Arc<dyn QuoteSource>,
    seed: Vec<Snapshot>,
  ) -> Result<Self> {
    validate_config(config)?;
    let mapper = Arc::new(SymbolMapper::new(config.symbol_entries()?));
    let health = Arc::new(FeedHealth::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // ── Hub + inline alert evaluator ──
    let (mut hub, handle) = DistributionHub::new(
      HubSettings::from(&config.hub),
      mapper.symbols(),
      Arc::clone(&health),
      Arc::clone(&metrics),
    );
    if !seed.is_empty() {
      hub.seed(seed);
    }
    let (evaluator, alerts) =
      AlertEvaluator::new(notifier, Arc::clone(&metrics), handle.inline_waker());
    hub.add_inline(Box::new(evaluator));

    let sink: Arc<dyn TickSink> = Arc::new(handle.clone());

    // ── Feed adapters ──
    let primary = PrimaryFeed::new(
      config.feeds.primary.clone(),
      Arc::clone(&mapper),
      Arc::clone(&sink),
      handle.interest(),
      Arc::clone(&health),
      Arc::clone(&metrics),
    );
    let primary_state = primary.state();

    let backup = BackupPoller::new(
      &config.feeds.backup,
      source,
      mapper,
      sink,
      handle.interest(),
      metrics,
    );

    // ── Spawn ──
    let tasks = vec![
      ("hub", tokio::spawn(hub.run(shutdown_tx.subscribe()))),
      ("primary_feed", tokio::spawn(primary.run(shutdown_tx.subscribe()))),
      ("backup_poller", tokio::spawn(backup.run(shutdown_tx.subscribe()))),
    ];
    info!(task_count = tasks.len(), "Market-data pipeline started");

    let service = MarketDataService::new(handle.clone(), alerts, config.hub.max_snapshot_age());

    Ok(Self {
      hub: handle,
      service,
      health,
      primary_state,
      shutdown_tx,
      tasks,
      grace: config.service.shutdown_grace(),
    })
  }

  /// Query surface over this pipeline.
  pub fn service(&self) -> MarketDataService {
    self.service.clone()
  }

  pub fn hub(&self) -> &HubHandle {
    &self.hub
  }

  pub fn health(&self) -> Arc<FeedHealth> {
    Arc::clone(&self.health)
  }

  /// Follow the primary adapter's connection state.
  pub fn primary_state(&self) -> watch::Receiver<PrimaryState> {
    self.primary_state.clone()
  }

  /// Signal shutdown, wait up to the grace period, abort stragglers.
  ///
  /// Returns the final snapshots for the caller to persist.
  #[instrument(skip_all, name = "pipeline_stop")]
  pub async fn stop(self) -> Vec<Snapshot> {
    info!(grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX), "Stopping market-data pipeline");
    let _ = self.shutdown_tx.send(());

    let deadline = tokio::time::Instant::now() + self.grace;
    for (name, mut task) in self.tasks {
      match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(())) => debug!(task = name, "Task stopped"),
        Ok(Err(e)) => error!(task = name, error = %e, "Task panicked"),
        Err(_) => {
          warn!(task = name, "Task exceeded shutdown grace, aborting");
          task.abort();
        }
      }
    }

    let snapshots = self.hub.list_snapshots();
    info!(snapshots = snapshots.len(), "Market-data pipeline stopped");
    snapshots
  }
}
