//! Backup Poll Feed - Fixed-Cadence REST Quote Poller
//!
//! Polls the secondary upstream on a fixed interval and pushes every
//! mapped quote into the hub with `origin = Backup`. Runs regardless of
//! primary health; the hub's merge rule decides whose data wins.
//!
//! A failed poll (timeout, non-success status, malformed payload) is
//! logged and counted. There is no retry within an interval: the next
//! scheduled poll is the retry.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::BackupFeedConfig;
use crate::domain::symbol::{Source, Symbol, SymbolMapper};
use crate::domain::tick::{DayStats, Origin, Tick};
use crate::ports::quote_source::{BackupQuote, QuoteSource};
use crate::ports::tick_sink::TickSink;

/// Path of the batch ticker endpoint.
const TICKERS_PATH: &str = "/v1/tickers";

/// Header carrying the backup credential.
const API_KEY_HEADER: &str = "X-API-Key";

/// Why one poll produced nothing.
#[derive(Debug, Error)]
pub enum PollError {
  #[error("backup fetch failed: {0:#}")]
  Fetch(anyhow::Error),
  #[error("backup fetch timed out after {0:?}")]
  Timeout(Duration),
  #[error("distribution hub stopped")]
  SinkClosed,
}

/// Batch ticker response.
#[derive(Debug, Deserialize)]
struct TickersResponse {
  data: Vec<WireQuote>,
}

/// One instrument in the ticker response.
#[derive(Debug, Deserialize)]
struct WireQuote {
  symbol: String,
  last: Decimal,
  #[serde(default)]
  change_24h_pct: Option<Decimal>,
  #[serde(default)]
  volume_24h: Option<Decimal>,
  #[serde(default)]
  high_24h: Option<Decimal>,
  #[serde(default)]
  low_24h: Option<Decimal>,
  /// Last update, Unix ms.
  #[serde(default)]
  ts: Option<i64>,
}

impl From<WireQuote> for BackupQuote {
  fn from(wire: WireQuote) -> Self {
    Self {
      upstream_id: wire.symbol,
      price: wire.last,
      change_24h_pct: wire.change_24h_pct,
      volume_24h: wire.volume_24h,
      high_24h: wire.high_24h,
      low_24h: wire.low_24h,
      updated_at: wire.ts.and_then(DateTime::from_timestamp_millis),
    }
  }
}

/// HTTP client for the backup ticker endpoint.
pub struct RestQuoteClient {
  /// Underlying HTTP client.
  http: Client,
  /// Endpoint URL.
  url: Url,
  /// Credential; omitted from the request when empty.
  api_key: String,
}

impl RestQuoteClient {
  /// Build a client from the backup feed config.
  pub fn new(config: &BackupFeedConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.request_timeout())
      .pool_max_idle_per_host(2)
      .build()
      .context("Failed to build HTTP client")?;

    let url = Url::parse(&format!(
      "{}{TICKERS_PATH}",
      config.base_url.trim_end_matches('/')
    ))
    .with_context(|| format!("Invalid backup base_url: {}", config.base_url))?;

    Ok(Self {
      http,
      url,
      api_key: config.api_key.clone(),
    })
  }
}

#[async_trait]
impl QuoteSource for RestQuoteClient {
  async fn fetch_quotes(&self, upstream_ids: &[String]) -> Result<Vec<BackupQuote>> {
    let mut url = self.url.clone();
    url
      .query_pairs_mut()
      .append_pair("symbols", &upstream_ids.join(","));

    let mut request = self.http.get(url);
    if !self.api_key.is_empty() {
      request = request.header(API_KEY_HEADER, &self.api_key);
    }

    let response = request.send().await.context("Backup request failed")?;
    let status = response.status();
    if !status.is_success() {
      bail!("Backup source returned {status}");
    }

    let body: TickersResponse = response
      .json()
      .await
      .context("Malformed backup payload")?;
    Ok(body.data.into_iter().map(BackupQuote::from).collect())
  }
}

/// Fixed-interval poller feeding the hub.
pub struct BackupPoller {
  /// Quote source (REST in production, mocked in tests).
  source: Arc<dyn QuoteSource>,
  /// Upstream id → internal symbol.
  mapper: Arc<SymbolMapper>,
  /// Publish path into the hub.
  sink: Arc<dyn TickSink>,
  /// Symbols consumers care about.
  interest: watch::Receiver<BTreeSet<Symbol>>,
  /// Poll cadence.
  poll_interval: Duration,
  /// Hard bound on one fetch.
  request_timeout: Duration,
  metrics: Arc<MetricsRegistry>,
}

impl BackupPoller {
  pub fn new(
    config: &BackupFeedConfig,
    source: Arc<dyn QuoteSource>,
    mapper: Arc<SymbolMapper>,
    sink: Arc<dyn TickSink>,
    interest: watch::Receiver<BTreeSet<Symbol>>,
    metrics: Arc<MetricsRegistry>,
  ) -> Self {
    Self {
      source,
      mapper,
      sink,
      interest,
      poll_interval: config.poll_interval(),
      request_timeout: config.request_timeout(),
      metrics,
    }
  }

  /// Fetch once and publish every mapped quote. Returns how many ticks
  /// reached the hub.
  pub async fn poll_once(&self) -> Result<usize, PollError> {
    let ids = {
      let set = self.interest.borrow();
      self.mapper.upstream_ids(Source::Backup, set.iter())
    };
    if ids.is_empty() {
      return Ok(0);
    }

    let quotes = tokio::time::timeout(self.request_timeout, self.source.fetch_quotes(&ids))
      .await
      .map_err(|_| PollError::Timeout(self.request_timeout))?
      .map_err(PollError::Fetch)?;

    let mut published = 0;
    for quote in quotes {
      let Some(tick) = self.normalize(quote) else {
        continue;
      };
      self
        .sink
        .publish(tick)
        .await
        .map_err(|_| PollError::SinkClosed)?;
      published += 1;
    }
    Ok(published)
  }

  /// Poll on the fixed cadence until shutdown or until the hub is gone.
  #[instrument(skip_all, name = "backup_poller")]
  pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
    info!(
      interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
      "Starting backup poller"
    );

    let mut ticker = tokio::time::interval(self.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let connected = self
      .metrics
      .feed_connected
      .with_label_values(&[Source::Backup.label()]);

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Backup poller shut down gracefully");
          break;
        }
        _ = ticker.tick() => {
          let result = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
              info!("Shutdown during backup poll, abandoning request");
              break;
            }
            result = self.poll_once() => result,
          };

          match result {
            Ok(published) => {
              connected.set(1);
              debug!(published, "Backup poll complete");
            }
            Err(PollError::SinkClosed) => {
              info!("Distribution hub gone, backup poller stopping");
              break;
            }
            Err(e) => {
              connected.set(0);
              self.metrics.backup_poll_failures.inc();
              warn!(error = %e, "Backup poll failed, waiting for next interval");
            }
          }
        }
      }
    }
    connected.set(0);
  }

  /// Map and validate one quote. Drops (and counts) what cannot become a tick.
  fn normalize(&self, quote: BackupQuote) -> Option<Tick> {
    let Some(symbol) = self.mapper.map(Source::Backup, &quote.upstream_id) else {
      self
        .metrics
        .unmapped_identifiers
        .with_label_values(&[Source::Backup.label()])
        .inc();
      debug!(id = %quote.upstream_id, "Unmapped backup identifier dropped");
      return None;
    };

    let stats = DayStats {
      change_pct: quote.change_24h_pct,
      volume: quote.volume_24h,
      high: quote.high_24h,
      low: quote.low_24h,
    };
    let source_ts = quote.updated_at.unwrap_or_else(Utc::now);

    match Tick::new(symbol, quote.price, None, source_ts, Origin::Backup) {
      Ok(tick) => Some(tick.with_day_stats(stats)),
      Err(e) => {
        self
          .metrics
          .malformed_messages
          .with_label_values(&[Source::Backup.label()])
          .inc();
        warn!(id = %quote.upstream_id, error = %e, "Invalid backup quote dropped");
        None
      }
    }
  }
}
