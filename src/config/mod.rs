//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`, with
//! upstream credentials overridable from the environment.
//! Endpoints, cadences, backoff bounds and the tracked symbol
//! universe are externalized here - nothing is hardcoded in the
//! domain layer.

pub mod loader;

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::symbol::{Symbol, SymbolEntry};

/// Top-level service configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any task is spawned.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and lifecycle.
  #[serde(default)]
  pub service: ServiceConfig,
  /// Upstream feed settings.
  pub feeds: FeedsConfig,
  /// Tracked symbol universe (`symbolUniverse`).
  pub symbols: Vec<SymbolConfig>,
  /// Distribution hub tuning.
  #[serde(default)]
  pub hub: HubConfig,
  /// Alert notification settings.
  #[serde(default)]
  pub alerts: AlertsConfig,
  /// HTTP read/health/metrics server.
  #[serde(default)]
  pub http: HttpConfig,
  /// Snapshot warm-start file.
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

impl AppConfig {
  /// Resolve the configured universe into mapper entries.
  pub fn symbol_entries(&self) -> Result<Vec<SymbolEntry>> {
    self
      .symbols
      .iter()
      .map(|s| {
        let symbol = Symbol::parse(&s.symbol)
          .with_context(|| format!("Invalid symbol '{}', expected BASE/QUOTE", s.symbol))?;
        Ok(SymbolEntry {
          symbol,
          primary_id: s.primary_id.clone(),
          backup_id: s.backup_id.clone(),
        })
      })
      .collect()
  }
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  #[serde(default = "default_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Bound on draining in-flight work at shutdown (milliseconds).
  #[serde(default = "default_shutdown_grace")]
  pub shutdown_grace_ms: u64,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_name(),
      log_level: default_log_level(),
      shutdown_grace_ms: default_shutdown_grace(),
    }
  }
}

impl ServiceConfig {
  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_millis(self.shutdown_grace_ms)
  }
}

/// Both upstream sources.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
  pub primary: PrimaryFeedConfig,
  pub backup: BackupFeedConfig,
}

/// Streaming upstream configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryFeedConfig {
  /// WebSocket endpoint.
  pub ws_url: String,
  /// Upstream credential. Overridden by `PRIMARY_FEED_API_KEY`.
  #[serde(default)]
  pub api_key: String,
  /// TCP + TLS + WebSocket handshake timeout.
  #[serde(default = "default_connect_timeout")]
  pub connect_timeout_ms: u64,
  /// How long to wait for the auth acknowledgement.
  #[serde(default = "default_auth_timeout")]
  pub auth_timeout_ms: u64,
  /// First reconnect delay (`reconnectBaseDelayMs`).
  #[serde(default = "default_reconnect_base")]
  pub reconnect_base_delay_ms: u64,
  /// Reconnect delay cap (`reconnectMaxDelayMs`).
  #[serde(default = "default_reconnect_max")]
  pub reconnect_max_delay_ms: u64,
  /// Consecutive failures that promote the backup to sole source.
  #[serde(default = "default_outage_threshold")]
  pub outage_failure_threshold: u32,
  /// Window the failures must fall in.
  #[serde(default = "default_outage_window")]
  pub outage_window_ms: u64,
}

impl PrimaryFeedConfig {
  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn auth_timeout(&self) -> Duration {
    Duration::from_millis(self.auth_timeout_ms)
  }

  pub fn reconnect_base_delay(&self) -> Duration {
    Duration::from_millis(self.reconnect_base_delay_ms)
  }

  pub fn reconnect_max_delay(&self) -> Duration {
    Duration::from_millis(self.reconnect_max_delay_ms)
  }

  pub fn outage_window(&self) -> Duration {
    Duration::from_millis(self.outage_window_ms)
  }
}

/// Polled upstream configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupFeedConfig {
  /// REST base URL.
  pub base_url: String,
  /// Backup credential. Overridden by `BACKUP_FEED_API_KEY`.
  #[serde(default)]
  pub api_key: String,
  /// Poll cadence (`pollIntervalMs`).
  #[serde(default = "default_poll_interval")]
  pub poll_interval_ms: u64,
  /// Hard timeout per poll request.
  #[serde(default = "default_request_timeout")]
  pub request_timeout_ms: u64,
}

impl BackupFeedConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}

/// One tracked instrument and its upstream spellings.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
  /// Internal `BASE/QUOTE` symbol.
  pub symbol: String,
  /// Identifier on the streaming upstream.
  pub primary_id: String,
  /// Identifier on the polled upstream.
  pub backup_id: String,
}

/// Distribution hub tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
  /// Capacity of the adapters → hub queue.
  #[serde(default = "default_ingest_capacity")]
  pub ingest_capacity: usize,
  /// Per-subscriber delivery buffer.
  #[serde(default = "default_subscriber_capacity")]
  pub subscriber_capacity: usize,
  /// A subscriber failing deliveries this long is evicted
  /// (`subscriberDeliveryTimeoutMs`).
  #[serde(default = "default_delivery_timeout")]
  pub subscriber_delivery_timeout_ms: u64,
  /// A subscriber failing this many deliveries in a row is evicted.
  #[serde(default = "default_max_failures")]
  pub max_consecutive_failures: u32,
  /// Snapshots older than this count as stale for readiness.
  #[serde(default = "default_max_snapshot_age")]
  pub max_snapshot_age_ms: u64,
}

impl Default for HubConfig {
  fn default() -> Self {
    Self {
      ingest_capacity: default_ingest_capacity(),
      subscriber_capacity: default_subscriber_capacity(),
      subscriber_delivery_timeout_ms: default_delivery_timeout(),
      max_consecutive_failures: default_max_failures(),
      max_snapshot_age_ms: default_max_snapshot_age(),
    }
  }
}

impl HubConfig {
  pub fn subscriber_delivery_timeout(&self) -> Duration {
    Duration::from_millis(self.subscriber_delivery_timeout_ms)
  }

  pub fn max_snapshot_age(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(self.max_snapshot_age_ms).unwrap_or(i64::MAX))
  }
}

/// Alert notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
  /// Webhook receiving firings as JSON. Log-only when absent.
  pub webhook_url: Option<String>,
  /// Timeout for one notification call.
  #[serde(default = "default_notify_timeout")]
  pub notify_timeout_ms: u64,
}

impl Default for AlertsConfig {
  fn default() -> Self {
    Self {
      webhook_url: None,
      notify_timeout_ms: default_notify_timeout(),
    }
  }
}

impl AlertsConfig {
  pub fn notify_timeout(&self) -> Duration {
    Duration::from_millis(self.notify_timeout_ms)
  }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
  /// Serve the read/health/metrics endpoints.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Bind address.
  #[serde(default = "default_bind_address")]
  pub bind_address: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_bind_address(),
    }
  }
}

/// Snapshot warm-start configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceConfig {
  /// JSON file loaded at start and written at stop.
  pub snapshot_path: Option<String>,
}

// Default value functions for serde

fn default_name() -> String {
  "market-data-core".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_shutdown_grace() -> u64 {
  5_000
}

fn default_connect_timeout() -> u64 {
  10_000
}

fn default_auth_timeout() -> u64 {
  5_000
}

fn default_reconnect_base() -> u64 {
  500
}

fn default_reconnect_max() -> u64 {
  30_000
}

fn default_outage_threshold() -> u32 {
  3
}

fn default_outage_window() -> u64 {
  60_000
}

fn default_poll_interval() -> u64 {
  5_000
}

fn default_request_timeout() -> u64 {
  5_000
}

fn default_ingest_capacity() -> usize {
  8_192
}

fn default_subscriber_capacity() -> usize {
  1_024
}

fn default_delivery_timeout() -> u64 {
  2_000
}

fn default_max_failures() -> u32 {
  64
}

fn default_max_snapshot_age() -> u64 {
  30_000
}

fn default_notify_timeout() -> u64 {
  5_000
}

fn default_true() -> bool {
  true
}

fn default_bind_address() -> String {
  "0.0.0.0:9090".to_string()
}
