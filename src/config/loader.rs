//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, overlaying credentials from the
//! environment, validating all parameters, and providing clear error
//! messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Environment variable overriding `feeds.primary.api_key`.
pub const PRIMARY_KEY_ENV: &str = "PRIMARY_FEED_API_KEY";
/// Environment variable overriding `feeds.backup.api_key`.
pub const BACKUP_KEY_ENV: &str = "BACKUP_FEED_API_KEY";

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let mut config = parse_config(&content)?;
  apply_env_credentials(&mut config, |key| std::env::var(key).ok());
  validate_config(&config)?;

  info!(
    symbols = config.symbols.len(),
    poll_interval_ms = config.feeds.backup.poll_interval_ms,
    reconnect_base_ms = config.feeds.primary.reconnect_base_delay_ms,
    reconnect_max_ms = config.feeds.primary.reconnect_max_delay_ms,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse TOML text without touching the environment or validating.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  toml::from_str(content).with_context(|| "Failed to parse config.toml")
}

/// Overlay upstream credentials from the environment.
///
/// Non-empty env values win over the file, so keys never need to be
/// committed to `config.toml`.
pub fn apply_env_credentials<F>(config: &mut AppConfig, lookup: F)
where
  F: Fn(&str) -> Option<String>,
{
  if let Some(key) = lookup(PRIMARY_KEY_ENV).filter(|k| !k.is_empty()) {
    config.feeds.primary.api_key = key;
  }
  if let Some(key) = lookup(BACKUP_KEY_ENV).filter(|k| !k.is_empty()) {
    config.feeds.backup.api_key = key;
  }
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - A non-empty, well-formed, duplicate-free symbol universe
/// - Non-empty endpoints
/// - Positive cadences, timeouts and capacities
/// - Coherent backoff bounds
pub fn validate_config(config: &AppConfig) -> Result<()> {
  // Symbol universe
  anyhow::ensure!(
    !config.symbols.is_empty(),
    "At least one symbol must be configured"
  );

  let entries = config.symbol_entries()?;
  let mut seen_symbols = HashSet::new();
  let mut seen_primary = HashSet::new();
  let mut seen_backup = HashSet::new();
  for entry in &entries {
    anyhow::ensure!(
      !entry.primary_id.is_empty() && !entry.backup_id.is_empty(),
      "Symbol {} has an empty upstream identifier",
      entry.symbol
    );
    anyhow::ensure!(
      seen_symbols.insert(entry.symbol.clone()),
      "Symbol {} is configured twice",
      entry.symbol
    );
    anyhow::ensure!(
      seen_primary.insert(entry.primary_id.as_str()),
      "Primary identifier {} maps to more than one symbol",
      entry.primary_id
    );
    anyhow::ensure!(
      seen_backup.insert(entry.backup_id.as_str()),
      "Backup identifier {} maps to more than one symbol",
      entry.backup_id
    );
  }

  // Primary feed
  let primary = &config.feeds.primary;
  anyhow::ensure!(
    !primary.ws_url.is_empty(),
    "Primary feed ws_url must not be empty"
  );
  anyhow::ensure!(
    primary.reconnect_base_delay_ms > 0,
    "reconnect_base_delay_ms must be positive"
  );
  anyhow::ensure!(
    primary.reconnect_max_delay_ms >= primary.reconnect_base_delay_ms,
    "reconnect_max_delay_ms ({}) must be >= reconnect_base_delay_ms ({})",
    primary.reconnect_max_delay_ms,
    primary.reconnect_base_delay_ms
  );
  anyhow::ensure!(
    primary.connect_timeout_ms > 0 && primary.auth_timeout_ms > 0,
    "Primary feed timeouts must be positive"
  );
  anyhow::ensure!(
    primary.outage_failure_threshold > 0,
    "outage_failure_threshold must be positive"
  );

  // Backup feed
  let backup = &config.feeds.backup;
  anyhow::ensure!(
    !backup.base_url.is_empty(),
    "Backup feed base_url must not be empty"
  );
  anyhow::ensure!(
    backup.poll_interval_ms > 0,
    "poll_interval_ms must be positive"
  );
  anyhow::ensure!(
    backup.request_timeout_ms > 0,
    "request_timeout_ms must be positive"
  );

  // Hub
  let hub = &config.hub;
  anyhow::ensure!(
    hub.ingest_capacity > 0 && hub.subscriber_capacity > 0,
    "Hub channel capacities must be positive"
  );
  anyhow::ensure!(
    hub.max_consecutive_failures > 0,
    "max_consecutive_failures must be positive"
  );
  anyhow::ensure!(
    hub.subscriber_delivery_timeout_ms > 0,
    "subscriber_delivery_timeout_ms must be positive"
  );

  Ok(())
}
