//! Market Data Service - Query Surface over the Hub
//!
//! Glues the hub's read side and the alert book into the
//! [`MarketDataQuery`] port consumed by the CRUD layer and the HTTP
//! adapter.

use chrono::{DateTime, Utc};

use crate::domain::alert::{AlertId, NewAlert, PriceAlert};
use crate::domain::snapshot::Snapshot;
use crate::domain::symbol::Symbol;
use crate::ports::market_data::{MarketDataQuery, TickStream};

use super::alert_evaluator::AlertBook;
use super::hub::HubHandle;

/// [`MarketDataQuery`] implementation backed by a running hub.
#[derive(Clone)]
pub struct MarketDataService {
  hub: HubHandle,
  alerts: AlertBook,
  /// Snapshots older than this are reported stale.
  max_snapshot_age: chrono::Duration,
}

impl MarketDataService {
  pub fn new(hub: HubHandle, alerts: AlertBook, max_snapshot_age: chrono::Duration) -> Self {
    Self {
      hub,
      alerts,
      max_snapshot_age,
    }
  }

  /// Whether the store holds nothing yet or at least one snapshot
  /// younger than the configured max age.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    let snapshots = self.hub.list_snapshots();
    snapshots.is_empty()
      || snapshots
        .iter()
        .any(|s| !s.is_stale(now, self.max_snapshot_age))
  }

  /// Symbols whose snapshot is older than the max age.
  pub fn stale_symbols(&self, now: DateTime<Utc>) -> Vec<Symbol> {
    self
      .hub
      .list_snapshots()
      .into_iter()
      .filter(|s| s.is_stale(now, self.max_snapshot_age))
      .map(|s| s.symbol)
      .collect()
  }

  /// Toggle an alert without re-arming it.
  pub fn set_alert_enabled(&self, id: AlertId, enabled: bool) -> anyhow::Result<()> {
    self.alerts.set_enabled(id, enabled)
  }

  pub fn hub(&self) -> &HubHandle {
    &self.hub
  }
}

impl MarketDataQuery for MarketDataService {
  fn get_snapshot(&self, symbol: &Symbol) -> Option<Snapshot> {
    self.hub.snapshot_of(symbol)
  }

  fn list_snapshots(&self) -> Vec<Snapshot> {
    self.hub.list_snapshots()
  }

  fn create_alert(&self, rule: NewAlert) -> anyhow::Result<PriceAlert> {
    self.alerts.create_alert(rule)
  }

  fn delete_alert(&self, id: AlertId) -> anyhow::Result<()> {
    self.alerts.delete_alert(id)
  }

  fn reset_alert(&self, id: AlertId) -> anyhow::Result<()> {
    self.alerts.reset_alert(id)
  }

  fn list_alerts(&self) -> Vec<PriceAlert> {
    self.alerts.list_alerts()
  }

  fn subscribe(&self, filter: Option<Symbol>) -> anyhow::Result<TickStream> {
    Ok(self.hub.subscribe(filter)?.into_stream())
  }
}
