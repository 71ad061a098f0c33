//! Market Data Query Port - Outbound Read/Alert Surface
//!
//! What the excluded CRUD layer may ask of the core: read snapshots,
//! manage price alerts, and attach a live tick stream for chart and
//! order-book widgets.

use std::pin::Pin;

use futures_util::Stream;

use crate::domain::alert::{AlertId, NewAlert, PriceAlert};
use crate::domain::snapshot::Snapshot;
use crate::domain::symbol::Symbol;
use crate::domain::tick::Tick;

/// Live stream of ticks for one subscription. Dropping it detaches.
pub type TickStream = Pin<Box<dyn Stream<Item = Tick> + Send>>;

/// Query surface over the market-data core.
pub trait MarketDataQuery: Send + Sync + 'static {
  /// Latest snapshot for a symbol.
  fn get_snapshot(&self, symbol: &Symbol) -> Option<Snapshot>;

  /// All snapshots, sorted by symbol.
  fn list_snapshots(&self) -> Vec<Snapshot>;

  /// Register a new alert; it is evaluated against every tick the hub
  /// processes after this call returns.
  fn create_alert(&self, rule: NewAlert) -> anyhow::Result<PriceAlert>;

  /// Remove an alert.
  fn delete_alert(&self, id: AlertId) -> anyhow::Result<()>;

  /// Re-arm a fired alert.
  fn reset_alert(&self, id: AlertId) -> anyhow::Result<()>;

  /// Current alerts as last published by the evaluator.
  fn list_alerts(&self) -> Vec<PriceAlert>;

  /// Stream ticks for one symbol, or all symbols when `filter` is `None`.
  fn subscribe(&self, filter: Option<Symbol>) -> anyhow::Result<TickStream>;
}
