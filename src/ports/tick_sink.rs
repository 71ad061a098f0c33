//! Tick Sink Port - Publish Path into the Distribution Hub
//!
//! Both feed adapters push normalized ticks through this trait, so
//! they can be tested against a recording sink without a running hub.

use async_trait::async_trait;

use crate::domain::tick::Tick;

/// Destination for normalized ticks.
#[async_trait]
pub trait TickSink: Send + Sync + 'static {
  /// Hand a tick to the hub.
  ///
  /// Suspends only while the hub's ingest queue is full; the hub never
  /// waits on subscribers, so this never inherits a slow consumer's
  /// backpressure. Errors only once the hub has stopped.
  async fn publish(&self, tick: Tick) -> anyhow::Result<()>;
}
