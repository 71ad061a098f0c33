//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) the market-data core needs from,
//! and offers to, the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `TickSink`: publish path from the feed adapters into the hub
//! - `QuoteSource`: backup request/response price source
//! - `Notifier`: alert notification collaborator
//! - `MarketDataQuery`: read/alert surface for the CRUD layer

pub mod market_data;
pub mod notifier;
pub mod quote_source;
pub mod tick_sink;

pub use market_data::{MarketDataQuery, TickStream};
pub use notifier::Notifier;
pub use quote_source::{BackupQuote, QuoteSource};
pub use tick_sink::TickSink;
