//! Domain layer - Market data types and rules.
//!
//! Pure logic with no I/O (hexagonal architecture inner ring):
//! ticks, snapshots and the merge rule, symbol mapping, price alerts,
//! reconnect backoff and the shared primary-health flag.

pub mod alert;
pub mod backoff;
pub mod health;
pub mod snapshot;
pub mod symbol;
pub mod tick;

// Re-export core types for convenience
pub use alert::{AlertCondition, AlertFiring, AlertId, NewAlert, PriceAlert};
pub use backoff::{Backoff, OutageDetector};
pub use health::FeedHealth;
pub use snapshot::{MergeDecision, Snapshot};
pub use symbol::{Source, Symbol, SymbolEntry, SymbolMapper};
pub use tick::{DayStats, Origin, Tick, TickError};
