//! Market Data Feed Adapters - Upstream Price Sources
//!
//! Provides the two upstream adapters feeding the distribution hub:
//! - Primary: persistent WebSocket stream with reconnect backoff
//! - Backup: fixed-interval REST poller, always on
//! - Protocol: primary wire messages and frame parsing

pub mod backup_poll;
pub mod primary_ws;
pub mod protocol;

pub use backup_poll::{BackupPoller, PollError, RestQuoteClient};
pub use primary_ws::{PrimaryFeed, PrimaryState};
