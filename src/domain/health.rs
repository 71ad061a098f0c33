//! Feed Health - Shared Primary Outage Flag
//!
//! Written by the primary adapter, read by the hub's merge rule and the
//! readiness probe. Raising the flag makes backup data authoritative on
//! timestamp ties; it is cleared the next time the primary subscribes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::{info, warn};

/// Health of the primary streaming feed.
#[derive(Debug, Default)]
pub struct FeedHealth {
    /// Whether a sustained primary outage is in effect.
    degraded: AtomicBool,
    /// Whether the primary session is currently subscribed.
    connected: AtomicBool,
    /// Total reconnect attempts since start.
    reconnects: AtomicU32,
}

impl FeedHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the outage flag. Returns `true` if it was not already raised.
    pub fn mark_degraded(&self) -> bool {
        let was = self.degraded.swap(true, Ordering::AcqRel);
        if !was {
            warn!("Primary feed marked degraded, backup is now authoritative");
        }
        !was
    }

    /// Clear the outage flag. Returns `true` if it was raised.
    pub fn clear(&self) -> bool {
        let was = self.degraded.swap(false, Ordering::AcqRel);
        if was {
            info!("Primary feed recovered, outage flag cleared");
        }
        was
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn record_reconnect(&self) -> u32 {
        self.reconnects.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_transitions_report_edges() {
        let h = FeedHealth::new();
        assert!(!h.is_degraded());
        assert!(h.mark_degraded());
        assert!(!h.mark_degraded());
        assert!(h.is_degraded());
        assert!(h.clear());
        assert!(!h.clear());
    }
}
