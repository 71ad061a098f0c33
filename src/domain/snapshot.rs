//! Snapshot - Latest Known State per Symbol and the Merge Rule
//!
//! A snapshot only ever moves forward in source time. The merge rule
//! decides whether an incoming tick replaces the current state:
//!
//! - newer source timestamp: apply, whatever the origin
//! - older source timestamp: discard as stale
//! - equal source timestamp: Primary wins while the primary feed is
//!   healthy; during a primary outage whichever tick arrives wins
//!
//! A tick identical to any tick already applied at the snapshot's
//! source timestamp is a duplicate (upstream replay after reconnect)
//! and is discarded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::symbol::Symbol;
use super::tick::{Origin, Tick};

/// Upper bound on fingerprints kept for one source timestamp.
const MAX_FINGERPRINTS: usize = 32;

/// Identity of an applied tick within one source timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    origin: Origin,
    price: Decimal,
    volume: Option<Decimal>,
}

impl Fingerprint {
    fn of(tick: &Tick) -> Self {
        Self {
            origin: tick.origin(),
            price: tick.price(),
            volume: tick.volume(),
        }
    }
}

/// Outcome of offering a tick to an existing snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Replace the snapshot and fan the tick out.
    Apply,
    /// Older than the snapshot.
    Stale,
    /// Same source time as a Primary-built snapshot while Primary is healthy.
    Superseded,
    /// Logically identical to the tick already applied.
    Duplicate,
}

impl MergeDecision {
    /// Label used for the discard counter.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Stale => "stale",
            Self::Superseded => "superseded",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Per-symbol latest state, served to the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub change_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    /// Backup day high when the backup source reports one. Until then,
    /// and between backup quotes, the highest price applied since the
    /// snapshot was created, which may span more than 24h.
    pub high_24h: Decimal,
    /// Backup day low, with the same fallback as `high_24h`.
    pub low_24h: Decimal,
    /// Source timestamp of the tick last applied.
    pub updated_at: DateTime<Utc>,
    /// Origin of the tick last applied. Never serialized.
    #[serde(skip)]
    last_origin: Option<Origin>,
    /// Ticks applied at `updated_at`, for duplicate detection.
    #[serde(skip)]
    applied: Vec<Fingerprint>,
}

impl Snapshot {
    /// Create the first snapshot for a symbol.
    pub fn from_tick(tick: &Tick) -> Self {
        let mut snapshot = Self {
            symbol: tick.symbol().clone(),
            last_price: tick.price(),
            change_24h: None,
            volume_24h: None,
            high_24h: tick.price(),
            low_24h: tick.price(),
            updated_at: tick.source_timestamp(),
            last_origin: Some(tick.origin()),
            applied: vec![Fingerprint::of(tick)],
        };
        snapshot.absorb_day_stats(tick);
        snapshot
    }

    /// Decide whether `tick` may replace this snapshot.
    pub fn decide(&self, tick: &Tick, primary_degraded: bool) -> MergeDecision {
        let ts = tick.source_timestamp();
        if ts < self.updated_at {
            return MergeDecision::Stale;
        }
        if ts > self.updated_at {
            return MergeDecision::Apply;
        }

        if self.applied.contains(&Fingerprint::of(tick)) {
            return MergeDecision::Duplicate;
        }

        if primary_degraded {
            return MergeDecision::Apply;
        }

        match (tick.origin(), self.last_origin) {
            (Origin::Primary, _) => MergeDecision::Apply,
            (Origin::Backup, Some(Origin::Primary)) => MergeDecision::Superseded,
            (Origin::Backup, _) => MergeDecision::Apply,
        }
    }

    /// Overwrite this snapshot with `tick`. Callers must have checked
    /// [`Snapshot::decide`] first.
    pub fn apply(&mut self, tick: &Tick) {
        let price = tick.price();
        let ts = tick.source_timestamp();
        if ts != self.updated_at {
            self.applied.clear();
        }
        if self.applied.len() == MAX_FINGERPRINTS {
            self.applied.remove(0);
        }
        self.applied.push(Fingerprint::of(tick));
        self.last_price = price;
        self.updated_at = ts;
        self.last_origin = Some(tick.origin());
        self.high_24h = self.high_24h.max(price);
        self.low_24h = self.low_24h.min(price);
        self.absorb_day_stats(tick);
    }

    /// Whether the snapshot is older than `max_age` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.updated_at > max_age
    }

    fn absorb_day_stats(&mut self, tick: &Tick) {
        let Some(stats) = tick.day_stats() else {
            return;
        };
        let price = tick.price();
        if let Some(change) = stats.change_pct {
            self.change_24h = Some(change);
        }
        if let Some(volume) = stats.volume {
            self.volume_24h = Some(volume);
        }
        if let Some(high) = stats.high {
            self.high_24h = high.max(price);
        }
        if let Some(low) = stats.low {
            self.low_24h = low.min(price);
        }
    }
}
