//! Tick - One Normalized Price Observation
//!
//! Ticks are immutable once built. Validation happens in the
//! constructor so nothing downstream ever sees a non-positive price
//! or a negative volume.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::symbol::Symbol;

/// Provenance of a tick. Diagnostics and merge bookkeeping only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Streaming upstream.
    Primary,
    /// Polled upstream.
    Backup,
}

impl Origin {
    /// Label used for metrics and logs.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

/// Rolling 24h statistics reported alongside a price by the backup source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DayStats {
    /// 24h change in percent.
    pub change_pct: Option<Decimal>,
    /// 24h traded volume.
    pub volume: Option<Decimal>,
    /// 24h high.
    pub high: Option<Decimal>,
    /// 24h low.
    pub low: Option<Decimal>,
}

/// Reasons a tick cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TickError {
    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),
    #[error("volume must not be negative, got {0}")]
    NegativeVolume(Decimal),
}

/// One observed trade/quote event in the internal symbol space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    symbol: Symbol,
    price: Decimal,
    /// `None` means unknown, not zero.
    volume: Option<Decimal>,
    source_timestamp: DateTime<Utc>,
    ingest_timestamp: DateTime<Utc>,
    origin: Origin,
    day_stats: Option<DayStats>,
}

impl Tick {
    /// Build a tick stamped with the current local receipt time.
    pub fn new(
        symbol: Symbol,
        price: Decimal,
        volume: Option<Decimal>,
        source_timestamp: DateTime<Utc>,
        origin: Origin,
    ) -> Result<Self, TickError> {
        Self::received_at(symbol, price, volume, source_timestamp, Utc::now(), origin)
    }

    /// Build a tick with an explicit receipt time.
    pub fn received_at(
        symbol: Symbol,
        price: Decimal,
        volume: Option<Decimal>,
        source_timestamp: DateTime<Utc>,
        ingest_timestamp: DateTime<Utc>,
        origin: Origin,
    ) -> Result<Self, TickError> {
        if price <= Decimal::ZERO {
            return Err(TickError::NonPositivePrice(price));
        }
        if let Some(v) = volume {
            if v < Decimal::ZERO {
                return Err(TickError::NegativeVolume(v));
            }
        }
        Ok(Self {
            symbol,
            price,
            volume,
            source_timestamp,
            ingest_timestamp,
            origin,
            day_stats: None,
        })
    }

    /// Attach 24h statistics (backup ticks).
    #[must_use]
    pub fn with_day_stats(mut self, stats: DayStats) -> Self {
        self.day_stats = Some(stats);
        self
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn volume(&self) -> Option<Decimal> {
        self.volume
    }

    pub fn source_timestamp(&self) -> DateTime<Utc> {
        self.source_timestamp
    }

    pub fn ingest_timestamp(&self) -> DateTime<Utc> {
        self.ingest_timestamp
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn day_stats(&self) -> Option<&DayStats> {
        self.day_stats.as_ref()
    }

    /// Receipt latency; negative when the upstream clock runs ahead.
    pub fn ingest_lag(&self) -> chrono::Duration {
        self.ingest_timestamp - self.source_timestamp
    }
}
