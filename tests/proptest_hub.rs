//! Property-Based Tests - Merge Rule and Mapping Invariants
//!
//! Uses `proptest` to check that the snapshot store never moves
//! backwards in time, whatever order ticks arrive in.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use market_data_core::adapters::metrics::MetricsRegistry;
use market_data_core::domain::{
    Backoff, FeedHealth, MergeDecision, Origin, Source, Symbol, SymbolEntry, SymbolMapper, Tick,
};
use market_data_core::usecases::{DistributionHub, HubSettings};

fn arb_tick() -> impl Strategy<Value = (i64, u32, bool, bool)> {
    // (seconds offset, price in cents, primary origin, degrade before)
    (0i64..50, 1u32..10_000_000, any::<bool>(), any::<bool>())
}

// ── Snapshot Store Properties ───────────────────────────────

proptest! {
    /// `updated_at` is non-decreasing and every applied tick is reflected
    /// verbatim in the snapshot.
    #[test]
    fn snapshot_timestamp_never_regresses(ticks in prop::collection::vec(arb_tick(), 1..60)) {
        let health = Arc::new(FeedHealth::new());
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let (mut hub, handle) = DistributionHub::new(
            HubSettings::default(),
            BTreeSet::new(),
            Arc::clone(&health),
            metrics,
        );
        let symbol = Symbol::new("BTC", "USD");
        let mut last_ts = None;

        for (secs, cents, primary, degraded) in ticks {
            if degraded {
                health.mark_degraded();
            } else {
                health.clear();
            }
            let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
            let price = Decimal::new(i64::from(cents), 2);
            let origin = if primary { Origin::Primary } else { Origin::Backup };
            let tick = Tick::received_at(symbol.clone(), price, None, ts, ts, origin).unwrap();

            let decision = hub.process_tick(tick);
            let snapshot = handle.snapshot_of(&symbol).unwrap();

            if let Some(prev) = last_ts {
                prop_assert!(snapshot.updated_at >= prev);
                if ts < prev {
                    prop_assert_eq!(decision, MergeDecision::Stale);
                }
            }
            if decision == MergeDecision::Apply {
                prop_assert_eq!(snapshot.updated_at, ts);
                prop_assert_eq!(snapshot.last_price, price);
            }
            prop_assert!(snapshot.low_24h <= snapshot.last_price);
            prop_assert!(snapshot.last_price <= snapshot.high_24h);
            last_ts = Some(snapshot.updated_at);
        }
    }
}

// ── Symbol Mapper Properties ────────────────────────────────

proptest! {
    /// Unknown identifiers map to nothing; known ones round-trip.
    #[test]
    fn mapper_is_total_over_arbitrary_ids(id in ".{0,24}") {
        let mapper = SymbolMapper::new([SymbolEntry {
            symbol: Symbol::new("BTC", "USD"),
            primary_id: "BTC-USD".to_string(),
            backup_id: "BTCUSD".to_string(),
        }]);

        let primary = mapper.map(Source::Primary, &id);
        let backup = mapper.map(Source::Backup, &id);
        prop_assert_eq!(primary.is_some(), id == "BTC-USD");
        prop_assert_eq!(backup.is_some(), id == "BTCUSD");
    }
}

// ── Backoff Properties ──────────────────────────────────────

proptest! {
    /// Delays never shrink and never exceed the cap.
    #[test]
    fn backoff_is_monotonic_and_capped(
        base_ms in 1u64..1_000,
        max_ms in 1u64..60_000,
        attempts in 1usize..64,
    ) {
        let max = Duration::from_millis(max_ms);
        let mut backoff = Backoff::new(Duration::from_millis(base_ms), max);
        let cap = max.max(Duration::from_millis(base_ms));
        let mut prev = Duration::ZERO;
        for _ in 0..attempts {
            let delay = backoff.next_delay();
            prop_assert!(delay >= prev);
            prop_assert!(delay <= cap);
            prev = delay;
        }
    }
}
