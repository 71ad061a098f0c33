//! Distribution Hub Benchmarks - Hot-Path Performance
//!
//! Measures the work done on the delivery loop for every tick: the
//! merge decision, the snapshot update and the fan-out to subscribers.
//!
//! Run with: cargo bench --bench hub_bench

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal_macros::dec;

use market_data_core::adapters::metrics::MetricsRegistry;
use market_data_core::domain::{FeedHealth, Origin, Snapshot, Symbol, Tick};
use market_data_core::usecases::{DistributionHub, HubSettings, Subscription};

fn tick_at(secs: i64, origin: Origin) -> Tick {
    let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
    Tick::received_at(Symbol::new("BTC", "USD"), dec!(50000), None, ts, ts, origin).unwrap()
}

/// Benchmark the merge decision alone.
fn bench_merge_decision(c: &mut Criterion) {
    let snapshot = Snapshot::from_tick(&tick_at(10, Origin::Primary));
    let newer = tick_at(11, Origin::Backup);
    let tie = tick_at(10, Origin::Backup);

    c.bench_function("merge_decide_newer", |b| {
        b.iter(|| snapshot.decide(black_box(&newer), false));
    });
    c.bench_function("merge_decide_tie", |b| {
        b.iter(|| snapshot.decide(black_box(&tie), false));
    });
}

/// Benchmark `process_tick` with a growing number of subscribers.
fn bench_process_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_tick");

    for subscribers in [0usize, 10, 100] {
        let (mut hub, handle) = DistributionHub::new(
            HubSettings::default(),
            BTreeSet::new(),
            Arc::new(FeedHealth::new()),
            Arc::new(MetricsRegistry::new().unwrap()),
        );
        let mut subs: Vec<Subscription> = (0..subscribers)
            .map(|_| handle.subscribe(None).unwrap())
            .collect();
        let mut secs = 0;

        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    secs += 1;
                    let decision = hub.process_tick(tick_at(secs, Origin::Primary));
                    for sub in &mut subs {
                        while sub.try_recv().is_some() {}
                    }
                    black_box(decision)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_merge_decision, bench_process_tick);
criterion_main!(benches);
