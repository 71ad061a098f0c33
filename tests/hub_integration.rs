//! Hub Integration Tests - Merge, Failover, Isolation and Alerts
//!
//! Exercises the distribution hub through its public surface, the
//! same way the pipeline wires it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use market_data_core::adapters::metrics::MetricsRegistry;
use market_data_core::domain::{
    AlertCondition, AlertFiring, FeedHealth, MergeDecision, NewAlert, Origin, Symbol, Tick,
};
use market_data_core::ports::Notifier;
use market_data_core::usecases::{AlertEvaluator, DistributionHub, HubHandle, HubSettings};

// ---- Helpers ----

fn btc() -> Symbol {
    Symbol::new("BTC", "USD")
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn tick(price: Decimal, secs: i64, origin: Origin) -> Tick {
    Tick::received_at(btc(), price, None, at(secs), at(secs), origin).unwrap()
}

struct Rig {
    hub: DistributionHub,
    handle: HubHandle,
    health: Arc<FeedHealth>,
    metrics: Arc<MetricsRegistry>,
}

fn rig(settings: HubSettings) -> Rig {
    let health = Arc::new(FeedHealth::new());
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let (hub, handle) = DistributionHub::new(
        settings,
        BTreeSet::from([btc()]),
        Arc::clone(&health),
        Arc::clone(&metrics),
    );
    Rig {
        hub,
        handle,
        health,
        metrics,
    }
}

#[derive(Default)]
struct RecordingNotifier {
    firings: Mutex<Vec<AlertFiring>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.firings.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, firing: &AlertFiring) -> anyhow::Result<()> {
        self.firings.lock().unwrap().push(firing.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FailingNotifier {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _firing: &AlertFiring) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("webhook unreachable")
    }
}

async fn wait_for_notifications(notifier: &RecordingNotifier, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while notifier.count() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("notification not delivered");
}

// ---- Merge and failover ----

#[test]
fn test_backup_then_primary_then_failover() {
    let mut rig = rig(HubSettings::default());
    let mut all = rig.handle.subscribe(None).unwrap();

    assert_eq!(
        rig.hub.process_tick(tick(dec!(50000), 0, Origin::Backup)),
        MergeDecision::Apply
    );
    assert_eq!(
        rig.hub.process_tick(tick(dec!(50010), 1, Origin::Primary)),
        MergeDecision::Apply
    );
    assert_eq!(
        rig.handle.snapshot_of(&btc()).unwrap().last_price,
        dec!(50010)
    );

    rig.health.mark_degraded();
    assert_eq!(
        rig.hub.process_tick(tick(dec!(50200), 2, Origin::Backup)),
        MergeDecision::Apply
    );

    let snapshot = rig.handle.snapshot_of(&btc()).unwrap();
    assert_eq!(snapshot.last_price, dec!(50200));
    assert_eq!(snapshot.updated_at, at(2));
    assert_eq!(snapshot.high_24h, dec!(50200));
    assert_eq!(snapshot.low_24h, dec!(50000));

    let prices: Vec<Decimal> = std::iter::from_fn(|| all.try_recv())
        .map(|t| t.price())
        .collect();
    assert_eq!(prices, vec![dec!(50000), dec!(50010), dec!(50200)]);
}

#[test]
fn test_equal_timestamp_backup_superseded_while_primary_healthy() {
    let mut rig = rig(HubSettings::default());

    rig.hub.process_tick(tick(dec!(50010), 1, Origin::Primary));
    assert_eq!(
        rig.hub.process_tick(tick(dec!(49990), 1, Origin::Backup)),
        MergeDecision::Superseded
    );
    assert_eq!(
        rig.handle.snapshot_of(&btc()).unwrap().last_price,
        dec!(50010)
    );
    assert_eq!(
        rig.metrics
            .ticks_discarded
            .with_label_values(&["superseded"])
            .get(),
        1
    );
}

#[test]
fn test_equal_timestamp_backup_applies_while_primary_degraded() {
    let mut rig = rig(HubSettings::default());

    rig.hub.process_tick(tick(dec!(50010), 1, Origin::Primary));
    rig.health.mark_degraded();
    assert_eq!(
        rig.hub.process_tick(tick(dec!(49990), 1, Origin::Backup)),
        MergeDecision::Apply
    );
    assert_eq!(
        rig.handle.snapshot_of(&btc()).unwrap().last_price,
        dec!(49990)
    );
}

#[test]
fn test_out_of_order_ticks_never_regress_snapshot() {
    let mut rig = rig(HubSettings::default());

    rig.hub.process_tick(tick(dec!(50100), 10, Origin::Primary));
    assert_eq!(
        rig.hub.process_tick(tick(dec!(49000), 5, Origin::Primary)),
        MergeDecision::Stale
    );
    assert_eq!(
        rig.hub.process_tick(tick(dec!(49000), 5, Origin::Backup)),
        MergeDecision::Stale
    );
    assert_eq!(rig.handle.snapshot_of(&btc()).unwrap().updated_at, at(10));
}

#[test]
fn test_replayed_same_timestamp_trades_reach_subscribers_once() {
    let mut rig = rig(HubSettings::default());
    let mut all = rig.handle.subscribe(None).unwrap();

    let first = tick(dec!(50010), 1, Origin::Primary);
    let second = tick(dec!(50011), 1, Origin::Primary);
    assert_eq!(rig.hub.process_tick(first.clone()), MergeDecision::Apply);
    assert_eq!(rig.hub.process_tick(second.clone()), MergeDecision::Apply);

    // Reconnect replays both trades.
    assert_eq!(rig.hub.process_tick(first), MergeDecision::Duplicate);
    assert_eq!(rig.hub.process_tick(second), MergeDecision::Duplicate);

    let prices: Vec<Decimal> = std::iter::from_fn(|| all.try_recv())
        .map(|t| t.price())
        .collect();
    assert_eq!(prices, vec![dec!(50010), dec!(50011)]);
    assert_eq!(
        rig.handle.snapshot_of(&btc()).unwrap().last_price,
        dec!(50011)
    );
    assert_eq!(
        rig.metrics
            .ticks_discarded
            .with_label_values(&["duplicate"])
            .get(),
        2
    );
}

// ---- Subscriber isolation ----

#[tokio::test]
async fn test_stuck_subscriber_is_evicted_while_healthy_one_keeps_up() {
    let rig = rig(HubSettings {
        ingest_capacity: 64,
        subscriber_capacity: 1024,
        delivery_timeout: Duration::from_secs(60),
        max_consecutive_failures: 3,
    });
    let metrics = Arc::clone(&rig.metrics);
    let handle = rig.handle.clone();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let mut stuck = handle.subscribe(None).unwrap();
    let mut healthy = handle.subscribe(None).unwrap();
    let hub_task = tokio::spawn(rig.hub.run(shutdown_rx));

    for i in 0..1100_i64 {
        let price = dec!(50000) + Decimal::from(i);
        handle.publish(tick(price, i, Origin::Primary)).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), healthy.recv())
            .await
            .expect("healthy subscriber starved")
            .expect("healthy subscriber evicted");
        assert_eq!(got.price(), price);
    }

    assert_eq!(
        metrics.subscribers_evicted.with_label_values(&["slow"]).get(),
        1
    );
    assert_eq!(metrics.subscribers_active.get(), 1);

    // The stuck consumer keeps what was buffered, then sees the end.
    let mut buffered = 0;
    while stuck.recv().await.is_some() {
        buffered += 1;
    }
    assert_eq!(buffered, 1024);

    shutdown_tx.send(()).unwrap();
    hub_task.await.unwrap();
}

// ---- Alerts ----

#[tokio::test]
async fn test_alert_fires_once_until_reset() {
    let mut rig = rig(HubSettings::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (evaluator, mut book) = AlertEvaluator::new(
        notifier.clone(),
        Arc::clone(&rig.metrics),
        rig.handle.inline_waker(),
    );
    rig.hub.add_inline(Box::new(evaluator));

    let handle = rig.handle.clone();
    let metrics = Arc::clone(&rig.metrics);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut ticks = handle.subscribe(None).unwrap();
    let hub_task = tokio::spawn(rig.hub.run(shutdown_rx));

    let alert = book
        .create_alert(NewAlert {
            symbol: btc(),
            condition: AlertCondition::Above,
            threshold: dec!(50000),
        })
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), book.changed())
        .await
        .expect("evaluator never applied the new alert")
        .unwrap();
    assert_eq!(book.list_alerts(), vec![alert.clone()]);

    let mut secs = 0;
    let mut feed = |prices: &[Decimal]| {
        let batch: Vec<Tick> = prices
            .iter()
            .map(|p| {
                secs += 1;
                tick(*p, secs, Origin::Primary)
            })
            .collect();
        batch
    };

    for t in feed(&[dec!(49900), dec!(50100), dec!(50200), dec!(49800), dec!(50300)]) {
        handle.publish(t).await.unwrap();
        ticks.recv().await.unwrap();
    }
    wait_for_notifications(&notifier, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let firings = notifier.firings.lock().unwrap();
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].alert_id, alert.id);
        assert_eq!(firings[0].price, dec!(50100));
    }
    assert_eq!(metrics.alerts_fired.get(), 1);
    let listed = book.list_alerts();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].fired_at.is_some());

    book.reset_alert(alert.id).unwrap();
    for t in feed(&[dec!(50400)]) {
        handle.publish(t).await.unwrap();
        ticks.recv().await.unwrap();
    }
    wait_for_notifications(&notifier, 2).await;
    assert_eq!(notifier.firings.lock().unwrap()[1].price, dec!(50400));

    shutdown_tx.send(()).unwrap();
    hub_task.await.unwrap();
}

#[tokio::test]
async fn test_failed_notification_leaves_alert_fired_without_retry() {
    let mut rig = rig(HubSettings::default());
    let notifier = Arc::new(FailingNotifier::default());
    let (evaluator, mut book) = AlertEvaluator::new(
        notifier.clone(),
        Arc::clone(&rig.metrics),
        rig.handle.inline_waker(),
    );
    rig.hub.add_inline(Box::new(evaluator));

    let handle = rig.handle.clone();
    let metrics = Arc::clone(&rig.metrics);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut ticks = handle.subscribe(None).unwrap();
    let hub_task = tokio::spawn(rig.hub.run(shutdown_rx));

    let alert = book
        .create_alert(NewAlert {
            symbol: btc(),
            condition: AlertCondition::Above,
            threshold: dec!(100),
        })
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), book.changed())
        .await
        .expect("evaluator never applied the new alert")
        .unwrap();

    for (secs, price) in [(1, dec!(101)), (2, dec!(102))] {
        handle
            .publish(tick(price, secs, Origin::Primary))
            .await
            .unwrap();
        ticks.recv().await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while metrics.notification_failures.get() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("notification failure never recorded");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.notification_failures.get(), 1);
    assert_eq!(metrics.alerts_fired.get(), 1);
    let listed = book.list_alerts();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, alert.id);
    assert!(listed[0].fired_at.is_some());

    shutdown_tx.send(()).unwrap();
    hub_task.await.unwrap();
}
