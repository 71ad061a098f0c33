//! Primary Feed Tests - Loopback WebSocket Upstream
//!
//! Drives the primary adapter against an in-process tokio-tungstenite
//! server: auth, subscribe, reconnect, idempotent resubscription and
//! incremental subscription.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use market_data_core::adapters::feeds::{PrimaryFeed, PrimaryState};
use market_data_core::adapters::metrics::MetricsRegistry;
use market_data_core::config::PrimaryFeedConfig;
use market_data_core::domain::{FeedHealth, Symbol, SymbolEntry, SymbolMapper};
use market_data_core::ports::TickSink;
use market_data_core::usecases::{DistributionHub, HubHandle, HubSettings};

const TRADE: &str = r#"[{"ev":"XT","pair":"BTC-USD","p":50010,"s":0.5,"t":1700000001000}]"#;

/// Start a loopback upstream. Logins are accepted only while `accept`
/// is set. Every subscription request is forwarded on the returned
/// channel. The first connection is closed right after its first trade;
/// later ones stay open and replay the same trade.
async fn spawn_upstream(accept: Arc<AtomicBool>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (subs_tx, subs_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0usize;
        while let Ok((stream, _)) = listener.accept().await {
            let subs_tx = subs_tx.clone();
            let accept = Arc::clone(&accept);
            let conn = connection;
            connection += 1;

            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let _ = ws
                    .send(Message::Text(
                        r#"[{"ev":"status","status":"connected","message":"Connected"}]"#.into(),
                    ))
                    .await;

                let Some(Ok(Message::Text(auth))) = ws.next().await else {
                    return;
                };
                assert!(auth.contains(r#""action":"auth""#));
                let auth_reply = if accept.load(Ordering::SeqCst) {
                    "auth_success"
                } else {
                    "auth_failed"
                };
                let _ = ws
                    .send(Message::Text(format!(
                        r#"[{{"ev":"status","status":"{auth_reply}","message":"-"}}]"#
                    )))
                    .await;
                if auth_reply != "auth_success" {
                    let _ = ws.close(None).await;
                    return;
                }

                let mut first = true;
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else {
                        continue;
                    };
                    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                    if frame["action"] != "subscribe" {
                        continue;
                    }
                    let _ = subs_tx.send(frame["params"].as_str().unwrap().to_string());
                    if first {
                        first = false;
                        let _ = ws.send(Message::Text(TRADE.into())).await;
                        if conn == 0 {
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                }
            });
        }
    });

    (url, subs_rx)
}

fn accepting(accept: bool) -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(accept))
}

fn config(ws_url: String) -> PrimaryFeedConfig {
    PrimaryFeedConfig {
        ws_url,
        api_key: "test-key".to_string(),
        connect_timeout_ms: 1_000,
        auth_timeout_ms: 1_000,
        reconnect_base_delay_ms: 20,
        reconnect_max_delay_ms: 100,
        outage_failure_threshold: 3,
        outage_window_ms: 60_000,
    }
}

fn mapper() -> Arc<SymbolMapper> {
    Arc::new(SymbolMapper::new([
        SymbolEntry {
            symbol: Symbol::new("BTC", "USD"),
            primary_id: "BTC-USD".to_string(),
            backup_id: "BTCUSD".to_string(),
        },
        SymbolEntry {
            symbol: Symbol::new("ETH", "USD"),
            primary_id: "ETH-USD".to_string(),
            backup_id: "ETHUSD".to_string(),
        },
    ]))
}

struct Rig {
    handle: HubHandle,
    health: Arc<FeedHealth>,
    metrics: Arc<MetricsRegistry>,
    state: watch::Receiver<PrimaryState>,
    shutdown_tx: broadcast::Sender<()>,
    feed_task: tokio::task::JoinHandle<()>,
}

/// Hub running with only BTC/USD of interest, plus a primary feed.
fn start(ws_url: String) -> Rig {
    let health = Arc::new(FeedHealth::new());
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let (hub, handle) = DistributionHub::new(
        HubSettings::default(),
        BTreeSet::from([Symbol::new("BTC", "USD")]),
        Arc::clone(&health),
        Arc::clone(&metrics),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(hub.run(shutdown_tx.subscribe()));

    let sink: Arc<dyn TickSink> = Arc::new(handle.clone());
    let feed = PrimaryFeed::new(
        config(ws_url),
        mapper(),
        sink,
        handle.interest(),
        Arc::clone(&health),
        Arc::clone(&metrics),
    );
    let state = feed.state();
    let feed_task = tokio::spawn(feed.run(shutdown_tx.subscribe()));

    Rig {
        handle,
        health,
        metrics,
        state,
        shutdown_tx,
        feed_task,
    }
}

async fn next_sub(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("subscription request not seen")
        .unwrap()
}

#[tokio::test]
async fn test_reconnect_resubscribes_without_duplicates() {
    let (url, mut subs) = spawn_upstream(accepting(true)).await;
    let rig = start(url);
    let mut ticks = rig.handle.subscribe(None).unwrap();

    // First session: subscribe, one trade, then the upstream hangs up.
    assert_eq!(next_sub(&mut subs).await, "XT.BTC-USD");
    let first = tokio::time::timeout(Duration::from_secs(5), ticks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.price(), dec!(50010));

    // Second session re-issues the same subscription and replays the trade.
    assert_eq!(next_sub(&mut subs).await, "XT.BTC-USD");
    tokio::time::timeout(Duration::from_secs(5), async {
        while rig
            .metrics
            .ticks_discarded
            .with_label_values(&["duplicate"])
            .get()
            == 0
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replayed trade never reached the hub");

    assert!(ticks.try_recv().is_none(), "replay must not be fanned out");
    assert_eq!(rig.handle.list_snapshots().len(), 1);
    assert!(rig.metrics.primary_reconnects.get() >= 1);
    assert!(!rig.health.is_degraded());

    let _ = rig.shutdown_tx.send(());
    tokio::time::timeout(Duration::from_secs(5), rig.feed_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_new_interest_extends_live_subscription() {
    let (url, mut subs) = spawn_upstream(accepting(true)).await;
    let mut rig = start(url);

    assert_eq!(next_sub(&mut subs).await, "XT.BTC-USD");
    // Wait for the reconnect so the live session is the long-lived one.
    assert_eq!(next_sub(&mut subs).await, "XT.BTC-USD");
    tokio::time::timeout(Duration::from_secs(5), async {
        while *rig.state.borrow_and_update() != PrimaryState::Subscribed {
            rig.state.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let _eth = rig.handle.subscribe(Some(Symbol::new("ETH", "USD"))).unwrap();
    assert_eq!(next_sub(&mut subs).await, "XT.ETH-USD");

    let _ = rig.shutdown_tx.send(());
}

#[tokio::test]
async fn test_rejected_credential_keeps_reconnecting() {
    let (url, _subs) = spawn_upstream(accepting(false)).await;
    let rig = start(url);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !rig.health.is_degraded() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("repeated auth failures should escalate");

    assert!(rig.metrics.primary_reconnects.get() >= 2);
    assert_ne!(*rig.state.borrow(), PrimaryState::Subscribed);
    assert!(!rig.health.is_connected());

    let _ = rig.shutdown_tx.send(());
    tokio::time::timeout(Duration::from_secs(5), rig.feed_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_outage_flag_clears_once_subscribed_again() {
    let accept = accepting(false);
    let (url, _subs) = spawn_upstream(Arc::clone(&accept)).await;
    let mut rig = start(url);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !rig.health.is_degraded() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("repeated auth failures should escalate");
    assert_eq!(rig.metrics.primary_degraded.get(), 1);

    // The upstream starts accepting the credential.
    accept.store(true, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(5), async {
        while *rig.state.borrow_and_update() != PrimaryState::Subscribed {
            rig.state.changed().await.unwrap();
        }
    })
    .await
    .expect("primary feed never recovered");

    assert!(!rig.health.is_degraded());
    assert_eq!(rig.metrics.primary_degraded.get(), 0);

    let _ = rig.shutdown_tx.send(());
    tokio::time::timeout(Duration::from_secs(5), rig.feed_task)
        .await
        .unwrap()
        .unwrap();
}
