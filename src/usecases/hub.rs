//! Distribution Hub - Snapshot Store and Tick Fan-out
//!
//! The hub is a single actor task. Adapters push ticks into a bounded
//! ingest queue through a cloneable [`HubHandle`]; the delivery loop
//! applies the merge rule, updates the snapshot store and fans each
//! applied tick out to every matching subscriber.
//!
//! Delivery never waits: every subscriber has its own bounded channel
//! and the loop uses `try_send`. A subscriber that keeps failing
//! (too many consecutive full-buffer failures, or failing for longer
//! than the delivery timeout) is evicted; a closed one is dropped on
//! the next delivery attempt.
//!
//! Inline subscribers (the alert evaluator) run on the loop itself
//! and may own state that must only be touched from this context.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::HubConfig;
use crate::domain::health::FeedHealth;
use crate::domain::snapshot::{MergeDecision, Snapshot};
use crate::domain::symbol::Symbol;
use crate::domain::tick::Tick;
use crate::ports::market_data::TickStream;
use crate::ports::tick_sink::TickSink;

/// Subscription identifier, unique per hub.
pub type SubscriptionId = u64;

/// Latest snapshot per symbol. Written only by the hub loop.
type SnapshotStore = Arc<RwLock<BTreeMap<Symbol, Snapshot>>>;

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubSettings {
  /// Capacity of the adapters → hub queue.
  pub ingest_capacity: usize,
  /// Per-subscriber channel capacity.
  pub subscriber_capacity: usize,
  /// Evict a subscriber failing deliveries for this long.
  pub delivery_timeout: Duration,
  /// Evict a subscriber after this many consecutive failed deliveries.
  pub max_consecutive_failures: u32,
}

impl From<&HubConfig> for HubSettings {
  fn from(config: &HubConfig) -> Self {
    Self {
      ingest_capacity: config.ingest_capacity,
      subscriber_capacity: config.subscriber_capacity,
      delivery_timeout: config.subscriber_delivery_timeout(),
      max_consecutive_failures: config.max_consecutive_failures,
    }
  }
}

impl Default for HubSettings {
  fn default() -> Self {
    Self::from(&HubConfig::default())
  }
}

/// A consumer that runs on the hub's delivery loop instead of behind a
/// channel. Must never block.
pub trait InlineSubscriber: Send + 'static {
  /// Name for logs.
  fn name(&self) -> &'static str;

  /// Called for every applied tick, after the snapshot is updated.
  fn on_tick(&mut self, tick: &Tick);

  /// Apply pending external commands. Called before every tick and
  /// whenever the hub's inline waker is notified.
  fn sync(&mut self) {}
}

/// Registry mutations, applied only on the hub loop.
#[derive(Debug)]
enum Control {
  Attach {
    id: SubscriptionId,
    filter: Option<Symbol>,
    tx: mpsc::Sender<Tick>,
  },
  Detach {
    id: SubscriptionId,
  },
}

/// Why a subscriber was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
  Closed,
  Slow,
}

impl Eviction {
  const fn label(self) -> &'static str {
    match self {
      Self::Closed => "closed",
      Self::Slow => "slow",
    }
  }
}

/// Hub-side state of one channel subscriber.
#[derive(Debug)]
struct Subscriber {
  filter: Option<Symbol>,
  tx: mpsc::Sender<Tick>,
  consecutive_failures: u32,
  failing_since: Option<Instant>,
}

impl Subscriber {
  fn matches(&self, symbol: &Symbol) -> bool {
    self.filter.as_ref().is_none_or(|f| f == symbol)
  }
}

/// The hub's delivery loop and the state it exclusively owns.
pub struct DistributionHub {
  settings: HubSettings,
  ingest_rx: mpsc::Receiver<Tick>,
  control_rx: mpsc::UnboundedReceiver<Control>,
  store: SnapshotStore,
  subscribers: HashMap<SubscriptionId, Subscriber>,
  inline: Vec<Box<dyn InlineSubscriber>>,
  inline_wake: Arc<Notify>,
  health: Arc<FeedHealth>,
  metrics: Arc<MetricsRegistry>,
}

/// Cloneable front door to a [`DistributionHub`].
#[derive(Clone)]
pub struct HubHandle {
  ingest_tx: mpsc::Sender<Tick>,
  control_tx: mpsc::UnboundedSender<Control>,
  store: SnapshotStore,
  interest: Arc<watch::Sender<BTreeSet<Symbol>>>,
  inline_wake: Arc<Notify>,
  next_id: Arc<AtomicU64>,
  subscriber_capacity: usize,
}

impl DistributionHub {
  /// Build a hub and its handle.
  ///
  /// `universe` seeds the interest set followed by the primary adapter.
  pub fn new(
    settings: HubSettings,
    universe: BTreeSet<Symbol>,
    health: Arc<FeedHealth>,
    metrics: Arc<MetricsRegistry>,
  ) -> (Self, HubHandle) {
    let (ingest_tx, ingest_rx) = mpsc::channel(settings.ingest_capacity.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (interest_tx, _) = watch::channel(universe);
    let store: SnapshotStore = Arc::new(RwLock::new(BTreeMap::new()));
    let inline_wake = Arc::new(Notify::new());

    let handle = HubHandle {
      ingest_tx,
      control_tx,
      store: Arc::clone(&store),
      interest: Arc::new(interest_tx),
      inline_wake: Arc::clone(&inline_wake),
      next_id: Arc::new(AtomicU64::new(1)),
      subscriber_capacity: settings.subscriber_capacity.max(1),
    };

    let hub = Self {
      settings,
      ingest_rx,
      control_rx,
      store,
      subscribers: HashMap::new(),
      inline: Vec::new(),
      inline_wake,
      health,
      metrics,
    };

    (hub, handle)
  }

  /// Run a consumer inline on the delivery loop.
  pub fn add_inline(&mut self, subscriber: Box<dyn InlineSubscriber>) {
    info!(subscriber = subscriber.name(), "Inline subscriber attached");
    self.inline.push(subscriber);
  }

  /// Warm-start the store before any tick is processed.
  ///
  /// Ticks older than a seeded snapshot are then discarded as stale,
  /// exactly as if the seed had been the last applied tick.
  pub fn seed(&mut self, snapshots: impl IntoIterator<Item = Snapshot>) {
    let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
    for snapshot in snapshots {
      store.entry(snapshot.symbol.clone()).or_insert(snapshot);
    }
    info!(symbols = store.len(), "Snapshot store seeded");
  }

  /// Delivery loop. Runs until shutdown or until every handle is gone.
  #[instrument(skip_all, name = "hub_loop")]
  pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
    info!(inline = self.inline.len(), "Distribution hub started");

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          self.drain();
          info!("Distribution hub shutting down");
          break;
        }
        Some(control) = self.control_rx.recv() => {
          self.handle_control(control);
        }
        () = self.inline_wake.notified() => {
          self.sync_inline();
        }
        tick = self.ingest_rx.recv() => {
          match tick {
            Some(tick) => {
              self.process_tick(tick);
            }
            None => {
              info!("All hub handles dropped, stopping");
              break;
            }
          }
        }
      }
    }

    // Dropping the senders ends every subscriber stream.
    self.subscribers.clear();
    self.metrics.subscribers_active.set(0);
  }

  /// Apply one tick: merge into the snapshot store, then fan out.
  ///
  /// Pending registry changes and inline commands are applied first so
  /// that anything attached before the tick was published sees it.
  pub fn process_tick(&mut self, tick: Tick) -> MergeDecision {
    self.drain_control();
    self.sync_inline();

    let origin = tick.origin().label();
    self
      .metrics
      .ticks_received
      .with_label_values(&[origin])
      .inc();

    let decision = self.merge(&tick);
    if decision != MergeDecision::Apply {
      debug!(
        symbol = %tick.symbol(),
        origin,
        reason = decision.label(),
        "Tick discarded by merge rule"
      );
      self
        .metrics
        .ticks_discarded
        .with_label_values(&[decision.label()])
        .inc();
      return decision;
    }

    self
      .metrics
      .ticks_applied
      .with_label_values(&[origin])
      .inc();
    let lag = tick.ingest_lag();
    if lag < chrono::Duration::zero() {
      debug!(
        symbol = %tick.symbol(),
        origin,
        ahead_ms = -lag.num_milliseconds(),
        "Source clock ahead of local receipt"
      );
    }
    self.fan_out(&tick);
    for subscriber in &mut self.inline {
      subscriber.on_tick(&tick);
    }
    decision
  }

  /// Number of attached channel subscribers.
  pub fn subscriber_count(&self) -> usize {
    self.subscribers.len()
  }

  fn merge(&self, tick: &Tick) -> MergeDecision {
    let degraded = self.health.is_degraded();
    let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);

    let Some(snapshot) = store.get_mut(tick.symbol()) else {
      store.insert(tick.symbol().clone(), Snapshot::from_tick(tick));
      return MergeDecision::Apply;
    };

    let decision = snapshot.decide(tick, degraded);
    if decision != MergeDecision::Apply {
      return decision;
    }

    let regressed = tick.source_timestamp() < snapshot.updated_at;
    debug_assert!(!regressed, "merge rule would regress snapshot for {}", tick.symbol());
    if regressed {
      error!(
        symbol = %tick.symbol(),
        snapshot_ts = %snapshot.updated_at,
        tick_ts = %tick.source_timestamp(),
        "Snapshot regression prevented, tick skipped"
      );
      return MergeDecision::Stale;
    }

    snapshot.apply(tick);
    decision
  }

  fn fan_out(&mut self, tick: &Tick) {
    let now = Instant::now();
    let max_failures = self.settings.max_consecutive_failures;
    let timeout = self.settings.delivery_timeout;
    let mut evicted = Vec::new();

    for (id, subscriber) in &mut self.subscribers {
      if !subscriber.matches(tick.symbol()) {
        continue;
      }
      match subscriber.tx.try_send(tick.clone()) {
        Ok(()) => {
          subscriber.consecutive_failures = 0;
          subscriber.failing_since = None;
        }
        Err(TrySendError::Full(_)) => {
          subscriber.consecutive_failures += 1;
          let since = *subscriber.failing_since.get_or_insert(now);
          if subscriber.consecutive_failures >= max_failures
            || now.duration_since(since) >= timeout
          {
            evicted.push((*id, Eviction::Slow));
          }
        }
        Err(TrySendError::Closed(_)) => {
          evicted.push((*id, Eviction::Closed));
        }
      }
    }

    for (id, reason) in evicted {
      self.evict(id, reason);
    }
  }

  fn evict(&mut self, id: SubscriptionId, reason: Eviction) {
    let Some(subscriber) = self.subscribers.remove(&id) else {
      return;
    };
    match reason {
      Eviction::Slow => warn!(
        subscription = id,
        failures = subscriber.consecutive_failures,
        "Evicting slow subscriber"
      ),
      Eviction::Closed => info!(subscription = id, "Subscriber channel closed, removed"),
    }
    self
      .metrics
      .subscribers_evicted
      .with_label_values(&[reason.label()])
      .inc();
    self.update_subscriber_gauge();
  }

  fn handle_control(&mut self, control: Control) {
    match control {
      Control::Attach { id, filter, tx } => {
        debug!(subscription = id, filter = ?filter, "Subscriber attached");
        self.subscribers.insert(
          id,
          Subscriber {
            filter,
            tx,
            consecutive_failures: 0,
            failing_since: None,
          },
        );
      }
      Control::Detach { id } => {
        if self.subscribers.remove(&id).is_some() {
          debug!(subscription = id, "Subscriber detached");
        }
      }
    }
    self.update_subscriber_gauge();
  }

  fn drain_control(&mut self) {
    while let Ok(control) = self.control_rx.try_recv() {
      self.handle_control(control);
    }
  }

  fn sync_inline(&mut self) {
    for subscriber in &mut self.inline {
      subscriber.sync();
    }
  }

  /// Process what is already queued, bounded by the queue capacity.
  fn drain(&mut self) {
    let mut drained = 0usize;
    while drained < self.settings.ingest_capacity {
      let Ok(tick) = self.ingest_rx.try_recv() else {
        break;
      };
      self.process_tick(tick);
      drained += 1;
    }
    if drained > 0 {
      info!(drained, "Drained in-flight ticks before shutdown");
    }
  }

  fn update_subscriber_gauge(&self) {
    let count = i64::try_from(self.subscribers.len()).unwrap_or(i64::MAX);
    self.metrics.subscribers_active.set(count);
  }
}

impl HubHandle {
  /// Queue a tick for the delivery loop.
  pub async fn publish(&self, tick: Tick) -> anyhow::Result<()> {
    self.enqueue(tick).await
  }

  async fn enqueue(&self, tick: Tick) -> anyhow::Result<()> {
    self
      .ingest_tx
      .send(tick)
      .await
      .map_err(|_| anyhow::anyhow!("distribution hub stopped"))
  }

  /// Attach a subscriber. `None` matches every symbol.
  ///
  /// A filtered symbol joins the interest set the primary adapter
  /// subscribes to; the set only ever grows.
  pub fn subscribe(&self, filter: Option<Symbol>) -> anyhow::Result<Subscription> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel(self.subscriber_capacity);

    if let Some(symbol) = &filter {
      self
        .interest
        .send_if_modified(|set| set.insert(symbol.clone()));
    }

    self
      .control_tx
      .send(Control::Attach { id, filter, tx })
      .map_err(|_| anyhow::anyhow!("distribution hub stopped"))?;

    Ok(Subscription {
      id,
      rx,
      control_tx: self.control_tx.clone(),
    })
  }

  /// Detach a subscriber by id. Unknown ids are ignored.
  pub fn unsubscribe(&self, id: SubscriptionId) {
    let _ = self.control_tx.send(Control::Detach { id });
  }

  /// Latest snapshot for `symbol`.
  pub fn snapshot_of(&self, symbol: &Symbol) -> Option<Snapshot> {
    let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
    store.get(symbol).cloned()
  }

  /// All snapshots, sorted by symbol.
  pub fn list_snapshots(&self) -> Vec<Snapshot> {
    let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
    store.values().cloned().collect()
  }

  /// Follow the set of symbols consumers have asked for.
  pub fn interest(&self) -> watch::Receiver<BTreeSet<Symbol>> {
    self.interest.subscribe()
  }

  /// Waker inline subscribers' owners use to get commands applied.
  pub fn inline_waker(&self) -> Arc<Notify> {
    Arc::clone(&self.inline_wake)
  }
}

#[async_trait]
impl TickSink for HubHandle {
  async fn publish(&self, tick: Tick) -> anyhow::Result<()> {
    self.enqueue(tick).await
  }
}

/// A live interest in ticks. Dropping it detaches from the hub.
#[derive(Debug)]
pub struct Subscription {
  id: SubscriptionId,
  rx: mpsc::Receiver<Tick>,
  control_tx: mpsc::UnboundedSender<Control>,
}

impl Subscription {
  pub fn id(&self) -> SubscriptionId {
    self.id
  }

  /// Next tick; `None` once the hub has stopped or evicted us.
  pub async fn recv(&mut self) -> Option<Tick> {
    self.rx.recv().await
  }

  /// Next buffered tick without waiting.
  pub fn try_recv(&mut self) -> Option<Tick> {
    self.rx.try_recv().ok()
  }

  /// Detach explicitly.
  pub fn unsubscribe(self) {
    drop(self);
  }

  /// Adapt into a boxed stream for the query surface.
  pub fn into_stream(self) -> TickStream {
    Box::pin(futures_util::stream::unfold(self, |mut sub| async move {
      let tick = sub.recv().await?;
      Some((tick, sub))
    }))
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let _ = self.control_tx.send(Control::Detach { id: self.id });
  }
}
