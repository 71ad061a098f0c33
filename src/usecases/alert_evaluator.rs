//! Price-Alert Evaluator - Inline Hub Subscriber
//!
//! Holds the alert index and evaluates it against every applied tick.
//! The index is owned by the hub's delivery loop: owners mutate it
//! through an [`AlertBook`], which queues commands and wakes the loop,
//! never touching the index from their own task.
//!
//! On fire the alert is marked before the notifier is called, and the
//! call is made exactly once. A failed notification is logged; the
//! alert stays fired.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::alert::{AlertFiring, AlertId, NewAlert, PriceAlert};
use crate::domain::symbol::Symbol;
use crate::domain::tick::Tick;
use crate::ports::notifier::Notifier;

use super::hub::InlineSubscriber;

/// Owner-issued mutations of the alert index.
#[derive(Debug, Clone)]
enum AlertCommand {
  Upsert(PriceAlert),
  Delete(AlertId),
  Reset(AlertId),
  SetEnabled(AlertId, bool),
}

/// Alert index plus the notification path.
pub struct AlertEvaluator {
  /// Alerts keyed by symbol.
  index: HashMap<Symbol, Vec<PriceAlert>>,
  /// Pending owner commands.
  commands: mpsc::UnboundedReceiver<AlertCommand>,
  /// Read-only view republished after each mutation.
  view: watch::Sender<Vec<PriceAlert>>,
  /// Notification collaborator.
  notifier: Arc<dyn Notifier>,
  metrics: Arc<MetricsRegistry>,
}

/// Owner-facing handle for creating and managing alerts.
#[derive(Clone)]
pub struct AlertBook {
  commands: mpsc::UnboundedSender<AlertCommand>,
  waker: Arc<Notify>,
  view: watch::Receiver<Vec<PriceAlert>>,
}

impl AlertEvaluator {
  /// Build an evaluator and its owner handle.
  ///
  /// `waker` is the hub's inline waker so queued commands are applied
  /// promptly even when no tick is flowing.
  pub fn new(
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsRegistry>,
    waker: Arc<Notify>,
  ) -> (Self, AlertBook) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(Vec::new());

    let evaluator = Self {
      index: HashMap::new(),
      commands: cmd_rx,
      view: view_tx,
      notifier,
      metrics,
    };
    let book = AlertBook {
      commands: cmd_tx,
      waker,
      view: view_rx,
    };
    (evaluator, book)
  }

  /// Test every armed alert for the tick's symbol. Fired alerts are
  /// marked before this returns.
  pub fn evaluate(&mut self, tick: &Tick) -> Vec<AlertFiring> {
    let Some(alerts) = self.index.get_mut(tick.symbol()) else {
      return Vec::new();
    };
    let now = Utc::now();
    let firings: Vec<AlertFiring> = alerts
      .iter_mut()
      .filter_map(|alert| alert.check(tick, now))
      .collect();
    if !firings.is_empty() {
      self.publish_view();
    }
    firings
  }

  /// Number of alerts in the index.
  pub fn len(&self) -> usize {
    self.index.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn dispatch(&self, firing: AlertFiring) {
    self.metrics.alerts_fired.inc();
    info!(
      alert = %firing.alert_id,
      symbol = %firing.symbol,
      condition = ?firing.condition,
      threshold = %firing.threshold,
      price = %firing.price,
      "Price alert fired"
    );

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      warn!(alert = %firing.alert_id, "No runtime available, notification dropped");
      self.metrics.notification_failures.inc();
      return;
    };

    let notifier = Arc::clone(&self.notifier);
    let metrics = Arc::clone(&self.metrics);
    runtime.spawn(async move {
      if let Err(e) = notifier.notify(&firing).await {
        warn!(
          alert = %firing.alert_id,
          error = %e,
          "Alert notification failed, not retried"
        );
        metrics.notification_failures.inc();
      }
    });
  }

  fn apply(&mut self, command: AlertCommand) {
    match command {
      AlertCommand::Upsert(alert) => {
        self.remove(alert.id);
        debug!(alert = %alert.id, symbol = %alert.symbol, "Alert registered");
        self.index.entry(alert.symbol.clone()).or_default().push(alert);
      }
      AlertCommand::Delete(id) => {
        if self.remove(id).is_some() {
          debug!(alert = %id, "Alert deleted");
        }
      }
      AlertCommand::Reset(id) => {
        if let Some(alert) = self.find_mut(id) {
          alert.reset();
        }
      }
      AlertCommand::SetEnabled(id, enabled) => {
        if let Some(alert) = self.find_mut(id) {
          alert.enabled = enabled;
        }
      }
    }
  }

  fn remove(&mut self, id: AlertId) -> Option<PriceAlert> {
    let mut removed = None;
    self.index.retain(|_, alerts| {
      if let Some(pos) = alerts.iter().position(|a| a.id == id) {
        removed = Some(alerts.remove(pos));
      }
      !alerts.is_empty()
    });
    removed
  }

  fn find_mut(&mut self, id: AlertId) -> Option<&mut PriceAlert> {
    self
      .index
      .values_mut()
      .flat_map(|alerts| alerts.iter_mut())
      .find(|a| a.id == id)
  }

  fn publish_view(&self) {
    let mut all: Vec<PriceAlert> = self.index.values().flatten().cloned().collect();
    all.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.id.cmp(&b.id)));
    self.view.send_replace(all);
  }
}

impl InlineSubscriber for AlertEvaluator {
  fn name(&self) -> &'static str {
    "alert_evaluator"
  }

  fn on_tick(&mut self, tick: &Tick) {
    for firing in self.evaluate(tick) {
      self.dispatch(firing);
    }
  }

  fn sync(&mut self) {
    let mut changed = false;
    while let Ok(command) = self.commands.try_recv() {
      self.apply(command);
      changed = true;
    }
    if changed {
      self.publish_view();
    }
  }
}

impl AlertBook {
  /// Register a new enabled alert.
  pub fn create_alert(&self, rule: NewAlert) -> anyhow::Result<PriceAlert> {
    anyhow::ensure!(
      rule.threshold > Decimal::ZERO,
      "Alert threshold must be positive, got {}",
      rule.threshold
    );
    let alert = PriceAlert::create(rule);
    self.send(AlertCommand::Upsert(alert.clone()))?;
    Ok(alert)
  }

  /// Remove an alert.
  pub fn delete_alert(&self, id: AlertId) -> anyhow::Result<()> {
    self.send(AlertCommand::Delete(id))
  }

  /// Clear `fired_at` and re-enable.
  pub fn reset_alert(&self, id: AlertId) -> anyhow::Result<()> {
    self.send(AlertCommand::Reset(id))
  }

  /// Toggle an alert without touching `fired_at`.
  pub fn set_enabled(&self, id: AlertId, enabled: bool) -> anyhow::Result<()> {
    self.send(AlertCommand::SetEnabled(id, enabled))
  }

  /// Alerts as last published by the evaluator.
  pub fn list_alerts(&self) -> Vec<PriceAlert> {
    self.view.borrow().clone()
  }

  /// Wait until the evaluator republishes its view.
  pub async fn changed(&mut self) -> anyhow::Result<()> {
    self
      .view
      .changed()
      .await
      .map_err(|_| anyhow::anyhow!("alert evaluator stopped"))
  }

  fn send(&self, command: AlertCommand) -> anyhow::Result<()> {
    self
      .commands
      .send(command)
      .map_err(|_| anyhow::anyhow!("alert evaluator stopped"))?;
    self.waker.notify_one();
    Ok(())
  }
}
