//! Alert Notifiers - Delivery of Price-Alert Firings
//!
//! - `LogNotifier`: structured log line only
//! - `WebhookNotifier`: JSON POST to a configured endpoint

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use crate::config::AlertsConfig;
use crate::domain::alert::AlertFiring;
use crate::ports::notifier::Notifier;

/// Logs every firing at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn notify(&self, firing: &AlertFiring) -> Result<()> {
    info!(
      alert = %firing.alert_id,
      symbol = %firing.symbol,
      threshold = %firing.threshold,
      price = %firing.price,
      fired_at = %firing.fired_at,
      "Alert notification"
    );
    Ok(())
  }
}

/// POSTs each firing as JSON. One attempt per firing.
pub struct WebhookNotifier {
  http: Client,
  url: String,
}

impl WebhookNotifier {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
    let http = Client::builder()
      .timeout(timeout)
      .build()
      .context("Failed to build HTTP client")?;
    Ok(Self {
      http,
      url: url.into(),
    })
  }
}

#[async_trait]
impl Notifier for WebhookNotifier {
  async fn notify(&self, firing: &AlertFiring) -> Result<()> {
    let response = self
      .http
      .post(&self.url)
      .json(firing)
      .send()
      .await
      .context("Webhook request failed")?;

    let status = response.status();
    if !status.is_success() {
      bail!("Webhook returned {status}");
    }
    Ok(())
  }
}

/// Pick the notifier the config asks for.
pub fn from_config(config: &AlertsConfig) -> Result<Arc<dyn Notifier>> {
  let notifier: Arc<dyn Notifier> = match &config.webhook_url {
    Some(url) => {
      info!(url = %url, "Alert notifications via webhook");
      Arc::new(WebhookNotifier::new(url.clone(), config.notify_timeout())?)
    }
    None => Arc::new(LogNotifier),
  };
  Ok(notifier)
}
