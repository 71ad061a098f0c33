//! Notifier Port - Alert Notification Collaborator
//!
//! Called exactly once per alert firing. Failures are logged by the
//! caller and never retried against the same tick.

use async_trait::async_trait;

use crate::domain::alert::AlertFiring;

/// Delivers alert firings to their owners (push, e-mail, webhook...).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
  async fn notify(&self, firing: &AlertFiring) -> anyhow::Result<()>;
}
