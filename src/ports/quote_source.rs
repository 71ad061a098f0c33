//! Quote Source Port - Backup Request/Response Price Source
//!
//! One call fetches the latest quote for a batch of upstream
//! identifiers. The backup poller drives this on a fixed cadence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// One instrument's quote as reported by the backup source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupQuote {
  /// Upstream identifier (backup spelling).
  pub upstream_id: String,
  /// Last traded price.
  pub price: Decimal,
  /// 24h change in percent.
  pub change_24h_pct: Option<Decimal>,
  /// 24h volume.
  pub volume_24h: Option<Decimal>,
  /// 24h high.
  pub high_24h: Option<Decimal>,
  /// 24h low.
  pub low_24h: Option<Decimal>,
  /// When the source last updated this quote, if it says.
  pub updated_at: Option<DateTime<Utc>>,
}

/// Batch quote fetcher for the backup upstream.
#[async_trait]
pub trait QuoteSource: Send + Sync + 'static {
  /// Fetch quotes for `upstream_ids`. Instruments the source does not
  /// know are simply absent from the result.
  async fn fetch_quotes(&self, upstream_ids: &[String]) -> anyhow::Result<Vec<BackupQuote>>;
}
