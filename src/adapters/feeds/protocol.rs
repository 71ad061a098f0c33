//! Primary Feed Wire Protocol - Control Messages and Event Frames
//!
//! The streaming upstream speaks JSON over a WebSocket:
//!
//! - client → server: `{"action":"auth","params":"<key>"}`, then
//!   `{"action":"subscribe","params":"XT.BTC-USD,XT.ETH-USD"}`
//! - server → client: one JSON object or an array of objects, tagged by
//!   `ev`. `status` frames carry connection/auth status; `XT` frames
//!   carry one trade (`pair`, price `p`, size `s`, exchange time `t` in
//!   Unix milliseconds).
//!
//! Unknown event kinds are tolerated and ignored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::symbol::Symbol;
use crate::domain::tick::{Origin, Tick, TickError};

/// Channel prefix for trade subscriptions.
pub const TRADE_CHANNEL: &str = "XT";

/// Status value confirming a successful authentication.
pub const AUTH_SUCCESS: &str = "auth_success";

/// Status value rejecting the credential.
pub const AUTH_FAILED: &str = "auth_failed";

/// Errors raised while decoding upstream frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timestamp out of range: {0}ms")]
    Timestamp(i64),
    #[error("invalid trade: {0}")]
    Tick(#[from] TickError),
}

/// Control message sent to the upstream.
#[derive(Debug, Serialize)]
struct ControlMessage<'a> {
    action: &'a str,
    params: String,
}

/// One event pushed by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "ev")]
pub enum ServerEvent {
    /// Connection / authentication status.
    #[serde(rename = "status")]
    Status {
        status: String,
        #[serde(default)]
        message: String,
    },
    /// A single trade.
    #[serde(rename = "XT")]
    Trade(TradeEvent),
    /// Any event kind this adapter does not consume.
    #[serde(other)]
    Other,
}

/// Trade event payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeEvent {
    /// Upstream instrument identifier (e.g. `BTC-USD`).
    pub pair: String,
    /// Trade price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Trade size, when reported.
    #[serde(rename = "s", default)]
    pub size: Option<Decimal>,
    /// Exchange timestamp (Unix ms).
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
}

impl TradeEvent {
    /// Exchange timestamp as UTC.
    pub fn source_timestamp(&self) -> Result<DateTime<Utc>, ProtocolError> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
            .ok_or(ProtocolError::Timestamp(self.timestamp_ms))
    }

    /// Normalize into a primary-origin tick for an already-mapped symbol.
    pub fn into_tick(self, symbol: Symbol) -> Result<Tick, ProtocolError> {
        let source_ts = self.source_timestamp()?;
        Ok(Tick::new(symbol, self.price, self.size, source_ts, Origin::Primary)?)
    }
}

/// Decode one text frame into its events.
///
/// Array frames are decoded element by element so one bad element does
/// not discard its neighbours.
pub fn parse_frame(text: &str) -> Vec<Result<ServerEvent, ProtocolError>> {
    if !text.trim_start().starts_with('[') {
        return vec![serde_json::from_str(text).map_err(ProtocolError::from)];
    }
    match serde_json::from_str::<Vec<serde_json::Value>>(text) {
        Ok(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(ProtocolError::from))
            .collect(),
        Err(e) => vec![Err(e.into())],
    }
}

/// Authentication request carrying the upstream credential.
pub fn auth_message(api_key: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ControlMessage {
        action: "auth",
        params: api_key.to_string(),
    })
}

/// Subscription request for a set of upstream identifiers. `None` when
/// there is nothing to subscribe to.
pub fn subscribe_message(upstream_ids: &[String]) -> Result<Option<String>, serde_json::Error> {
    if upstream_ids.is_empty() {
        return Ok(None);
    }
    let params = upstream_ids
        .iter()
        .map(|id| format!("{TRADE_CHANNEL}.{id}"))
        .collect::<Vec<_>>()
        .join(",");
    serde_json::to_string(&ControlMessage {
        action: "subscribe",
        params,
    })
    .map(Some)
}
