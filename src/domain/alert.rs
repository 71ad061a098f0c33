//! Price Alerts - User Threshold Rules
//!
//! An alert fires at most once per threshold crossing: once `fired_at`
//! is set it stays silent until its owner resets it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::symbol::Symbol;
use super::tick::Tick;

/// Alert identifier.
pub type AlertId = Uuid;

/// Direction of the threshold test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    /// Fires when price > threshold.
    Above,
    /// Fires when price < threshold.
    Below,
}

impl AlertCondition {
    /// Strict comparison; touching the threshold does not fire.
    pub fn is_met(self, price: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::Above => price > threshold,
            Self::Below => price < threshold,
        }
    }
}

/// Owner-supplied fields for a new alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlert {
    pub symbol: Symbol,
    pub condition: AlertCondition,
    pub threshold: Decimal,
}

/// A user-defined price alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAlert {
    pub id: AlertId,
    pub symbol: Symbol,
    pub condition: AlertCondition,
    pub threshold: Decimal,
    pub enabled: bool,
    pub fired_at: Option<DateTime<Utc>>,
}

impl PriceAlert {
    /// Create an enabled, unfired alert with a fresh id.
    pub fn create(rule: NewAlert) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: rule.symbol,
            condition: rule.condition,
            threshold: rule.threshold,
            enabled: true,
            fired_at: None,
        }
    }

    /// Whether this alert is eligible to fire at all.
    pub fn is_armed(&self) -> bool {
        self.enabled && self.fired_at.is_none()
    }

    /// Test the alert against a tick; on success marks it fired and
    /// returns the firing record.
    pub fn check(&mut self, tick: &Tick, now: DateTime<Utc>) -> Option<AlertFiring> {
        if !self.is_armed() || tick.symbol() != &self.symbol {
            return None;
        }
        if !self.condition.is_met(tick.price(), self.threshold) {
            return None;
        }
        self.fired_at = Some(now);
        Some(AlertFiring {
            alert_id: self.id,
            symbol: self.symbol.clone(),
            condition: self.condition,
            threshold: self.threshold,
            price: tick.price(),
            fired_at: now,
        })
    }

    /// Re-arm: clear `fired_at` and enable.
    pub fn reset(&mut self) {
        self.fired_at = None;
        self.enabled = true;
    }
}

/// Payload handed to the notification collaborator when an alert fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertFiring {
    pub alert_id: AlertId,
    pub symbol: Symbol,
    pub condition: AlertCondition,
    pub threshold: Decimal,
    /// Price of the triggering tick.
    pub price: Decimal,
    pub fired_at: DateTime<Utc>,
}
