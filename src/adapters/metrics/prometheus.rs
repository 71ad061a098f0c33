//! Prometheus Metrics Registry - Market Data Observability
//!
//! Registers the counters and gauges scraped from `/metrics`:
//! ingest volume per origin, merge-rule discards, unmapped upstream
//! identifiers, subscriber churn, alert firings and feed health.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Centralized Prometheus metrics for the market-data core.
///
/// Not a process global: every pipeline (and every test) owns its own
/// registry. All metrics follow the naming convention `market_data_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Ticks offered to the hub, by origin.
    pub ticks_received: IntCounterVec,
    /// Ticks applied to a snapshot and fanned out, by origin.
    pub ticks_applied: IntCounterVec,
    /// Ticks rejected by the merge rule, by reason.
    pub ticks_discarded: IntCounterVec,
    /// Upstream identifiers with no internal mapping, by source.
    pub unmapped_identifiers: IntCounterVec,
    /// Upstream messages that failed to parse or validate, by source.
    pub malformed_messages: IntCounterVec,
    /// Currently attached channel subscribers.
    pub subscribers_active: IntGauge,
    /// Subscribers torn down by the hub, by reason.
    pub subscribers_evicted: IntCounterVec,
    /// Alerts that fired.
    pub alerts_fired: IntCounter,
    /// Notification calls that failed.
    pub notification_failures: IntCounter,
    /// Primary reconnect attempts.
    pub primary_reconnects: IntCounter,
    /// Primary outage flag (1 = backup authoritative).
    pub primary_degraded: IntGauge,
    /// Backup polls that failed.
    pub backup_poll_failures: IntCounter,
    /// Feed connection status (1 = connected, 0 = disconnected).
    pub feed_connected: IntGaugeVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_received = IntCounterVec::new(
            Opts::new("market_data_ticks_received_total", "Ticks offered to the hub"),
            &["origin"],
        )?;

        let ticks_applied = IntCounterVec::new(
            Opts::new(
                "market_data_ticks_applied_total",
                "Ticks applied to a snapshot and fanned out",
            ),
            &["origin"],
        )?;

        let ticks_discarded = IntCounterVec::new(
            Opts::new(
                "market_data_ticks_discarded_total",
                "Ticks rejected by the snapshot merge rule",
            ),
            &["reason"],
        )?;

        let unmapped_identifiers = IntCounterVec::new(
            Opts::new(
                "market_data_unmapped_identifiers_total",
                "Upstream messages dropped for lack of a symbol mapping",
            ),
            &["source"],
        )?;

        let malformed_messages = IntCounterVec::new(
            Opts::new(
                "market_data_malformed_messages_total",
                "Upstream messages that failed to parse or validate",
            ),
            &["source"],
        )?;

        let subscribers_active = IntGauge::new(
            "market_data_subscribers_active",
            "Currently attached tick subscribers",
        )?;

        let subscribers_evicted = IntCounterVec::new(
            Opts::new(
                "market_data_subscribers_evicted_total",
                "Subscribers torn down by the hub",
            ),
            &["reason"],
        )?;

        let alerts_fired = IntCounter::new("market_data_alerts_fired_total", "Price alerts fired")?;

        let notification_failures = IntCounter::new(
            "market_data_notification_failures_total",
            "Alert notifications that failed to deliver",
        )?;

        let primary_reconnects = IntCounter::new(
            "market_data_primary_reconnects_total",
            "Primary feed reconnect attempts",
        )?;

        let primary_degraded = IntGauge::new(
            "market_data_primary_degraded",
            "Whether the primary feed outage flag is raised (1=yes, 0=no)",
        )?;

        let backup_poll_failures = IntCounter::new(
            "market_data_backup_poll_failures_total",
            "Backup polls that failed",
        )?;

        let feed_connected = IntGaugeVec::new(
            Opts::new(
                "market_data_feed_connected",
                "Feed connection status (1=connected, 0=disconnected)",
            ),
            &["source"],
        )?;

        // Register all metrics
        registry.register(Box::new(ticks_received.clone()))?;
        registry.register(Box::new(ticks_applied.clone()))?;
        registry.register(Box::new(ticks_discarded.clone()))?;
        registry.register(Box::new(unmapped_identifiers.clone()))?;
        registry.register(Box::new(malformed_messages.clone()))?;
        registry.register(Box::new(subscribers_active.clone()))?;
        registry.register(Box::new(subscribers_evicted.clone()))?;
        registry.register(Box::new(alerts_fired.clone()))?;
        registry.register(Box::new(notification_failures.clone()))?;
        registry.register(Box::new(primary_reconnects.clone()))?;
        registry.register(Box::new(primary_degraded.clone()))?;
        registry.register(Box::new(backup_poll_failures.clone()))?;
        registry.register(Box::new(feed_connected.clone()))?;

        Ok(Self {
            registry,
            ticks_received,
            ticks_applied,
            ticks_discarded,
            unmapped_identifiers,
            malformed_messages,
            subscribers_active,
            subscribers_evicted,
            alerts_fired,
            notification_failures,
            primary_reconnects,
            primary_degraded,
            backup_poll_failures,
            feed_connected,
        })
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
