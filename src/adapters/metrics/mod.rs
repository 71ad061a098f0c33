//! Metrics Adapter
//!
//! Prometheus registry for the market-data core. Exposed over HTTP by
//! the `http` adapter alongside the liveness and readiness probes.

pub mod prometheus;

pub use prometheus::MetricsRegistry;
