//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSockets, HTTP clients and servers, file
//! I/O). Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `feeds`: primary WebSocket stream and backup REST poller
//! - `http`: probes, metrics and the read/alert surface
//! - `metrics`: Prometheus registry
//! - `notify`: alert notification delivery
//! - `persistence`: atomic snapshot file for warm start
//! - `pipeline`: wiring and lifecycle of the long-running tasks

pub mod feeds;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod persistence;
pub mod pipeline;
