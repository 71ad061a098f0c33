//! HTTP Server - Probes, Metrics and the Read/Alert Surface
//!
//! Exposes via axum 0.7:
//! - `/live`, `/ready` for orchestrator probes
//! - `/metrics` in the Prometheus text format
//! - snapshot reads and alert management for the CRUD layer
//!   (create, list, delete, reset, enable/disable)
//!
//! Readiness fails while shutting down, and when the store holds
//! snapshots but every one of them is stale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use super::metrics::MetricsRegistry;
use crate::domain::alert::{AlertId, NewAlert};
use crate::domain::symbol::Symbol;
use crate::ports::market_data::MarketDataQuery;
use crate::usecases::market_data::MarketDataService;

type ApiError = (StatusCode, String);

/// State shared by every handler.
#[derive(Clone)]
pub struct HttpState {
    /// Query surface over the running pipeline.
    service: MarketDataService,
    metrics: Arc<MetricsRegistry>,
    /// Set once shutdown has begun.
    shutting_down: Arc<AtomicBool>,
}

impl HttpState {
    pub fn new(service: MarketDataService, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            service,
            metrics,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flip readiness off ahead of shutdown.
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Check if the core is ready to serve traffic.
    pub fn is_ready(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire) && self.service.is_fresh(Utc::now())
    }
}

/// Build the router for `state`.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .route("/metrics", get(metrics))
        .route("/snapshots", get(list_snapshots))
        .route("/snapshots/:base/:quote", get(get_snapshot))
        .route("/alerts", get(list_alerts).post(create_alert))
        .route("/alerts/:id", delete(delete_alert))
        .route("/alerts/:id/reset", post(reset_alert))
        .route("/alerts/:id/enabled", put(set_alert_enabled))
        .with_state(state)
}

/// Axum-based HTTP server.
pub struct HttpServer {
    state: HttpState,
    /// Bind address (`http.bind_address`).
    bind_address: String,
}

impl HttpServer {
    pub fn new(state: HttpState, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    /// Serve until the shutdown signal.
    #[instrument(skip_all, name = "http_server")]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        info!(address = %self.bind_address, "HTTP server started");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness(State(state): State<HttpState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics(State(state): State<HttpState>) -> Result<String, ApiError> {
    state.metrics.render().map_err(|e| {
        warn!(error = %e, "Metrics encoding failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn list_snapshots(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.service.list_snapshots())
}

async fn get_snapshot(
    State(state): State<HttpState>,
    Path((base, quote)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = Symbol::parse(&format!("{base}/{quote}"))
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid symbol {base}/{quote}")))?;
    state
        .service
        .get_snapshot(&symbol)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no snapshot for {symbol}")))
}

async fn list_alerts(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.service.list_alerts())
}

async fn create_alert(
    State(state): State<HttpState>,
    Json(mut rule): Json<NewAlert>,
) -> Result<impl IntoResponse, ApiError> {
    rule.symbol = Symbol::parse(rule.symbol.as_str()).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid symbol {}", rule.symbol),
        )
    })?;
    let alert = state
        .service
        .create_alert(rule)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn delete_alert(
    State(state): State<HttpState>,
    Path(id): Path<AlertId>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .delete_alert(id)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_alert(
    State(state): State<HttpState>,
    Path(id): Path<AlertId>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .reset_alert(id)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EnabledBody {
    enabled: bool,
}

async fn set_alert_enabled(
    State(state): State<HttpState>,
    Path(id): Path<AlertId>,
    Json(body): Json<EnabledBody>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .set_alert_enabled(id, body.enabled)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
