//! Primary WebSocket Feed - Streaming Upstream Adapter
//!
//! Holds one persistent connection to the streaming upstream and pushes
//! every mapped trade into the hub with `origin = Primary`.
//!
//! State machine:
//! `Disconnected → Connecting → Authenticating → Subscribed → Disconnected`
//!
//! Features:
//! - Capped exponential reconnect backoff, reset on every `Subscribed`
//! - Full interest-set subscription after each (re)connect, incremental
//!   subscription while `Subscribed`
//! - Outage escalation: repeated rapid failures raise the shared
//!   [`FeedHealth`] flag, cleared on the next `Subscribed`
//! - Malformed and unmapped messages are dropped and counted
//! - Event-driven via tokio::select! (NEVER polling)

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::protocol::{self, ServerEvent, TradeEvent, AUTH_FAILED, AUTH_SUCCESS};
use crate::adapters::metrics::MetricsRegistry;
use crate::config::PrimaryFeedConfig;
use crate::domain::backoff::{Backoff, OutageDetector};
use crate::domain::health::FeedHealth;
use crate::domain::symbol::{Source, Symbol, SymbolMapper};
use crate::ports::tick_sink::TickSink;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Connection state of the primary adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
}

impl fmt::Display for PrimaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
        };
        f.write_str(label)
    }
}

/// How a session ended without a connection error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Shutdown was requested.
    Shutdown,
    /// The hub is gone; nothing left to feed.
    SinkClosed,
}

/// Streaming upstream adapter.
pub struct PrimaryFeed {
    /// Endpoint, credential, timeouts and backoff bounds.
    config: PrimaryFeedConfig,
    /// Upstream id → internal symbol.
    mapper: Arc<SymbolMapper>,
    /// Publish path into the hub.
    sink: Arc<dyn TickSink>,
    /// Symbols consumers care about.
    interest: watch::Receiver<BTreeSet<Symbol>>,
    /// Shared outage flag read by the merge rule.
    health: Arc<FeedHealth>,
    metrics: Arc<MetricsRegistry>,
    /// Published connection state.
    state_tx: watch::Sender<PrimaryState>,
}

impl PrimaryFeed {
    pub fn new(
        config: PrimaryFeedConfig,
        mapper: Arc<SymbolMapper>,
        sink: Arc<dyn TickSink>,
        interest: watch::Receiver<BTreeSet<Symbol>>,
        health: Arc<FeedHealth>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (state_tx, _) = watch::channel(PrimaryState::Disconnected);
        Self {
            config,
            mapper,
            sink,
            interest,
            health,
            metrics,
            state_tx,
        }
    }

    /// Follow the adapter's connection state.
    pub fn state(&self) -> watch::Receiver<PrimaryState> {
        self.state_tx.subscribe()
    }

    /// Run the connection loop until shutdown or until the hub is gone.
    ///
    /// Connection errors never escape: each one schedules a reconnect
    /// after the next backoff delay.
    #[instrument(skip_all, name = "primary_feed")]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(url = %self.config.ws_url, "Starting primary feed");

        let mut interest = self.interest.clone();
        let mut backoff = Backoff::new(
            self.config.reconnect_base_delay(),
            self.config.reconnect_max_delay(),
        );
        let mut outage = OutageDetector::new(
            self.config.outage_failure_threshold,
            self.config.outage_window(),
        );

        loop {
            let result = self
                .session(&mut shutdown_rx, &mut interest, &mut backoff, &mut outage)
                .await;
            self.set_disconnected();

            match result {
                Ok(Flow::Shutdown) => {
                    info!("Primary feed shut down gracefully");
                    break;
                }
                Ok(Flow::SinkClosed) => {
                    info!("Distribution hub gone, primary feed stopping");
                    break;
                }
                Err(e) => {
                    if outage.record_failure(Instant::now()) && self.health.mark_degraded() {
                        self.metrics.primary_degraded.set(1);
                    }
                    let delay = backoff.next_delay();
                    let attempt = self.health.record_reconnect();
                    self.metrics.primary_reconnects.inc();
                    warn!(
                        error = %e,
                        attempt,
                        consecutive_failures = outage.consecutive_failures(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Primary feed disconnected, reconnecting"
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => {
                            info!("Shutdown during reconnect delay");
                            break;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One connection: connect, authenticate, subscribe, stream.
    async fn session(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
        interest: &mut watch::Receiver<BTreeSet<Symbol>>,
        backoff: &mut Backoff,
        outage: &mut OutageDetector,
    ) -> Result<Flow> {
        let handshake = self.handshake(interest);
        let (mut write, mut read, mut subscribed) = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return Ok(Flow::Shutdown),
            result = handshake => result?,
        };

        self.health.set_connected(true);
        self.metrics
            .feed_connected
            .with_label_values(&[Source::Primary.label()])
            .set(1);
        backoff.reset();
        outage.record_success();
        if self.health.clear() {
            self.metrics.primary_degraded.set(0);
        }
        // Published last so observers of Subscribed see the cleared flag.
        self.state_tx.send_replace(PrimaryState::Subscribed);
        info!(instruments = subscribed.len(), "Primary feed subscribed");

        let mut interest_open = true;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Flow::Shutdown);
                }
                changed = interest.changed(), if interest_open => {
                    if changed.is_err() {
                        interest_open = false;
                        continue;
                    }
                    let wanted = self.wanted_ids(interest);
                    let fresh: Vec<String> = wanted
                        .into_iter()
                        .filter(|id| !subscribed.contains(id))
                        .collect();
                    if let Some(frame) = protocol::subscribe_message(&fresh)? {
                        write
                            .send(Message::Text(frame))
                            .await
                            .context("Failed to send incremental subscription")?;
                        info!(added = fresh.len(), "Primary subscription extended");
                        subscribed.extend(fresh);
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(&text).await == Some(Flow::SinkClosed) {
                                return Ok(Flow::SinkClosed);
                            }
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // Pong is handled automatically by tungstenite
                            debug!("Primary ping received");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            bail!("Primary WS closed by upstream: {frame:?}");
                        }
                        Some(Err(e)) => {
                            bail!("Primary WS error: {e}");
                        }
                        None => {
                            bail!("Primary WS stream ended");
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// Connect, authenticate and subscribe to the full interest set.
    async fn handshake(
        &self,
        interest: &mut watch::Receiver<BTreeSet<Symbol>>,
    ) -> Result<(WsWrite, WsRead, BTreeSet<String>)> {
        self.state_tx.send_replace(PrimaryState::Connecting);
        let (ws_stream, _) = tokio::time::timeout(
            self.config.connect_timeout(),
            connect_async(self.config.ws_url.as_str()),
        )
        .await
        .context("Primary WS connect timed out")?
        .context("Primary WS connection failed")?;
        let (mut write, mut read) = ws_stream.split();

        self.state_tx.send_replace(PrimaryState::Authenticating);
        let auth = protocol::auth_message(&self.config.api_key)?;
        write
            .send(Message::Text(auth))
            .await
            .context("Failed to send auth message")?;
        tokio::time::timeout(self.config.auth_timeout(), self.await_auth(&mut read))
            .await
            .context("Primary WS auth timed out")??;

        let ids = self.wanted_ids(interest);
        if let Some(frame) = protocol::subscribe_message(&ids)? {
            write
                .send(Message::Text(frame))
                .await
                .context("Failed to send subscription")?;
        }
        Ok((write, read, ids.into_iter().collect()))
    }

    /// Wait for the upstream to accept our credential.
    async fn await_auth(&self, read: &mut WsRead) -> Result<()> {
        while let Some(msg) = read.next().await {
            match msg.context("Primary WS error during auth")? {
                Message::Text(text) => {
                    for event in protocol::parse_frame(&text) {
                        match event {
                            Ok(ServerEvent::Status { status, .. }) if status == AUTH_SUCCESS => {
                                return Ok(());
                            }
                            Ok(ServerEvent::Status { status, message }) if status == AUTH_FAILED => {
                                bail!("Primary feed rejected credential: {message}");
                            }
                            Ok(ServerEvent::Status { status, message }) => {
                                debug!(status = %status, message = %message, "Primary status before auth");
                            }
                            Ok(_) => {}
                            Err(e) => self.count_malformed(&e),
                        }
                    }
                }
                Message::Close(frame) => bail!("Primary WS closed during auth: {frame:?}"),
                _ => {}
            }
        }
        bail!("Primary WS stream ended during auth")
    }

    /// Decode one text frame and publish every mapped trade.
    ///
    /// Returns `Some(Flow::SinkClosed)` once the hub stops accepting ticks.
    async fn handle_text(&self, text: &str) -> Option<Flow> {
        for event in protocol::parse_frame(text) {
            match event {
                Ok(ServerEvent::Trade(trade)) => {
                    if self.publish_trade(trade).await.is_err() {
                        return Some(Flow::SinkClosed);
                    }
                }
                Ok(ServerEvent::Status { status, message }) => {
                    debug!(status = %status, message = %message, "Primary status");
                }
                Ok(ServerEvent::Other) => {}
                Err(e) => self.count_malformed(&e),
            }
        }
        None
    }

    /// Map, validate and publish one trade. Only a closed sink is an error.
    async fn publish_trade(&self, trade: TradeEvent) -> Result<()> {
        let Some(symbol) = self.mapper.map(Source::Primary, &trade.pair) else {
            self.metrics
                .unmapped_identifiers
                .with_label_values(&[Source::Primary.label()])
                .inc();
            debug!(pair = %trade.pair, "Unmapped primary identifier dropped");
            return Ok(());
        };

        match trade.into_tick(symbol) {
            Ok(tick) => self.sink.publish(tick).await,
            Err(e) => {
                self.count_malformed(&e);
                Ok(())
            }
        }
    }

    fn wanted_ids(&self, interest: &mut watch::Receiver<BTreeSet<Symbol>>) -> Vec<String> {
        let set = interest.borrow_and_update();
        self.mapper.upstream_ids(Source::Primary, set.iter())
    }

    fn count_malformed(&self, error: &protocol::ProtocolError) {
        self.metrics
            .malformed_messages
            .with_label_values(&[Source::Primary.label()])
            .inc();
        warn!(error = %error, "Malformed primary message dropped");
    }

    fn set_disconnected(&self) {
        self.state_tx.send_replace(PrimaryState::Disconnected);
        self.health.set_connected(false);
        self.metrics
            .feed_connected
            .with_label_values(&[Source::Primary.label()])
            .set(0);
    }
}
