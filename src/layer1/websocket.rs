// WebSocket Client - Binance Futures depth stream with automatic reconnection
// Connection events and raw frames are forwarded over a channel; no shared book state

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::core::config::{secs_to_duration, FeedConfig};
use crate::core::{ConnectionStatus, Shutdown};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle and data events emitted by the feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A new connection is open; the receiver must resync from scratch
    Connected,
    /// One text frame from the stream
    Message(String),
    /// The connection ended; a reconnect will follow unless shutting down
    Disconnected { reason: String },
}

/// Transport failures; all are recovered by reconnecting
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Exponential backoff with a ceiling, reset after a successful connect
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait now; doubles the next one up to the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// WebSocket statistics
#[derive(Debug, Clone)]
pub struct WebSocketStats {
    pub state: ConnectionStatus,
    pub message_count: u64,
    pub error_count: u64,
    pub connect_count: u64,
}

impl fmt::Display for WebSocketStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WebSocketStats(state={:?}, messages={}, errors={}, connects={})",
            self.state, self.message_count, self.error_count, self.connect_count
        )
    }
}

/// Why a single connection ended
enum SessionEnd {
    Shutdown,
    Closed(FeedError),
    ReceiverGone,
}

/// Depth stream client for one symbol
pub struct WebSocketClient {
    url: String,
    pub symbol: String,
    state: Arc<RwLock<ConnectionStatus>>,
    message_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    connect_count: Arc<AtomicU64>,
    shutdown: Shutdown,

    connect_timeout: Duration,
    reconnect_base: Duration,
    reconnect_max: Duration,
    ping_interval_secs: u64,
    stale_timeout_secs: u64,
}

impl WebSocketClient {
    pub fn from_config(config: &FeedConfig, shutdown: Shutdown) -> Self {
        let url = config.stream_url();
        info!(symbol = %config.symbol, url = %url, "WebSocket client created");

        Self {
            url,
            symbol: config.symbol.to_uppercase(),
            state: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            message_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            connect_count: Arc::new(AtomicU64::new(0)),
            shutdown,
            connect_timeout: secs_to_duration(config.connect_timeout_sec),
            reconnect_base: secs_to_duration(config.reconnect_base_delay_sec),
            reconnect_max: secs_to_duration(config.reconnect_max_delay_sec),
            ping_interval_secs: config.ping_interval_sec.max(1),
            stale_timeout_secs: config.stale_timeout_sec.max(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect, forward frames, and reconnect with backoff until shutdown
    pub async fn run(&self, tx: mpsc::UnboundedSender<FeedEvent>) {
        let mut backoff = ExponentialBackoff::new(self.reconnect_base, self.reconnect_max);

        while !self.shutdown.is_triggered() {
            self.set_state(ConnectionStatus::Connecting);
            debug!(url = %self.url, "Connecting to WebSocket");

            let connect = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                res = timeout(self.connect_timeout, connect_async(self.url.as_str())) => res,
            };

            let reason = match connect {
                Ok(Ok((ws_stream, _))) => {
                    backoff.reset();
                    self.connect_count.fetch_add(1, Ordering::Relaxed);
                    self.set_state(ConnectionStatus::Connected);
                    info!(symbol = %self.symbol, "WebSocket connected");

                    if tx.send(FeedEvent::Connected).is_err() {
                        break;
                    }

                    match self.pump(ws_stream, &tx).await {
                        SessionEnd::Shutdown | SessionEnd::ReceiverGone => break,
                        SessionEnd::Closed(reason) => reason,
                    }
                }
                Ok(Err(e)) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    FeedError::Connect(e.to_string())
                }
                Err(_) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    FeedError::Timeout(self.connect_timeout)
                }
            };

            if self.shutdown.is_triggered() {
                break;
            }

            self.set_state(ConnectionStatus::Reconnecting);
            if tx
                .send(FeedEvent::Disconnected {
                    reason: reason.to_string(),
                })
                .is_err()
            {
                break;
            }

            let delay = backoff.next_delay();
            warn!(reason = %reason, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionStatus::Stopped);
        info!(symbol = %self.symbol, "WebSocket client stopped");
    }

    async fn pump(&self, ws_stream: WsStream, tx: &mpsc::UnboundedSender<FeedEvent>) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        let mut ping = tokio::time::interval(Duration::from_secs(self.ping_interval_secs));
        ping.tick().await;
        let stale_after = Duration::from_secs(self.stale_timeout_secs);
        let mut last_message = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_message = Instant::now();
                            self.message_count.fetch_add(1, Ordering::Relaxed);
                            if tx.send(FeedEvent::Message(text.as_str().to_owned())).is_err() {
                                return SessionEnd::ReceiverGone;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            last_message = Instant::now();
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                warn!(error = %e, "Pong failed");
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_message = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "WebSocket closed by server");
                            return SessionEnd::Closed(FeedError::Transport("closed by server".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            self.error_count.fetch_add(1, Ordering::Relaxed);
                            return SessionEnd::Closed(FeedError::Transport(e.to_string()));
                        }
                        None => return SessionEnd::Closed(FeedError::Transport("stream ended".to_string())),
                    }
                }

                _ = ping.tick() => {
                    if last_message.elapsed() > stale_after {
                        warn!(elapsed_ms = last_message.elapsed().as_millis() as u64, "Stale connection detected");
                        return SessionEnd::Closed(FeedError::Transport("stale connection".to_string()));
                    }
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        warn!(error = %e, "Ping failed");
                        return SessionEnd::Closed(FeedError::Transport(e.to_string()));
                    }
                }
            }
        }
    }

    /// Stop the client; idempotent
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    fn set_state(&self, status: ConnectionStatus) {
        *self.state.write() = status;
    }

    pub fn state(&self) -> ConnectionStatus {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionStatus::Connected
    }

    pub fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            state: *self.state.read(),
            message_count: self.message_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            connect_count: self.connect_count.load(Ordering::Relaxed),
        }
    }
}
