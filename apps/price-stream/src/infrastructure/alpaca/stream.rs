//! Stock Stream Connection
//!
//! Owns the single WebSocket to Alpaca's stock market-data stream.
//!
//! # State Machine
//!
//! ```text
//! disconnected --connect()--> connecting --(socket open)--> authenticating
//!      ^                                                          |
//!      |                                                    (auth ack)
//!      +----(error / close / heartbeat / auth timeout)---- connected
//! ```
//!
//! A drop from `authenticating` or `connected` emits
//! `ConnectionChanged(false)` and schedules a reconnect using
//! [`ReconnectPolicy`]. Once the policy runs out of attempts the loop stops,
//! emits [`StreamEvent::ReconnectsExhausted`], and stays disconnected until
//! [`StreamConnection::connect`] is called again.
//!
//! On every successful authentication the connection reads the desired
//! symbols from its [`SubscriptionSource`] and sends them as one subscribe
//! request. It never decides on its own which symbols to stream.
//!
//! # Stream URL
//!
//! - Real-time: `wss://stream.data.alpaca.markets/v2/sip`
//! - Free tier: `wss://stream.data.alpaca.markets/v2/iex`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::auth::{AUTH_TIMEOUT, AuthError, AuthHandler, Credentials};
use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatTracker};
use super::messages::{AlpacaMessage, SubscriptionRequest};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::price::{ConnectionState, PriceUpdate, Symbol};
use crate::domain::subscription::SubscriptionSource;
use crate::infrastructure::metrics::{self, UpdateKind};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one stream session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Authentication failed or timed out.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Outbound message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No traffic after a ping.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Stream Events
// =============================================================================

/// Events emitted by the stream connection.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Authenticated (`true`) or dropped a session (`false`).
    ConnectionChanged(bool),
    /// A quote or trade produced a price.
    Update(PriceUpdate),
    /// Provider confirmed the active subscription set.
    Subscribed {
        /// Distinct symbols confirmed.
        symbols: usize,
    },
    /// Provider sent an error frame after authentication.
    ProviderError {
        /// Error code.
        code: i32,
        /// Error text.
        message: String,
    },
    /// Reconnection stopped after the configured number of attempts.
    ReconnectsExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL.
    pub url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Deadline for the auth acknowledgement.
    pub auth_timeout: Duration,
}

impl StreamConfig {
    /// Create a configuration with default reconnect and heartbeat values.
    #[must_use]
    pub fn new(url: String, credentials: Credentials) -> Self {
        Self {
            url,
            credentials,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            auth_timeout: AUTH_TIMEOUT,
        }
    }

    /// Create a configuration from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &crate::StreamSettings, credentials: Credentials) -> Self {
        Self {
            url: settings.url.clone(),
            credentials,
            reconnect: ReconnectConfig::from_stream_settings(settings),
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
            auth_timeout: AUTH_TIMEOUT,
        }
    }

    /// Production stream URL for a feed (`sip` or `iex`).
    #[must_use]
    pub fn feed_url(feed: &str) -> String {
        format!("wss://stream.data.alpaca.markets/v2/{feed}")
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug)]
enum StreamCommand {
    Subscribe(Vec<Symbol>),
    Unsubscribe(Vec<Symbol>),
}

// =============================================================================
// Stream Connection
// =============================================================================

/// Single persistent connection to the stock stream.
pub struct StreamConnection {
    config: StreamConfig,
    codec: JsonCodec,
    subscriptions: Arc<dyn SubscriptionSource>,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    state: RwLock<ConnectionState>,
    policy: Mutex<ReconnectPolicy>,
    command_tx: mpsc::UnboundedSender<StreamCommand>,
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamCommand>>,
    running: AtomicBool,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("url", &self.config.url)
            .field("state", &*self.state.read())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Create a new, idle stream connection.
    #[must_use]
    pub fn new(
        config: StreamConfig,
        subscriptions: Arc<dyn SubscriptionSource>,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            config,
            codec: JsonCodec::new(),
            subscriptions,
            event_tx,
            cancel,
            state: RwLock::new(ConnectionState::Disconnected),
            policy: Mutex::new(policy),
            command_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
            running: AtomicBool::new(false),
        }
    }

    /// Start the connection loop.
    ///
    /// Idempotent: returns `false` without doing anything while a loop is
    /// already running, including while it waits out a reconnect delay.
    /// Otherwise the attempt counter is reset and a new loop is spawned.
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() || self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.policy.lock().reset();
        tokio::spawn(Arc::clone(self).run());
        true
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the stream is authenticated.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether a connection loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reconnect attempts since the last successful authentication.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.policy.lock().attempt_count()
    }

    /// Subscribe to `symbols` on the live socket.
    ///
    /// Only sends while connected. Returns `false` when nothing was queued;
    /// symbols held by the subscription source are replayed on the next
    /// authentication anyway.
    pub fn subscribe(&self, symbols: &[Symbol]) -> bool {
        self.queue(symbols, StreamCommand::Subscribe)
    }

    /// Unsubscribe from `symbols` on the live socket.
    ///
    /// Only sends while connected.
    pub fn unsubscribe(&self, symbols: &[Symbol]) -> bool {
        self.queue(symbols, StreamCommand::Unsubscribe)
    }

    /// Stop the connection loop for good.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn queue(&self, symbols: &[Symbol], command: fn(Vec<Symbol>) -> StreamCommand) -> bool {
        if symbols.is_empty() || !self.is_connected() {
            return false;
        }
        self.command_tx.send(command(symbols.to_vec())).is_ok()
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Stream state changed");
            metrics::set_connection_state(state);
        }
        previous
    }

    async fn emit(&self, event: StreamEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::trace!("Stream event receiver dropped");
        }
    }

    // =========================================================================
    // Connection Loop
    // =========================================================================

    async fn run(self: Arc<Self>) {
        let mut commands = self.command_rx.lock().await;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let result = self.connect_and_run(&mut commands).await;
            let previous = self.set_state(ConnectionState::Disconnected);
            if previous.is_session() {
                self.emit(StreamEvent::ConnectionChanged(false)).await;
            }

            match result {
                Ok(()) => {
                    tracing::info!("Stream connection closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, state = %previous, "Stream connection error");
                }
            }

            let (next, attempt) = {
                let mut policy = self.policy.lock();
                let next = policy.next_delay();
                (next, policy.attempt_count())
            };

            let Some(delay) = next else {
                tracing::error!(
                    attempts = attempt,
                    "Stream reconnect attempts exhausted, staying disconnected until reconnect() is called"
                );
                self.running.store(false, Ordering::SeqCst);
                self.emit(StreamEvent::ReconnectsExhausted { attempts: attempt })
                    .await;
                return;
            };

            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to stock stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Stream cancelled during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Run one session until it fails or the connection is cancelled.
    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<StreamCommand>,
    ) -> Result<(), StreamError> {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to stock stream");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.config.url.as_str()) => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        self.set_state(ConnectionState::Authenticating);
        let mut auth = AuthHandler::new(self.config.credentials.clone());
        let request = auth.create_auth_request();
        write
            .send(Message::Text(self.codec.encode(&request)?.into()))
            .await?;

        // Anything queued for a previous socket is covered by the replay.
        while commands.try_recv().is_ok() {}

        let auth_deadline = tokio::time::sleep(self.config.auth_timeout);
        tokio::pin!(auth_deadline);

        let mut heartbeat = HeartbeatTracker::new(self.config.heartbeat.clone());
        let mut ping_interval = tokio::time::interval_at(
            tokio::time::Instant::now() + heartbeat.ping_interval(),
            heartbeat.ping_interval(),
        );
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = &mut auth_deadline, if !auth.is_authenticated() => {
                    return Err(AuthError::Timeout.into());
                }
                _ = ping_interval.tick() => {
                    match heartbeat.on_tick(std::time::Instant::now()) {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        HeartbeatAction::TimedOut => return Err(StreamError::HeartbeatTimeout),
                    }
                }
                Some(command) = commands.recv() => {
                    if auth.is_authenticated() {
                        self.send_command(&mut write, command).await?;
                    } else {
                        tracing::debug!(?command, "Dropping command sent before authentication");
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity();
                            self.handle_text_message(&text, &mut auth, &mut write).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(StreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => heartbeat.record_activity(),
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(StreamError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle a text frame.
    ///
    /// Malformed frames and elements are logged and dropped; only socket
    /// and authentication failures end the session.
    async fn handle_text_message<W>(
        &self,
        text: &str,
        auth: &mut AuthHandler,
        write: &mut W,
    ) -> Result<(), StreamError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let decoded = match self.codec.decode(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                let preview: String = text.chars().take(120).collect();
                tracing::warn!(error = %e, frame = %preview, "Dropping malformed frame");
                metrics::record_frame_dropped("malformed_frame");
                return Ok(());
            }
        };

        for dropped in decoded.dropped {
            tracing::debug!(reason = dropped.reason.as_str(), detail = %dropped.detail, "Dropped frame element");
            metrics::record_frame_dropped(dropped.reason.as_str());
        }

        for msg in decoded.messages {
            match msg {
                AlpacaMessage::Success(success) => {
                    if auth.on_success(&success) {
                        self.on_authenticated(write).await?;
                    } else {
                        tracing::debug!(msg = ?success.msg, "Stream acknowledgement");
                    }
                }
                AlpacaMessage::Error(error) => {
                    metrics::record_provider_error(error.code);
                    if !auth.is_authenticated() {
                        tracing::error!(code = error.code, msg = %error.msg, "Stream authentication rejected");
                        return Err(auth.on_error(&error).into());
                    }
                    tracing::warn!(code = error.code, msg = %error.msg, "Stream error frame");
                    self.emit(StreamEvent::ProviderError {
                        code: error.code,
                        message: error.msg,
                    })
                    .await;
                }
                AlpacaMessage::Subscription(sub) => {
                    let symbols = sub.symbol_count();
                    tracing::debug!(
                        quotes = ?sub.quotes,
                        trades = ?sub.trades,
                        "Subscription confirmed"
                    );
                    metrics::set_confirmed_symbols(symbols);
                    self.emit(StreamEvent::Subscribed { symbols }).await;
                }
                AlpacaMessage::Quote(quote) => match quote.to_price_update() {
                    Some(update) => {
                        metrics::record_update(update.source, UpdateKind::Quote);
                        self.emit(StreamEvent::Update(update)).await;
                    }
                    None => {
                        tracing::debug!(symbol = %quote.symbol, "Quote without a usable price");
                    }
                },
                AlpacaMessage::Trade(trade) => match trade.to_price_update() {
                    Some(update) => {
                        metrics::record_update(update.source, UpdateKind::Trade);
                        self.emit(StreamEvent::Update(update)).await;
                    }
                    None => {
                        tracing::debug!(symbol = %trade.symbol, "Trade without a usable price");
                    }
                },
            }
        }

        Ok(())
    }

    async fn on_authenticated<W>(&self, write: &mut W) -> Result<(), StreamError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        // State flips before the registry read so a concurrent subscribe
        // either lands in the replay or sees `Connected` and sends itself.
        self.set_state(ConnectionState::Connected);
        self.policy.lock().reset();
        tracing::info!("Stock stream authenticated");
        self.emit(StreamEvent::ConnectionChanged(true)).await;

        let symbols = self.subscriptions.desired_symbols();
        if !symbols.is_empty() {
            tracing::info!(count = symbols.len(), "Replaying subscriptions");
            self.send_request(write, &SubscriptionRequest::subscribe(&symbols))
                .await?;
        }
        Ok(())
    }

    async fn send_command<W>(&self, write: &mut W, command: StreamCommand) -> Result<(), StreamError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let request = match command {
            StreamCommand::Subscribe(symbols) => SubscriptionRequest::subscribe(&symbols),
            StreamCommand::Unsubscribe(symbols) => SubscriptionRequest::unsubscribe(&symbols),
        };
        self.send_request(write, &request).await
    }

    async fn send_request<W>(
        &self,
        write: &mut W,
        request: &SubscriptionRequest,
    ) -> Result<(), StreamError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        tracing::debug!(
            action = request.action,
            quotes = ?request.quotes,
            trades = ?request.trades,
            "Sending subscription request"
        );
        write
            .send(Message::Text(self.codec.encode(request)?.into()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriptionRegistry;

    fn connection(url: &str) -> (Arc<StreamConnection>, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let mut config = StreamConfig::new(
            url.to_string(),
            Credentials::new("key", "secret").unwrap(),
        );
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_attempts: 2,
            ..Default::default()
        };
        let registry: Arc<dyn SubscriptionSource> = Arc::new(SubscriptionRegistry::new());
        (
            Arc::new(StreamConnection::new(
                config,
                registry,
                tx,
                CancellationToken::new(),
            )),
            rx,
        )
    }

    #[test]
    fn feed_url() {
        assert_eq!(
            StreamConfig::feed_url("iex"),
            "wss://stream.data.alpaca.markets/v2/iex"
        );
    }

    #[test]
    fn commands_are_not_queued_while_disconnected() {
        let (conn, _rx) = connection("ws://127.0.0.1:1");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.subscribe(&["AAPL".to_string()]));
        assert!(!conn.unsubscribe(&["AAPL".to_string()]));
    }

    #[tokio::test]
    async fn unreachable_server_exhausts_attempts() {
        // Port 1 refuses connections on any sane test host.
        let (conn, mut rx) = connection("ws://127.0.0.1:1");
        assert!(conn.connect());
        assert!(!conn.connect(), "second connect while running is a no-op");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, StreamEvent::ReconnectsExhausted { attempts: 2 }));
        assert!(!conn.is_running());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_after_shutdown_is_ignored() {
        let (conn, _rx) = connection("ws://127.0.0.1:1");
        conn.shutdown();
        assert!(!conn.connect());
        assert!(!conn.is_running());
    }
}
