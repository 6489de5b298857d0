//! Shared fixtures for integration tests.
//!
//! `MockAlpacaServer` speaks enough of the market-data protocol to
//! authenticate a client and record what it sends.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use async_trait::async_trait;
use price_stream::application::ports::{
    AlertCheckPort, BackfillPort, CacheError, CachedPrice, NoOpAlertChecker, NoOpBackfill,
    PriceStore,
};
use price_stream::infrastructure::alpaca::{Credentials, ReconnectConfig, StreamConfig};
use price_stream::infrastructure::cache::InMemoryPriceStore;
use price_stream::{DistributionConfig, PriceCache, PriceDistributionService};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// A frame received from a client, tagged with its connection number.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    /// Zero-based index of the accepted connection.
    pub connection: usize,
    /// Decoded JSON body.
    pub body: Value,
}

impl ClientFrame {
    /// The `action` field of a client request.
    pub fn action(&self) -> &str {
        self.body["action"].as_str().unwrap_or_default()
    }

    /// Symbols in the `trades` list of a subscription request.
    pub fn trades(&self) -> Vec<String> {
        self.body["trades"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
enum ServerAction {
    Send(String),
    Close,
}

/// In-process stand-in for the market-data WebSocket.
pub struct MockAlpacaServer {
    url: String,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    control: broadcast::Sender<ServerAction>,
    refusing: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl MockAlpacaServer {
    /// Bind on an ephemeral port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(64);
        let refusing = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn({
            let control = control.clone();
            let refusing = Arc::clone(&refusing);
            let connections = Arc::clone(&connections);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    if refusing.load(Ordering::SeqCst) {
                        drop(stream);
                        continue;
                    }
                    let connection = connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        connection,
                        frames_tx.clone(),
                        control.subscribe(),
                    ));
                }
            }
        });

        Self {
            url,
            frames,
            control,
            refusing,
            connections,
            task,
        }
    }

    /// `ws://` URL clients should dial.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Drop incoming TCP connections before the WebSocket handshake.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of WebSocket sessions accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Push a raw text frame to every open session.
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.control.send(ServerAction::Send(frame.into()));
    }

    /// Close every open session from the server side.
    pub fn close_sessions(&self) {
        let _ = self.control.send(ServerAction::Close);
    }

    /// Next client frame with the given `action`, skipping others.
    pub async fn expect_action(&mut self, action: &str) -> ClientFrame {
        tokio::time::timeout(WAIT, async {
            loop {
                let frame = self.frames.recv().await.expect("server task ended");
                if frame.action() == action {
                    return frame;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no `{action}` frame within {WAIT:?}"))
    }
}

impl Drop for MockAlpacaServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    connection: usize,
    frames: mpsc::UnboundedSender<ClientFrame>,
    mut control: broadcast::Receiver<ServerAction>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    if write
        .send(Message::Text(
            r#"[{"T":"success","msg":"connected"}]"#.into(),
        ))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(body) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    if body["action"] == "auth" {
                        let ack = r#"[{"T":"success","msg":"authenticated"}]"#;
                        if write.send(Message::Text(ack.into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = frames.send(ClientFrame { connection, body });
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            action = control.recv() => match action {
                Ok(ServerAction::Send(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(ServerAction::Close) | Err(_) => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    }
}

/// Stream settings with fast reconnects for tests.
pub fn stream_config(url: &str, max_attempts: u32) -> StreamConfig {
    let mut config = StreamConfig::new(
        url.to_string(),
        Credentials::new("test-key", "test-secret").unwrap(),
    );
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Some(Duration::from_millis(50)),
        jitter_factor: 0.0,
        max_attempts,
        ..ReconnectConfig::default()
    };
    config
}

/// Cache backed only by the in-process store.
pub fn memory_cache() -> PriceCache {
    let store: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
    PriceCache::new(None, store, Duration::from_secs(5))
}

/// Store whose writes stall for a fixed delay and then fail.
pub struct StallingStore(pub Duration);

#[async_trait]
impl PriceStore for StallingStore {
    async fn get(&self, _symbol: &str) -> Result<Option<CachedPrice>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _symbol: &str, _entry: CachedPrice, _ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(self.0).await;
        Err(CacheError::Unavailable("request timed out".to_string()))
    }

    fn name(&self) -> &'static str {
        "stalling"
    }
}

/// Cache whose primary stalls on every write, backed by memory.
pub fn stalling_cache(delay: Duration) -> PriceCache {
    let primary: Arc<dyn PriceStore> = Arc::new(StallingStore(delay));
    let fallback: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
    PriceCache::new(Some(primary), fallback, Duration::from_secs(5))
}

/// Service wired to `url` with no backfill and no alert checks.
pub fn service(url: &str, max_attempts: u32) -> Arc<PriceDistributionService> {
    service_with(url, max_attempts, memory_cache(), Arc::new(NoOpBackfill))
}

/// Service wired to `url` with the given cache and backfill.
pub fn service_with(
    url: &str,
    max_attempts: u32,
    cache: PriceCache,
    backfill: Arc<dyn BackfillPort>,
) -> Arc<PriceDistributionService> {
    let alerts: Arc<dyn AlertCheckPort> = Arc::new(NoOpAlertChecker);
    Arc::new(PriceDistributionService::new(
        DistributionConfig::new(stream_config(url, max_attempts)),
        cache,
        backfill,
        alerts,
    ))
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
