//! Price Distribution Service
//!
//! The public face of the crate. Consumers register symbols and callbacks;
//! the service owns the subscription registry, the last-known price map,
//! and the single stream connection, and hides connection state from
//! everyone who does not ask for it.
//!
//! # Update Path
//!
//! ```text
//! stream / backfill
//!        |
//!        v
//!  accept_update --> last-known map --> price callbacks --> broadcast
//!        |
//!        +--> cache write queue --> price cache (writer task)
//!        +--> alert check (spawned) --> alert callbacks --> broadcast
//! ```
//!
//! Updates for one symbol are delivered in the order they were received.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::listeners::{
    AlertListeners, ConnectionListeners, ListenerId, PriceCallback, PriceListeners, invoke,
};
use super::price_cache::{CacheWriteQueue, PriceCache};
use crate::application::ports::{AlertCheckPort, BackfillPort};
use crate::domain::alert::TriggeredAlert;
use crate::domain::price::{
    ConnectionState, FeedStatus, PriceSource, PriceUpdate, Symbol, normalize_symbol,
    normalize_symbols,
};
use crate::domain::subscription::{SubscriptionRegistry, SubscriptionSource};
use crate::infrastructure::alpaca::{StreamConfig, StreamConnection, StreamEvent};
use crate::infrastructure::broadcast::{BroadcastConfig, BroadcastStats, UpdateHub};
use crate::infrastructure::metrics::{self, Outcome, UpdateKind};

// =============================================================================
// Configuration
// =============================================================================

/// Default capacity of the stream event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1_024;

/// Configuration for the distribution service.
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    /// Stream connection settings, used when the stream is first needed.
    pub stream: StreamConfig,
    /// Broadcast channel capacities.
    pub broadcast: BroadcastConfig,
    /// Capacity of the channel between the stream and the service.
    pub event_buffer: usize,
}

impl DistributionConfig {
    /// Create a configuration with default channel sizes.
    #[must_use]
    pub fn new(stream: StreamConfig) -> Self {
        Self {
            stream,
            broadcast: BroadcastConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// What one `subscribe_to_symbols` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeReport {
    /// Symbols that were not desired before this call.
    pub added: Vec<Symbol>,
    /// Symbols seeded from the price cache.
    pub cached: Vec<Symbol>,
    /// Symbols seeded from the REST backfill.
    pub backfilled: Vec<Symbol>,
}

/// Point-in-time service statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Stream connection state.
    pub connection_state: ConnectionState,
    /// Feed status.
    pub feed_status: FeedStatus,
    /// Reconnect attempts since the last authentication.
    pub reconnect_attempts: u32,
    /// Symbols in the subscription registry.
    pub desired_symbols: usize,
    /// Symbols with a last-known price.
    pub tracked_prices: usize,
    /// Registered price callbacks.
    pub price_listeners: usize,
    /// Registered alert callbacks.
    pub alert_listeners: usize,
    /// Registered connection callbacks.
    pub connection_listeners: usize,
    /// Store consulted first by the cache.
    pub cache_backend: &'static str,
    /// Broadcast receiver counts.
    pub broadcast: BroadcastStats,
}

// =============================================================================
// Service
// =============================================================================

/// Fans one upstream price feed out to any number of consumers.
///
/// Construct once and share as `Arc<PriceDistributionService>`. Dropping the
/// last handle stops the stream connection.
pub struct PriceDistributionService {
    config: DistributionConfig,
    registry: Arc<SubscriptionRegistry>,
    price_listeners: PriceListeners,
    alert_listeners: AlertListeners,
    connection_listeners: ConnectionListeners,
    last_prices: RwLock<HashMap<Symbol, PriceUpdate>>,
    hub: UpdateHub,
    cache: Arc<PriceCache>,
    cache_writes: Arc<CacheWriteQueue>,
    cache_writer_started: AtomicBool,
    backfill: Arc<dyn BackfillPort>,
    alerts: Arc<dyn AlertCheckPort>,
    stream: Mutex<Option<Arc<StreamConnection>>>,
    feed_status: RwLock<FeedStatus>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PriceDistributionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceDistributionService")
            .field("desired_symbols", &self.registry.len())
            .field("tracked_prices", &self.last_prices.read().len())
            .field("feed_status", &*self.feed_status.read())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl PriceDistributionService {
    /// Create a service. No connection is opened until the first
    /// subscription or an explicit [`reconnect`](Self::reconnect).
    #[must_use]
    pub fn new(
        config: DistributionConfig,
        cache: PriceCache,
        backfill: Arc<dyn BackfillPort>,
        alerts: Arc<dyn AlertCheckPort>,
    ) -> Self {
        let hub = UpdateHub::new(config.broadcast);
        Self {
            config,
            registry: Arc::new(SubscriptionRegistry::new()),
            price_listeners: PriceListeners::new(),
            alert_listeners: AlertListeners::new(),
            connection_listeners: ConnectionListeners::new(),
            last_prices: RwLock::new(HashMap::new()),
            hub,
            cache: Arc::new(cache),
            cache_writes: Arc::new(CacheWriteQueue::new()),
            cache_writer_started: AtomicBool::new(false),
            backfill,
            alerts,
            stream: Mutex::new(None),
            feed_status: RwLock::new(FeedStatus::Disconnected),
            cancel: CancellationToken::new(),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Declare interest in `symbols`.
    ///
    /// Starts the stream on first use, records the symbols, and sends the
    /// new ones upstream if the stream is connected. Symbols without a
    /// last-known price are seeded from the cache, then from one awaited
    /// REST backfill for whatever the cache missed.
    pub async fn subscribe_to_symbols<S: AsRef<str> + Sync>(
        self: &Arc<Self>,
        symbols: &[S],
    ) -> SubscribeReport {
        let symbols = normalize_symbols(symbols);
        if symbols.is_empty() {
            return SubscribeReport::default();
        }

        let (stream, _) = self.ensure_stream();
        let changes = self.registry.add(&symbols);
        metrics::set_desired_symbols(self.registry.len());

        if !changes.added.is_empty() {
            tracing::info!(symbols = ?changes.added, "Subscribing");
            stream.subscribe(&changes.added);
        }

        let mut report = SubscribeReport {
            added: changes.added,
            ..SubscribeReport::default()
        };

        let mut misses = Vec::new();
        for symbol in symbols {
            if self.last_prices.read().contains_key(&symbol) {
                continue;
            }
            match self.cache.get(&symbol).await {
                Some(cached) => {
                    if self.seed_from_cache(cached) {
                        report.cached.push(symbol);
                    }
                }
                None => misses.push(symbol),
            }
        }

        if !misses.is_empty() {
            report.backfilled = self.run_backfill(&misses).await;
        }

        report
    }

    /// Withdraw interest in `symbols`.
    ///
    /// Returns the symbols that were actually removed. Listeners and
    /// last-known prices are left in place.
    pub fn unsubscribe_from_symbols<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Symbol> {
        let symbols = normalize_symbols(symbols);
        let changes = self.registry.remove(&symbols);
        metrics::set_desired_symbols(self.registry.len());

        if !changes.removed.is_empty() {
            tracing::info!(symbols = ?changes.removed, "Unsubscribing");
            if let Some(stream) = self.stream.lock().as_ref() {
                stream.unsubscribe(&changes.removed);
            }
        }
        changes.removed
    }

    /// Symbols currently desired, sorted.
    #[must_use]
    pub fn desired_symbols(&self) -> Vec<Symbol> {
        self.registry.desired_symbols()
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a callback for `symbol`.
    ///
    /// If a last-known price exists the callback runs once, synchronously,
    /// before this returns. Returns `None` for a blank symbol.
    pub fn on_price_update<F>(&self, symbol: &str, callback: F) -> Option<ListenerId>
    where
        F: Fn(&PriceUpdate) + Send + Sync + 'static,
    {
        let symbol = normalize_symbol(symbol)?;
        let callback: PriceCallback = Arc::new(callback);
        let id = self.price_listeners.add(&symbol, Arc::clone(&callback));
        metrics::set_price_listeners(self.price_listeners.len());

        let last = self.last_prices.read().get(&symbol).cloned();
        if let Some(last) = last {
            invoke("price", || callback(&last));
        }
        Some(id)
    }

    /// Remove exactly one price callback.
    ///
    /// The symbol stays subscribed upstream.
    pub fn off_price_update(&self, symbol: &str, id: ListenerId) -> bool {
        let Some(symbol) = normalize_symbol(symbol) else {
            return false;
        };
        let removed = self.price_listeners.remove(&symbol, id);
        metrics::set_price_listeners(self.price_listeners.len());
        removed
    }

    /// Register a callback for triggered alerts.
    pub fn on_alert<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&TriggeredAlert) + Send + Sync + 'static,
    {
        self.alert_listeners.add(Arc::new(callback))
    }

    /// Remove an alert callback.
    pub fn off_alert(&self, id: ListenerId) -> bool {
        self.alert_listeners.remove(id)
    }

    /// Register a callback for connect (`true`) and disconnect (`false`).
    pub fn on_connection_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.connection_listeners.add(Arc::new(callback))
    }

    /// Remove a connection callback.
    pub fn off_connection_change(&self, id: ListenerId) -> bool {
        self.connection_listeners.remove(id)
    }

    /// Receiver for every accepted price.
    #[must_use]
    pub fn price_updates(&self) -> broadcast::Receiver<PriceUpdate> {
        self.hub.prices_rx()
    }

    /// Receiver for every triggered alert.
    #[must_use]
    pub fn alerts(&self) -> broadcast::Receiver<TriggeredAlert> {
        self.hub.alerts_rx()
    }

    /// Receiver for feed status changes.
    #[must_use]
    pub fn feed_status_changes(&self) -> broadcast::Receiver<FeedStatus> {
        self.hub.feed_status_rx()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Last-known price for `symbol`.
    #[must_use]
    pub fn get_price(&self, symbol: &str) -> Option<PriceUpdate> {
        let symbol = normalize_symbol(symbol)?;
        self.last_prices.read().get(&symbol).cloned()
    }

    /// Every last-known price.
    #[must_use]
    pub fn get_all_prices(&self) -> HashMap<Symbol, PriceUpdate> {
        self.last_prices.read().clone()
    }

    /// Whether the stream is authenticated.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Stream connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.stream
            .lock()
            .as_ref()
            .map_or(ConnectionState::Disconnected, |s| s.state())
    }

    /// Feed status as last reported by the stream.
    #[must_use]
    pub fn feed_status(&self) -> FeedStatus {
        *self.feed_status.read()
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        let (connection_state, reconnect_attempts) = self
            .stream
            .lock()
            .as_ref()
            .map_or((ConnectionState::Disconnected, 0), |s| {
                (s.state(), s.reconnect_attempts())
            });

        ServiceStats {
            connection_state,
            feed_status: self.feed_status(),
            reconnect_attempts,
            desired_symbols: self.registry.len(),
            tracked_prices: self.last_prices.read().len(),
            price_listeners: self.price_listeners.len(),
            alert_listeners: self.alert_listeners.len(),
            connection_listeners: self.connection_listeners.len(),
            cache_backend: self.cache.backend_name(),
            broadcast: self.hub.stats(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the stream if it is not running, with a fresh attempt budget.
    ///
    /// This is the only way out of [`FeedStatus::Exhausted`]. Returns
    /// `false` if a connection loop was already active.
    pub fn reconnect(self: &Arc<Self>) -> bool {
        let (stream, created) = self.ensure_stream();
        if !created && !stream.connect() {
            return false;
        }

        tracing::info!("Stream reconnect requested");
        if self.feed_status().is_exhausted() {
            self.set_feed_status(FeedStatus::Disconnected);
        }
        true
    }

    /// Stop the stream for good.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down price distribution");
        self.cancel.cancel();
        if let Some(stream) = self.stream.lock().as_ref() {
            stream.shutdown();
        }
    }

    /// Get the stream, creating and starting it on first use.
    ///
    /// The flag is `true` when this call created it.
    fn ensure_stream(self: &Arc<Self>) -> (Arc<StreamConnection>, bool) {
        let mut slot = self.stream.lock();
        if let Some(stream) = slot.as_ref() {
            return (Arc::clone(stream), false);
        }

        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let subscriptions: Arc<dyn SubscriptionSource> = self.registry.clone();
        let stream = Arc::new(StreamConnection::new(
            self.config.stream.clone(),
            subscriptions,
            event_tx,
            self.cancel.child_token(),
        ));

        tokio::spawn(pump_events(Arc::downgrade(self), event_rx));
        stream.connect();

        *slot = Some(Arc::clone(&stream));
        (stream, true)
    }

    // =========================================================================
    // Update Handling
    // =========================================================================

    fn handle_stream_event(self: &Arc<Self>, event: StreamEvent) {
        match event {
            StreamEvent::Update(update) => self.accept_update(update),
            StreamEvent::ConnectionChanged(connected) => {
                tracing::info!(connected, "Stream connection changed");
                self.set_feed_status(if connected {
                    FeedStatus::Connected
                } else {
                    FeedStatus::Disconnected
                });
                for callback in self.connection_listeners.snapshot() {
                    invoke("connection", || callback(connected));
                }
            }
            StreamEvent::Subscribed { symbols } => {
                tracing::debug!(symbols, desired = self.registry.len(), "Subscription confirmed");
            }
            StreamEvent::ProviderError { code, message } => {
                tracing::debug!(code, %message, "Provider error surfaced");
            }
            StreamEvent::ReconnectsExhausted { attempts } => {
                tracing::error!(
                    attempts,
                    "Price feed unavailable; call reconnect() to try again"
                );
                self.set_feed_status(FeedStatus::Exhausted { attempts });
            }
        }
    }

    /// Record one update and deliver it to listeners and the alert check.
    ///
    /// Never waits on the cache or the alert endpoint.
    fn accept_update(self: &Arc<Self>, update: PriceUpdate) {
        self.record(&update, false);
        self.deliver(update);
    }

    /// Store `update` as the last-known price and queue its cache write.
    ///
    /// Both happen under the map's write lock so the cache sees writes for
    /// a symbol in the same order as the map. With `only_if_absent`, an
    /// existing entry wins and nothing is written.
    fn record(&self, update: &PriceUpdate, only_if_absent: bool) -> bool {
        {
            let mut last_prices = self.last_prices.write();
            if only_if_absent && last_prices.contains_key(&update.symbol) {
                return false;
            }
            last_prices.insert(update.symbol.clone(), update.clone());
            self.cache_writes.push(update.symbol.clone(), update.price);
        }
        self.ensure_cache_writer();
        true
    }

    fn deliver(self: &Arc<Self>, update: PriceUpdate) {
        let started = Instant::now();
        self.fan_out(&update);
        metrics::record_fanout_duration(started.elapsed());
        self.spawn_alert_check(update.symbol, update.price);
    }

    fn ensure_cache_writer(&self) {
        if self.cache_writer_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(Arc::clone(&self.cache_writes).run(
            Arc::clone(&self.cache),
            self.cancel.child_token(),
        ));
    }

    /// Seed the last-known map from a cache hit unless a fresher price
    /// arrived first. Not re-cached and not alert-checked.
    fn seed_from_cache(&self, cached: PriceUpdate) -> bool {
        {
            let mut last_prices = self.last_prices.write();
            if last_prices.contains_key(&cached.symbol) {
                return false;
            }
            last_prices.insert(cached.symbol.clone(), cached.clone());
        }

        metrics::record_update(PriceSource::Cache, UpdateKind::Cached);
        self.fan_out(&cached);
        true
    }

    async fn run_backfill(self: &Arc<Self>, symbols: &[Symbol]) -> Vec<Symbol> {
        let prices = match self.backfill.fetch_latest(symbols).await {
            Ok(prices) => {
                metrics::record_backfill(Outcome::Ok);
                prices
            }
            Err(e) => {
                metrics::record_backfill(Outcome::Error);
                tracing::warn!(symbols = ?symbols, error = %e, "Price backfill failed");
                return Vec::new();
            }
        };

        let mut seeded = Vec::new();
        for symbol in symbols {
            let Some(price) = prices.get(symbol).copied().flatten() else {
                tracing::debug!(%symbol, "No backfill price");
                continue;
            };
            if price <= Decimal::ZERO {
                continue;
            }

            let update = PriceUpdate::from_price(
                symbol.clone(),
                price,
                Utc::now(),
                PriceSource::RestBackfill,
            );
            if !self.record(&update, true) {
                tracing::debug!(%symbol, "Stream price arrived first, dropping backfill");
                continue;
            }
            metrics::record_update(PriceSource::RestBackfill, UpdateKind::Backfill);
            self.deliver(update);
            seeded.push(symbol.clone());
        }
        seeded
    }

    fn fan_out(&self, update: &PriceUpdate) {
        self.price_listeners.notify(update);
        let _ = self.hub.send_price(update.clone());
    }

    fn spawn_alert_check(self: &Arc<Self>, symbol: Symbol, price: Decimal) {
        let checker = Arc::clone(&self.alerts);
        let service = Arc::downgrade(self);

        tokio::spawn(async move {
            match checker.check(&symbol, price).await {
                Ok(triggered) => {
                    metrics::record_alert_check(Outcome::Ok, triggered.len());
                    let Some(service) = service.upgrade() else {
                        return;
                    };
                    for alert in triggered {
                        tracing::info!(id = %alert.id, ticker = %alert.ticker, "Alert triggered");
                        service.dispatch_alert(&alert);
                    }
                }
                Err(e) => {
                    metrics::record_alert_check(Outcome::Error, 0);
                    tracing::warn!(%symbol, error = %e, "Alert check failed");
                }
            }
        });
    }

    fn dispatch_alert(&self, alert: &TriggeredAlert) {
        for callback in self.alert_listeners.snapshot() {
            invoke("alert", || callback(alert));
        }
        let _ = self.hub.send_alert(alert.clone());
    }

    fn set_feed_status(&self, status: FeedStatus) {
        let previous = std::mem::replace(&mut *self.feed_status.write(), status);
        if previous != status {
            let _ = self.hub.send_feed_status(status);
        }
    }
}

impl Drop for PriceDistributionService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward stream events to the service until either side goes away.
async fn pump_events(
    service: Weak<PriceDistributionService>,
    mut events: mpsc::Receiver<StreamEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(service) = service.upgrade() else {
            break;
        };
        service.handle_stream_event(event);
    }
    tracing::debug!("Stream event pump stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::application::ports::{
        CacheError, CachedPrice, MockAlertCheckPort, MockBackfillPort, NoOpAlertChecker,
        NoOpBackfill, PriceStore,
    };
    use crate::application::services::DEFAULT_CACHE_TTL;
    use crate::infrastructure::alpaca::{Credentials, ReconnectConfig};
    use crate::infrastructure::cache::InMemoryPriceStore;

    fn config() -> DistributionConfig {
        // Port 1 refuses connections, so the stream fails fast and quietly.
        let mut stream = StreamConfig::new(
            "ws://127.0.0.1:1".to_string(),
            Credentials::new("key", "secret").unwrap(),
        );
        stream.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_attempts: 1,
            ..Default::default()
        };
        DistributionConfig::new(stream)
    }

    fn memory_cache() -> (Arc<dyn PriceStore>, PriceCache) {
        let store: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
        let cache = PriceCache::new(None, Arc::clone(&store), DEFAULT_CACHE_TTL);
        (store, cache)
    }

    fn service_with(
        backfill: Arc<dyn BackfillPort>,
        alerts: Arc<dyn AlertCheckPort>,
    ) -> Arc<PriceDistributionService> {
        let (_, cache) = memory_cache();
        Arc::new(PriceDistributionService::new(config(), cache, backfill, alerts))
    }

    fn service() -> Arc<PriceDistributionService> {
        service_with(Arc::new(NoOpBackfill), Arc::new(NoOpAlertChecker))
    }

    fn stream_update(symbol: &str, price: i64) -> PriceUpdate {
        PriceUpdate::from_price(
            symbol.to_string(),
            Decimal::from(price),
            Utc::now(),
            PriceSource::Stream,
        )
    }

    async fn cached_price(store: &Arc<dyn PriceStore>, symbol: &str) -> Option<Decimal> {
        for _ in 0..200 {
            if let Some(entry) = store.get(symbol).await.unwrap() {
                return Some(entry.price);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    /// Primary store whose writes take a while and then fail.
    struct SlowStore(Duration);

    #[async_trait::async_trait]
    impl PriceStore for SlowStore {
        async fn get(&self, _symbol: &str) -> Result<Option<CachedPrice>, CacheError> {
            Ok(None)
        }

        async fn set(
            &self,
            _symbol: &str,
            _entry: CachedPrice,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            tokio::time::sleep(self.0).await;
            Err(CacheError::Unavailable("timed out".to_string()))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    /// Backfill that sees a stream tick land while its request is in flight.
    #[derive(Default)]
    struct TickDuringFetch {
        service: std::sync::OnceLock<Weak<PriceDistributionService>>,
    }

    #[async_trait::async_trait]
    impl BackfillPort for TickDuringFetch {
        async fn fetch_latest(
            &self,
            symbols: &[Symbol],
        ) -> Result<HashMap<Symbol, Option<Decimal>>, crate::application::ports::BackfillError>
        {
            if let Some(service) = self.service.get().and_then(Weak::upgrade) {
                service.accept_update(stream_update("AAPL", 151));
            }
            Ok(symbols
                .iter()
                .map(|s| (s.clone(), Some(Decimal::from(150))))
                .collect())
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<PriceUpdate>>>, impl Fn(&PriceUpdate) + Send + Sync + 'static) {
        let seen: Arc<Mutex<Vec<PriceUpdate>>> = Arc::default();
        let sink = Arc::clone(&seen);
        (seen, move |u: &PriceUpdate| sink.lock().push(u.clone()))
    }

    #[tokio::test]
    async fn backfill_seeds_single_update() {
        let mut backfill = MockBackfillPort::new();
        backfill.expect_fetch_latest().times(1).returning(|symbols| {
            assert_eq!(symbols, ["AAPL".to_string()]);
            Ok(HashMap::from([("AAPL".to_string(), Some(Decimal::new(15_000, 2)))]))
        });
        let service = service_with(Arc::new(backfill), Arc::new(NoOpAlertChecker));

        let (seen, callback) = recorder();
        service.on_price_update("AAPL", callback).unwrap();

        let report = service.subscribe_to_symbols(&["aapl"]).await;
        assert_eq!(report.added, vec!["AAPL".to_string()]);
        assert_eq!(report.backfilled, vec!["AAPL".to_string()]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].price, Decimal::new(15_000, 2));
        assert_eq!(seen[0].source, PriceSource::RestBackfill);
    }

    #[tokio::test]
    async fn cache_hit_skips_backfill_and_alerts() {
        let mut backfill = MockBackfillPort::new();
        backfill.expect_fetch_latest().never();
        let mut alerts = MockAlertCheckPort::new();
        alerts.expect_check().never();

        let (_, cache) = memory_cache();
        cache.set("MSFT", Decimal::from(410)).await;
        let service = Arc::new(PriceDistributionService::new(
            config(),
            cache,
            Arc::new(backfill),
            Arc::new(alerts),
        ));

        let report = service.subscribe_to_symbols(&["MSFT"]).await;
        assert_eq!(report.cached, vec!["MSFT".to_string()]);
        let price = service.get_price("msft").unwrap();
        assert_eq!(price.price, Decimal::from(410));
        assert_eq!(price.source, PriceSource::Cache);

        // Give a stray alert task the chance to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn backfill_failure_is_swallowed() {
        let mut backfill = MockBackfillPort::new();
        backfill
            .expect_fetch_latest()
            .returning(|_| Err(crate::application::ports::BackfillError::Status { status: 503 }));
        let service = service_with(Arc::new(backfill), Arc::new(NoOpAlertChecker));

        let report = service.subscribe_to_symbols(&["AAPL"]).await;
        assert!(report.backfilled.is_empty());
        assert!(service.get_price("AAPL").is_none());
        assert_eq!(service.desired_symbols(), vec!["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn late_listener_is_seeded_synchronously() {
        let service = service();
        service.accept_update(stream_update("AAPL", 150));

        let (seen, callback) = recorder();
        service.on_price_update("AAPL", callback).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].price, Decimal::from(150));
    }

    #[tokio::test]
    async fn off_price_update_removes_exactly_one() {
        let service = service();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        let first_id = service
            .on_price_update("AAPL", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let counter = Arc::clone(&second);
        service
            .on_price_update("AAPL", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        service.subscribe_to_symbols(&["AAPL"]).await;
        assert!(service.off_price_update("AAPL", first_id));
        service.accept_update(stream_update("AAPL", 151));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(service.desired_symbols(), vec!["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn accepted_update_reaches_cache_broadcast_and_map() {
        let store: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
        let cache = PriceCache::new(None, Arc::clone(&store), DEFAULT_CACHE_TTL);
        let service = Arc::new(PriceDistributionService::new(
            config(),
            cache,
            Arc::new(NoOpBackfill),
            Arc::new(NoOpAlertChecker),
        ));
        let mut rx = service.price_updates();

        service.accept_update(stream_update("NVDA", 900));

        assert_eq!(rx.recv().await.unwrap().symbol, "NVDA");
        assert_eq!(service.get_all_prices().len(), 1);
        assert_eq!(cached_price(&store, "NVDA").await, Some(Decimal::from(900)));
    }

    #[tokio::test]
    async fn slow_cache_does_not_delay_delivery() {
        let cache = PriceCache::new(
            Some(Arc::new(SlowStore(Duration::from_millis(300)))),
            Arc::new(InMemoryPriceStore::new()),
            DEFAULT_CACHE_TTL,
        );
        let service = Arc::new(PriceDistributionService::new(
            config(),
            cache,
            Arc::new(NoOpBackfill),
            Arc::new(NoOpAlertChecker),
        ));
        let (seen, callback) = recorder();
        service.on_price_update("AAPL", callback).unwrap();

        let started = Instant::now();
        for price in 150..155 {
            service.handle_stream_event(StreamEvent::Update(stream_update("AAPL", price)));
        }

        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(seen.lock().len(), 5);
        assert_eq!(service.get_price("AAPL").unwrap().price, Decimal::from(154));
    }

    #[tokio::test]
    async fn backfill_never_replaces_a_stream_price() {
        let store: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
        let cache = PriceCache::new(None, Arc::clone(&store), DEFAULT_CACHE_TTL);
        let backfill = Arc::new(TickDuringFetch::default());
        let service = Arc::new(PriceDistributionService::new(
            config(),
            cache,
            Arc::clone(&backfill) as Arc<dyn BackfillPort>,
            Arc::new(NoOpAlertChecker),
        ));
        backfill.service.set(Arc::downgrade(&service)).unwrap();
        let (seen, callback) = recorder();
        service.on_price_update("AAPL", callback).unwrap();

        let report = service.subscribe_to_symbols(&["AAPL"]).await;

        assert!(report.backfilled.is_empty());
        let price = service.get_price("AAPL").unwrap();
        assert_eq!(price.price, Decimal::from(151));
        assert_eq!(price.source, PriceSource::Stream);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(cached_price(&store, "AAPL").await, Some(Decimal::from(151)));
    }

    #[tokio::test]
    async fn alerts_fan_out_to_listeners_and_channel() {
        let mut alerts = MockAlertCheckPort::new();
        alerts.expect_check().returning(|symbol, price| {
            Ok(vec![TriggeredAlert {
                id: "a1".to_string(),
                ticker: symbol.to_string(),
                catalyst_id: "c1".to_string(),
                catalyst_title: None,
                before_price: Decimal::from(100),
                after_price: Decimal::from(110),
                current_price: price,
                tolerance: Decimal::new(5, 1),
                min_move: Decimal::ONE,
            }])
        });
        let service = service_with(Arc::new(NoOpBackfill), Arc::new(alerts));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        service.on_alert(move |alert| {
            assert_eq!(alert.ticker, "AMD");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut rx = service.alerts();

        service.accept_update(stream_update("AMD", 111));

        let alert = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.current_price, Decimal::from(111));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn alert_check_failure_does_not_block_delivery() {
        let mut alerts = MockAlertCheckPort::new();
        alerts.expect_check().returning(|_, _| {
            Err(crate::application::ports::AlertCheckError::Request(
                "timeout".to_string(),
            ))
        });
        let service = service_with(Arc::new(NoOpBackfill), Arc::new(alerts));
        let (seen, callback) = recorder();
        service.on_price_update("AAPL", callback).unwrap();

        service.accept_update(stream_update("AAPL", 150));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_stream_reports_and_recovers_on_reconnect() {
        let service = service();
        let mut status = service.feed_status_changes();

        service.subscribe_to_symbols(&["AAPL"]).await;
        let change = tokio::time::timeout(Duration::from_secs(5), status.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, FeedStatus::Exhausted { attempts: 1 });
        assert!(service.feed_status().is_exhausted());
        assert!(!service.is_connected());

        assert!(service.reconnect());
        assert_eq!(service.feed_status(), FeedStatus::Disconnected);
    }

    #[tokio::test]
    async fn unsubscribe_reports_only_present_symbols() {
        let service = service();
        service.subscribe_to_symbols(&["AAPL", "MSFT"]).await;

        let removed = service.unsubscribe_from_symbols(&["msft", "TSLA"]);
        assert_eq!(removed, vec!["MSFT".to_string()]);
        assert_eq!(service.desired_symbols(), vec!["AAPL".to_string()]);
    }

    #[test]
    fn blank_symbol_listener_is_rejected() {
        let service = service();
        assert!(service.on_price_update("  ", |_| {}).is_none());
        assert!(service.get_price("").is_none());
    }
}
