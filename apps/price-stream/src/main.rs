//! Price Stream Binary
//!
//! Starts the real-time price distribution service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_KEY`: Alpaca API key
//! - `ALPACA_SECRET`: Alpaca API secret
//!
//! ## Optional
//! - `ALPACA_REALTIME`: "true" for the SIP feed, otherwise IEX (default: false)
//! - `ALPACA_STREAM_URL`: Stream URL override
//! - `ALPACA_DATA_URL`: REST data API base (default: <https://data.alpaca.markets>)
//! - `UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN`: Shared price cache
//! - `PRICE_CACHE_TTL_SECS`: Cache TTL (default: 5)
//! - `PRICE_BACKFILL_URL`: Generic backfill endpoint (default: Alpaca latest trades)
//! - `ALERT_CHECK_URL` / `ALERT_CHECK_TOKEN`: Alert-matching endpoint
//! - `PRICE_STREAM_RECONNECT_BASE_MS`: Base reconnect delay (default: 1000)
//! - `PRICE_STREAM_MAX_RECONNECT_ATTEMPTS`: Reconnect attempts (default: 5)
//! - `PRICE_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `PRICE_STREAM_SYMBOLS`: Comma-separated symbols to subscribe at startup
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream::application::ports::{AlertCheckPort, BackfillPort, NoOpAlertChecker, PriceStore};
use price_stream::application::services::DEFAULT_EVENT_BUFFER;
use price_stream::infrastructure::alerts::HttpAlertChecker;
use price_stream::infrastructure::alpaca::{AlpacaLatestTradeBackfill, StreamConfig};
use price_stream::infrastructure::backfill::HttpBackfillClient;
use price_stream::infrastructure::cache::{InMemoryPriceStore, UpstashPriceStore};
use price_stream::infrastructure::telemetry;
use price_stream::{
    BroadcastConfig, DistributionConfig, HealthServer, HealthServerState, PriceCache,
    PriceDistributionService, ServiceConfig, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How often expired in-process cache entries are purged.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ServiceConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Price cache: Upstash when configured, in-process store always
    let memory = Arc::new(InMemoryPriceStore::new());
    let primary: Option<Arc<dyn PriceStore>> = match config.cache.upstash() {
        Some((url, token)) => Some(Arc::new(
            UpstashPriceStore::new(url, token, config.server.http_timeout)
                .context("building Upstash client")?,
        )),
        None => {
            tracing::info!("No external cache configured, using in-process store only");
            None
        }
    };
    let fallback: Arc<dyn PriceStore> = Arc::clone(&memory) as Arc<dyn PriceStore>;
    let cache = PriceCache::new(primary, fallback, config.cache.ttl);

    // Backfill: generic endpoint if configured, else Alpaca latest trades
    let backfill: Arc<dyn BackfillPort> = match &config.backfill.url {
        Some(url) => Arc::new(
            HttpBackfillClient::new(url.clone(), config.server.http_timeout)
                .context("building backfill client")?,
        ),
        None => Arc::new(
            AlpacaLatestTradeBackfill::new(
                config.credentials.clone(),
                config.backfill.data_url.clone(),
                config.stream.feed.as_str(),
                config.server.http_timeout,
            )
            .context("building Alpaca backfill client")?,
        ),
    };

    // Alert side-channel
    let alerts: Arc<dyn AlertCheckPort> = match &config.alerts.url {
        Some(url) => {
            if config.alerts.token.is_none() {
                tracing::warn!("ALERT_CHECK_URL set without ALERT_CHECK_TOKEN");
            }
            Arc::new(
                HttpAlertChecker::new(
                    url.clone(),
                    config.alerts.token.clone().unwrap_or_default(),
                    config.server.http_timeout,
                )
                .context("building alert client")?,
            )
        }
        None => {
            tracing::info!("Alert checks disabled");
            Arc::new(NoOpAlertChecker)
        }
    };

    let distribution_config = DistributionConfig {
        stream: StreamConfig::from_settings(&config.stream, config.credentials.clone()),
        broadcast: BroadcastConfig::from(config.broadcast),
        event_buffer: DEFAULT_EVENT_BUFFER,
    };
    let service = Arc::new(PriceDistributionService::new(
        distribution_config,
        cache,
        backfill,
        alerts,
    ));

    service.on_connection_change(|connected| {
        if connected {
            tracing::info!("Price feed connected");
        } else {
            tracing::warn!("Price feed disconnected");
        }
    });
    service.on_alert(|alert| {
        tracing::info!(
            id = %alert.id,
            ticker = %alert.ticker,
            current_price = %alert.current_price,
            "Alert"
        );
    });

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Purge expired in-process cache entries
    let purge_token = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = purge_token.cancelled() => break,
                _ = interval.tick() => {
                    let purged = memory.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired cache entries");
                    }
                }
            }
        }
    });

    if !config.startup_symbols.is_empty() {
        for symbol in &config.startup_symbols {
            service.on_price_update(symbol, |update| {
                tracing::debug!(
                    symbol = %update.symbol,
                    price = %update.price,
                    source = %update.source,
                    "Price"
                );
            });
        }
        let report = service
            .subscribe_to_symbols(config.startup_symbols.as_slice())
            .await;
        tracing::info!(
            added = report.added.len(),
            cached = report.cached.len(),
            backfilled = report.backfilled.len(),
            "Startup subscriptions registered"
        );
    }

    tracing::info!("Price stream ready");

    await_shutdown(shutdown_token).await;
    service.shutdown();

    tracing::info!("Price stream stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        feed = config.stream.feed.as_str(),
        external_cache = config.cache.upstash().is_some(),
        cache_ttl_secs = config.cache.ttl.as_secs(),
        generic_backfill = config.backfill.url.is_some(),
        alerts = config.alerts.url.is_some(),
        health_port = config.server.health_port,
        startup_symbols = config.startup_symbols.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.stream.url,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        reconnect_base_ms = config.stream.reconnect_base_delay.as_millis(),
        "Stream settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
