//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, last-known price
//! reads, and Prometheus metrics. Used by container orchestrators, load
//! balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (stream connected)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /prices` - Every last-known price
//! - `GET /prices/{symbol}` - One last-known price, or 404

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{PriceDistributionService, ServiceStats};
use crate::domain::price::{ConnectionState, FeedStatus, PriceUpdate, Symbol};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream status.
    pub feed: FeedInfo,
    /// Subscription and listener statistics.
    pub subscriptions: SubscriptionStatus,
    /// Store consulted first by the price cache.
    pub cache_backend: &'static str,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected.
    Healthy,
    /// Stream connecting or reconnecting.
    Degraded,
    /// Stream gave up reconnecting.
    Unhealthy,
}

/// Stream status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: String,
    /// Whether the stream is authenticated.
    pub connected: bool,
    /// Feed status as last reported by the stream.
    pub status: FeedStatus,
    /// Reconnect attempts since the last authentication.
    pub reconnect_attempts: u32,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
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
    /// Total broadcast receivers.
    pub broadcast_receivers: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    service: Arc<PriceDistributionService>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, service: Arc<PriceDistributionService>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            service,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding a socket.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .route("/prices", get(prices_handler))
            .route("/prices/{symbol}", get(price_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.service.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn prices_handler(
    State(state): State<Arc<HealthServerState>>,
) -> Json<HashMap<Symbol, PriceUpdate>> {
    Json(state.service.get_all_prices())
}

async fn price_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.service.get_price(&symbol) {
        Some(price) => (StatusCode::OK, Json(price)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no price for {symbol}"),
            }),
        )
            .into_response(),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stats = state.service.stats();

    HealthResponse {
        status: determine_health_status(&stats),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: FeedInfo {
            state: stats.connection_state.to_string(),
            connected: stats.connection_state.is_connected(),
            status: stats.feed_status,
            reconnect_attempts: stats.reconnect_attempts,
        },
        subscriptions: SubscriptionStatus {
            desired_symbols: stats.desired_symbols,
            tracked_prices: stats.tracked_prices,
            price_listeners: stats.price_listeners,
            alert_listeners: stats.alert_listeners,
            connection_listeners: stats.connection_listeners,
            broadcast_receivers: stats.broadcast.total_receivers(),
        },
        cache_backend: stats.cache_backend,
    }
}

const fn determine_health_status(stats: &ServiceStats) -> HealthStatus {
    if stats.feed_status.is_exhausted() {
        return HealthStatus::Unhealthy;
    }
    match stats.connection_state {
        ConnectionState::Connected => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
