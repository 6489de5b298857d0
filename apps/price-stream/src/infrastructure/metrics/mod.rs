//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Updates**: Price updates accepted, by source and kind
//! - **Stream**: Connection state, reconnects, dropped frames
//! - **Cache**: Fallbacks from the external store to the in-process store
//! - **Alerts**: Alert checks and triggered alerts
//! - **Fan-out**: Listener counts and delivery latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::price::{ConnectionState, PriceSource};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the existing handle.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_stream_updates_total",
        "Price updates accepted, by source and kind"
    );
    describe_counter!(
        "price_stream_frames_dropped_total",
        "Inbound stream frames or frame elements dropped, by reason"
    );
    describe_counter!(
        "price_stream_reconnects_total",
        "Stream reconnection attempts"
    );
    describe_counter!(
        "price_stream_provider_errors_total",
        "Error frames received from the provider"
    );
    describe_counter!(
        "price_stream_cache_fallbacks_total",
        "Cache operations served by the in-process store after a primary failure"
    );
    describe_counter!(
        "price_stream_alert_checks_total",
        "Alert check calls, by outcome"
    );
    describe_counter!(
        "price_stream_alerts_triggered_total",
        "Alerts returned by the alert check"
    );
    describe_counter!(
        "price_stream_backfill_requests_total",
        "Backfill requests, by outcome"
    );

    describe_gauge!(
        "price_stream_connection_state",
        "Stream state: 0 disconnected, 1 connecting, 2 authenticating, 3 connected"
    );
    describe_gauge!(
        "price_stream_desired_symbols",
        "Symbols in the subscription registry"
    );
    describe_gauge!(
        "price_stream_confirmed_symbols",
        "Symbols confirmed by the provider's last subscription frame"
    );
    describe_gauge!(
        "price_stream_price_listeners",
        "Registered per-symbol price callbacks"
    );

    describe_histogram!(
        "price_stream_fanout_seconds",
        "Time to deliver one update to its callbacks and broadcast channel"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for update kinds.
#[derive(Debug, Clone, Copy)]
pub enum UpdateKind {
    /// Quote frame.
    Quote,
    /// Trade frame.
    Trade,
    /// REST lookup.
    Backfill,
    /// Cache hit on subscribe.
    Cached,
}

impl UpdateKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Trade => "trade",
            Self::Backfill => "backfill",
            Self::Cached => "cached",
        }
    }
}

/// Metric labels for cache operations.
#[derive(Debug, Clone, Copy)]
pub enum CacheOp {
    /// Read.
    Get,
    /// Write.
    Set,
}

impl CacheOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
        }
    }
}

/// Metric labels for request outcomes.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    /// Call succeeded.
    Ok,
    /// Call failed.
    Error,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Record an accepted price update.
pub fn record_update(source: PriceSource, kind: UpdateKind) {
    counter!(
        "price_stream_updates_total",
        "source" => source.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a dropped frame or frame element.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("price_stream_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("price_stream_reconnects_total").increment(1);
}

/// Record a provider error frame.
pub fn record_provider_error(code: i32) {
    counter!("price_stream_provider_errors_total", "code" => code.to_string()).increment(1);
}

/// Record a cache fallback.
pub fn record_cache_fallback(op: CacheOp) {
    counter!("price_stream_cache_fallbacks_total", "op" => op.as_str()).increment(1);
}

/// Record an alert check and the number of alerts it returned.
pub fn record_alert_check(outcome: Outcome, triggered: usize) {
    counter!("price_stream_alert_checks_total", "outcome" => outcome.as_str()).increment(1);
    if triggered > 0 {
        counter!("price_stream_alerts_triggered_total")
            .increment(u64::try_from(triggered).unwrap_or(u64::MAX));
    }
}

/// Record a backfill request.
pub fn record_backfill(outcome: Outcome) {
    counter!("price_stream_backfill_requests_total", "outcome" => outcome.as_str()).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_stream_connection_state").set(state.as_gauge());
}

/// Update the desired symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_desired_symbols(count: usize) {
    gauge!("price_stream_desired_symbols").set(count as f64);
}

/// Update the confirmed symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_confirmed_symbols(count: usize) {
    gauge!("price_stream_confirmed_symbols").set(count as f64);
}

/// Update the price listener gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_price_listeners(count: usize) {
    gauge!("price_stream_price_listeners").set(count as f64);
}

/// Record fan-out duration for one update.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("price_stream_fanout_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_strings() {
        assert_eq!(UpdateKind::Quote.as_str(), "quote");
        assert_eq!(UpdateKind::Trade.as_str(), "trade");
        assert_eq!(UpdateKind::Backfill.as_str(), "backfill");
        assert_eq!(UpdateKind::Cached.as_str(), "cached");
        assert_eq!(CacheOp::Get.as_str(), "get");
        assert_eq!(CacheOp::Set.as_str(), "set");
        assert_eq!(Outcome::Ok.as_str(), "ok");
        assert_eq!(Outcome::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_update(PriceSource::Stream, UpdateKind::Quote);
        record_frame_dropped("malformed");
        record_alert_check(Outcome::Ok, 2);
        set_connection_state(ConnectionState::Connected);
        record_fanout_duration(Duration::from_micros(40));
    }
}
