//! Price Types
//!
//! Canonical price update, connection state, and feed status types.
//! A [`PriceUpdate`] is immutable once built: it is written to the cache
//! and fanned out, never queued for replay.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbols
// =============================================================================

/// An exchange ticker, always upper-case.
pub type Symbol = String;

/// Normalize a raw ticker: trim whitespace and upper-case it.
///
/// Returns `None` for empty input.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<Symbol> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_uppercase())
    }
}

/// Normalize a batch of tickers, dropping empties and duplicates while
/// preserving first-seen order.
#[must_use]
pub fn normalize_symbols<S: AsRef<str>>(raw: &[S]) -> Vec<Symbol> {
    let mut out: Vec<Symbol> = Vec::with_capacity(raw.len());
    for symbol in raw.iter().filter_map(|s| normalize_symbol(s.as_ref())) {
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

// =============================================================================
// Price Update
// =============================================================================

/// Where a price update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    /// Live quote or trade frame from the streaming connection.
    Stream,
    /// One-shot REST lookup made when a symbol is first subscribed.
    RestBackfill,
    /// Read back from the price cache.
    Cache,
}

impl PriceSource {
    /// Stable label used in logs, metrics, and JSON.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::RestBackfill => "rest-backfill",
            Self::Cache => "cache",
        }
    }
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed price for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Exchange ticker.
    pub symbol: Symbol,
    /// Last price (always positive).
    pub price: Decimal,
    /// Best bid, zero when not applicable.
    pub bid: Decimal,
    /// Best ask, zero when not applicable.
    pub ask: Decimal,
    /// Time the price was observed.
    pub timestamp: DateTime<Utc>,
    /// Trade size as reported, including fractional odd lots. Only set for trades.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    /// Origin of the update.
    pub source: PriceSource,
}

impl PriceUpdate {
    /// Build an update carrying only a price (bid and ask zero).
    #[must_use]
    pub const fn from_price(
        symbol: Symbol,
        price: Decimal,
        timestamp: DateTime<Utc>,
        source: PriceSource,
    ) -> Self {
        Self {
            symbol,
            price,
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
            timestamp,
            volume: None,
            source,
        }
    }

    /// Same update relabelled with a different source.
    #[must_use]
    pub fn with_source(mut self, source: PriceSource) -> Self {
        self.source = source;
        self
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Streaming connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket is being opened.
    Connecting,
    /// Socket open, waiting for the auth acknowledgement.
    Authenticating,
    /// Authenticated and streaming.
    Connected,
}

impl ConnectionState {
    /// Whether subscribe/unsubscribe commands can be sent right now.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a drop from this state is reported to connection listeners.
    #[must_use]
    pub const fn is_session(self) -> bool {
        matches!(self, Self::Authenticating | Self::Connected)
    }

    /// Numeric value exported as a gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Authenticating => 2.0,
            Self::Connected => 3.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Feed Status
// =============================================================================

/// Externally visible feed health.
///
/// `Exhausted` is terminal until an explicit reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FeedStatus {
    /// Authenticated and streaming.
    Connected,
    /// Not connected; a (re)connect may be in progress.
    #[default]
    Disconnected,
    /// Reconnect attempts ran out.
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl FeedStatus {
    /// Whether the feed gave up reconnecting.
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
