//! Alpaca WebSocket Message Types
//!
//! Wire format types for the Alpaca stock market-data stream.
//!
//! # Message Types
//!
//! ## Control Messages
//! - `Success`: Connection or authentication acknowledgement
//! - `Error`: Error response with code and message
//! - `Subscription`: Subscription confirmation
//!
//! ## Market Data
//! - `Quote` (`"T":"q"`): Best bid/offer, optionally with the last trade price
//! - `Trade` (`"T":"t"`): Executed trade
//!
//! Inbound market-data types are lenient: only the discriminator and the
//! symbol are required, everything else falls back to a default so a sparse
//! frame still yields an update when it carries a usable price.
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::price::{PriceSource, PriceUpdate, normalize_symbol};

// =============================================================================
// Control Messages
// =============================================================================

/// Success message indicating connection or authentication succeeded.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Success message: "connected" or "authenticated"
    pub msg: SuccessKind,
}

/// Kind of success message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Socket accepted
    Connected,
    /// Authentication successful
    Authenticated,
    /// Anything else the server acknowledges
    #[serde(other)]
    Other,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 402, "msg": "auth failed"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    #[serde(default)]
    pub code: i32,

    /// Error message
    #[serde(default)]
    pub msg: String,
}

/// Subscription confirmation message.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "subscription", "trades": ["AAPL"], "quotes": ["AMD", "CLDR"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Subscribed trade symbols
    #[serde(default)]
    pub trades: Vec<String>,

    /// Subscribed quote symbols
    #[serde(default)]
    pub quotes: Vec<String>,
}

impl SubscriptionMessage {
    /// Distinct symbols confirmed across quotes and trades.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        let mut all: Vec<&str> = self
            .quotes
            .iter()
            .chain(self.trades.iter())
            .map(String::as_str)
            .collect();
        all.sort_unstable();
        all.dedup();
        all.len()
    }
}

// =============================================================================
// Market Data Messages
// =============================================================================

/// Real-time stock quote.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "q",
///   "S": "AMD",
///   "bp": 87.66,
///   "bs": 1,
///   "ap": 87.68,
///   "as": 4,
///   "p": 87.67,
///   "t": "2021-02-22T15:51:45.335689322Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuoteMessage {
    /// Ticker symbol (e.g., "AAPL")
    #[serde(rename = "S")]
    pub symbol: String,

    /// Bid price
    #[serde(rename = "bp", default)]
    pub bid_price: Decimal,

    /// Bid size (round lots)
    #[serde(rename = "bs", default)]
    pub bid_size: u32,

    /// Ask price
    #[serde(rename = "ap", default)]
    pub ask_price: Decimal,

    /// Ask size (round lots)
    #[serde(rename = "as", default)]
    pub ask_size: u32,

    /// Last trade price, when the feed attaches one
    #[serde(rename = "p", default)]
    pub last_price: Option<Decimal>,

    /// Quote timestamp (RFC-3339 with nanosecond precision)
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StockQuoteMessage {
    /// Convert to a price update.
    ///
    /// The price is the last trade price on the frame, falling back to the
    /// ask. Returns `None` when neither is positive.
    #[must_use]
    pub fn to_price_update(&self) -> Option<PriceUpdate> {
        let symbol = normalize_symbol(&self.symbol)?;
        let price = self
            .last_price
            .filter(|p| is_positive(*p))
            .or_else(|| Some(self.ask_price).filter(|p| is_positive(*p)))?;

        Some(PriceUpdate {
            symbol,
            price,
            bid: self.bid_price.max(Decimal::ZERO),
            ask: self.ask_price.max(Decimal::ZERO),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            volume: None,
            source: PriceSource::Stream,
        })
    }
}

/// Real-time stock trade.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "t",
///   "i": 96921,
///   "S": "AAPL",
///   "x": "D",
///   "p": 126.55,
///   "s": 1,
///   "t": "2021-02-22T15:51:44.208Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTradeMessage {
    /// Ticker symbol (e.g., "AAPL")
    #[serde(rename = "S")]
    pub symbol: String,

    /// Trade ID (unique per exchange per day)
    #[serde(rename = "i", default)]
    pub trade_id: Option<i64>,

    /// Exchange code where trade executed
    #[serde(rename = "x", default)]
    pub exchange: Option<String>,

    /// Trade price
    #[serde(rename = "p", default)]
    pub price: Decimal,

    /// Trade size (shares, fractional for odd lots)
    #[serde(rename = "s", default)]
    pub size: Option<Decimal>,

    /// Trade timestamp (RFC-3339 with nanosecond precision)
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StockTradeMessage {
    /// Convert to a price update with zero bid/ask.
    ///
    /// Returns `None` when the price is not positive.
    #[must_use]
    pub fn to_price_update(&self) -> Option<PriceUpdate> {
        let symbol = normalize_symbol(&self.symbol)?;
        if !is_positive(self.price) {
            return None;
        }

        Some(PriceUpdate {
            symbol,
            price: self.price,
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            volume: self.size.filter(|s| is_positive(*s)),
            source: PriceSource::Stream,
        })
    }
}

fn is_positive(value: Decimal) -> bool {
    value > Decimal::ZERO
}

// =============================================================================
// Outbound Messages (Client -> Server)
// =============================================================================

/// Authentication request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    /// Action: "auth"
    pub action: &'static str,

    /// API key
    pub key: String,

    /// API secret
    pub secret: String,
}

impl AuthRequest {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: String, secret: String) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// Subscribe or unsubscribe request covering quotes and trades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Action: "subscribe" or "unsubscribe"
    pub action: &'static str,

    /// Trade symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<String>,

    /// Quote symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<String>,
}

impl SubscriptionRequest {
    /// Subscribe to quotes and trades for `symbols`.
    #[must_use]
    pub fn subscribe(symbols: &[String]) -> Self {
        Self {
            action: "subscribe",
            trades: symbols.to_vec(),
            quotes: symbols.to_vec(),
        }
    }

    /// Unsubscribe from quotes and trades for `symbols`.
    #[must_use]
    pub fn unsubscribe(symbols: &[String]) -> Self {
        Self {
            action: "unsubscribe",
            trades: symbols.to_vec(),
            quotes: symbols.to_vec(),
        }
    }
}

// =============================================================================
// Decoded Message
// =============================================================================

/// One decoded inbound message, classified by its `T` discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlpacaMessage {
    /// Connection/authentication success
    Success(SuccessMessage),

    /// Error message
    Error(ErrorMessage),

    /// Subscription confirmation
    Subscription(SubscriptionMessage),

    /// Stock quote
    Quote(StockQuoteMessage),

    /// Stock trade
    Trade(StockTradeMessage),
}
