//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceStore`: Key/value price storage with TTL (external or in-process)
//! - `BackfillPort`: One-shot REST lookup of latest prices
//! - `AlertCheckPort`: Alert-matching endpoint

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::alert::TriggeredAlert;
use crate::domain::price::Symbol;

// =============================================================================
// Price Store
// =============================================================================

/// A cached price and the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPrice {
    /// Cached price.
    pub price: Decimal,
    /// When the price was written.
    pub timestamp: DateTime<Utc>,
}

impl CachedPrice {
    /// Whether the entry is older than `ttl` at `now`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        now.signed_duration_since(self.timestamp) > ttl
    }
}

/// Price store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The store could not be reached or rejected the request.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but the stored value could not be decoded.
    #[error("cache entry corrupt: {0}")]
    Corrupt(String),
}

/// Key/value store for the latest price per symbol.
///
/// `Ok(None)` is a miss. `Err` means the store itself failed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Read the entry for a symbol.
    async fn get(&self, symbol: &str) -> Result<Option<CachedPrice>, CacheError>;

    /// Replace the entry for a symbol, expiring it after `ttl`.
    async fn set(&self, symbol: &str, entry: CachedPrice, ttl: Duration)
    -> Result<(), CacheError>;

    /// Backend label for logs and metrics.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Backfill
// =============================================================================

/// Backfill errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackfillError {
    /// Request could not be sent or timed out.
    #[error("backfill request failed: {0}")]
    Request(String),

    /// Endpoint answered with a non-success status.
    #[error("backfill endpoint returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body was not the expected shape.
    #[error("backfill response invalid: {0}")]
    Decode(String),
}

/// One-shot lookup of the latest price for symbols with no cached value.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackfillPort: Send + Sync {
    /// Fetch latest prices. Symbols the endpoint knows nothing about map to
    /// `None` or are absent.
    async fn fetch_latest(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, Option<Decimal>>, BackfillError>;
}

/// Backfill that never returns prices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpBackfill;

#[async_trait]
impl BackfillPort for NoOpBackfill {
    async fn fetch_latest(
        &self,
        _symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, Option<Decimal>>, BackfillError> {
        Ok(HashMap::new())
    }
}

// =============================================================================
// Alert Check
// =============================================================================

/// Alert check errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AlertCheckError {
    /// Request could not be sent or timed out.
    #[error("alert check request failed: {0}")]
    Request(String),

    /// Endpoint answered with a non-success status.
    #[error("alert check returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body was not the expected shape.
    #[error("alert check response invalid: {0}")]
    Decode(String),
}

/// Matches a fresh price against stored alert thresholds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertCheckPort: Send + Sync {
    /// Return the alerts triggered by `price` for `symbol`.
    async fn check(
        &self,
        symbol: &str,
        price: Decimal,
    ) -> Result<Vec<TriggeredAlert>, AlertCheckError>;
}

/// Alert checker used when no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAlertChecker;

#[async_trait]
impl AlertCheckPort for NoOpAlertChecker {
    async fn check(
        &self,
        _symbol: &str,
        _price: Decimal,
    ) -> Result<Vec<TriggeredAlert>, AlertCheckError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_price_expiry() {
        let now = Utc::now();
        let entry = CachedPrice {
            price: Decimal::from(100),
            timestamp: now - chrono::Duration::seconds(6),
        };
        assert!(entry.is_expired(Duration::from_secs(5), now));
        assert!(!entry.is_expired(Duration::from_secs(10), now));
    }

    #[test]
    fn cached_price_at_boundary_is_fresh() {
        let now = Utc::now();
        let entry = CachedPrice {
            price: Decimal::ONE,
            timestamp: now - chrono::Duration::seconds(5),
        };
        assert!(!entry.is_expired(Duration::from_secs(5), now));
    }

    #[tokio::test]
    async fn noop_adapters_return_nothing() {
        let prices = NoOpBackfill
            .fetch_latest(&["AAPL".to_string()])
            .await
            .unwrap();
        assert!(prices.is_empty());

        let alerts = NoOpAlertChecker.check("AAPL", Decimal::ONE).await.unwrap();
        assert!(alerts.is_empty());
    }
}
