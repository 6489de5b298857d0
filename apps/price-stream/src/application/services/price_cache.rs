//! Price Cache
//!
//! Read-through/write-through cache of the latest price per symbol with a
//! short TTL. One primary store (normally external) and one in-process
//! fallback. Only store-level failures divert to the fallback; a miss on
//! the primary is a miss.
//!
//! Writes from the update path go through [`CacheWriteQueue`], which keeps
//! only the latest pending price per symbol and is drained by one task, so
//! a slow store never holds up delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CacheError, CachedPrice, PriceStore};
use crate::domain::price::{PriceSource, PriceUpdate, Symbol};
use crate::infrastructure::metrics::{self, CacheOp};

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Dual-backend price cache.
pub struct PriceCache {
    primary: Option<Arc<dyn PriceStore>>,
    fallback: Arc<dyn PriceStore>,
    ttl: Duration,
}

impl std::fmt::Debug for PriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCache")
            .field("primary", &self.primary.as_ref().map(|s| s.name()))
            .field("fallback", &self.fallback.name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl PriceCache {
    /// Create a cache. With no primary every operation uses the fallback.
    #[must_use]
    pub fn new(
        primary: Option<Arc<dyn PriceStore>>,
        fallback: Arc<dyn PriceStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            ttl,
        }
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Name of the store consulted first.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.primary
            .as_ref()
            .map_or_else(|| self.fallback.name(), |primary| primary.name())
    }

    /// Read the cached price for `symbol`.
    ///
    /// Returns `None` on a miss, on an entry older than the TTL, and when
    /// both stores fail. Never returns an error.
    pub async fn get(&self, symbol: &str) -> Option<PriceUpdate> {
        let entry = match &self.primary {
            Some(primary) => match primary.get(symbol).await {
                Ok(entry) => entry,
                Err(CacheError::Corrupt(detail)) => {
                    tracing::warn!(symbol, store = primary.name(), %detail, "Ignoring corrupt cache entry");
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        symbol,
                        store = primary.name(),
                        error = %e,
                        "Primary cache read failed, using in-process store"
                    );
                    metrics::record_cache_fallback(CacheOp::Get);
                    self.read_fallback(symbol).await
                }
            },
            None => self.read_fallback(symbol).await,
        }?;

        if entry.is_expired(self.ttl, Utc::now()) {
            tracing::trace!(symbol, "Cache entry expired");
            return None;
        }

        Some(PriceUpdate::from_price(
            symbol.to_string(),
            entry.price,
            entry.timestamp,
            PriceSource::Cache,
        ))
    }

    /// Write `price` for `symbol`, stamped with the current time.
    ///
    /// Writes the primary, or the fallback only if the primary fails.
    /// Returns the name of the store that took the write, or `None` if
    /// neither did.
    pub async fn set(&self, symbol: &str, price: Decimal) -> Option<&'static str> {
        let entry = CachedPrice {
            price,
            timestamp: Utc::now(),
        };

        if let Some(primary) = &self.primary {
            match primary.set(symbol, entry, self.ttl).await {
                Ok(()) => return Some(primary.name()),
                Err(e) => {
                    tracing::warn!(
                        symbol,
                        store = primary.name(),
                        error = %e,
                        "Primary cache write failed, using in-process store"
                    );
                    metrics::record_cache_fallback(CacheOp::Set);
                }
            }
        }

        match self.fallback.set(symbol, entry, self.ttl).await {
            Ok(()) => Some(self.fallback.name()),
            Err(e) => {
                tracing::error!(symbol, store = self.fallback.name(), error = %e, "Cache write failed");
                None
            }
        }
    }

    async fn read_fallback(&self, symbol: &str) -> Option<CachedPrice> {
        match self.fallback.get(symbol).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(symbol, store = self.fallback.name(), error = %e, "Cache read failed");
                None
            }
        }
    }
}

// =============================================================================
// Write-Behind Queue
// =============================================================================

/// Pending cache writes, coalesced to the latest price per symbol.
///
/// `push` never waits on a store. A single [`run`](Self::run) task applies
/// the writes, so writes for one symbol land in the order they were pushed.
#[derive(Debug, Default)]
pub struct CacheWriteQueue {
    pending: Mutex<HashMap<Symbol, Decimal>>,
    wake: Notify,
}

impl CacheWriteQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write, replacing any pending write for the same symbol.
    pub fn push(&self, symbol: Symbol, price: Decimal) {
        self.pending.lock().insert(symbol, price);
        self.wake.notify_one();
    }

    /// Symbols with a pending write.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn take(&self) -> HashMap<Symbol, Decimal> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Apply queued writes to `cache` until `cancel` fires.
    ///
    /// Writes still pending at cancellation are dropped.
    pub async fn run(self: Arc<Self>, cache: Arc<PriceCache>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.wake.notified() => {}
            }

            loop {
                let batch = self.take();
                if batch.is_empty() {
                    break;
                }
                tracing::trace!(symbols = batch.len(), "Flushing cache writes");
                for (symbol, price) in batch {
                    if cancel.is_cancelled() {
                        return;
                    }
                    cache.set(&symbol, price).await;
                }
            }
        }
        tracing::debug!("Cache writer stopped");
    }
}
