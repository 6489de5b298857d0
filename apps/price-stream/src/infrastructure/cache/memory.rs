//! In-process price store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{CacheError, CachedPrice, PriceStore};

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: CachedPrice,
    expires_at: Instant,
}

/// Process-local price store with per-entry expiry.
///
/// Expired entries are reported as misses and removed lazily on the next
/// write to the same key or by [`InMemoryPriceStore::purge_expired`].
#[derive(Debug, Default)]
pub struct InMemoryPriceStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryPriceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn get(&self, symbol: &str) -> Result<Option<CachedPrice>, CacheError> {
        let entries = self.entries.read();
        Ok(entries
            .get(symbol)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value))
    }

    async fn set(
        &self,
        symbol: &str,
        entry: CachedPrice,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries.write().insert(
            symbol.to_string(),
            Entry {
                value: entry,
                expires_at,
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
