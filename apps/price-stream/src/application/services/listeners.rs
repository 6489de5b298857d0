//! Listener Registries
//!
//! Concurrent-safe callback storage for the distribution service.
//! Callbacks are cloned out of the lock before they run, so a callback may
//! register or remove listeners (including itself) without deadlocking.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::alert::TriggeredAlert;
use crate::domain::price::{PriceUpdate, Symbol};

/// Callback invoked with every accepted price for one symbol.
pub type PriceCallback = Arc<dyn Fn(&PriceUpdate) + Send + Sync>;

/// Callback invoked with every triggered alert.
pub type AlertCallback = Arc<dyn Fn(&TriggeredAlert) + Send + Sync>;

/// Callback invoked with `true` on connect and `false` on disconnect.
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned when a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run a listener, containing any panic so one consumer cannot take down
/// delivery to the others.
pub(crate) fn invoke(kind: &'static str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(listener = kind, "Listener panicked");
    }
}

// =============================================================================
// Per-Symbol Listeners
// =============================================================================

/// Per-symbol price callbacks.
///
/// A symbol's entry exists only while it has at least one callback.
#[derive(Default)]
pub struct PriceListeners {
    by_symbol: RwLock<HashMap<Symbol, Vec<(ListenerId, PriceCallback)>>>,
}

impl PriceListeners {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `symbol`.
    pub fn add(&self, symbol: &str, callback: PriceCallback) -> ListenerId {
        let id = ListenerId::new();
        self.by_symbol
            .write()
            .entry(symbol.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove exactly one callback. Returns `false` if it was not registered.
    pub fn remove(&self, symbol: &str, id: ListenerId) -> bool {
        let mut by_symbol = self.by_symbol.write();
        let Some(entries) = by_symbol.get_mut(symbol) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            by_symbol.remove(symbol);
        }
        removed
    }

    /// Snapshot the callbacks for `symbol`.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Vec<PriceCallback> {
        self.by_symbol
            .read()
            .get(symbol)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Invoke every callback for the update's symbol.
    ///
    /// Returns the number of callbacks invoked.
    pub fn notify(&self, update: &PriceUpdate) -> usize {
        let callbacks = self.snapshot(&update.symbol);
        for callback in &callbacks {
            invoke("price", || callback(update));
        }
        callbacks.len()
    }

    /// Total callbacks across all symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_symbol.read().values().map(Vec::len).sum()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_symbol.read().is_empty()
    }

    /// Number of symbols with at least one callback.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.by_symbol.read().len()
    }
}

impl std::fmt::Debug for PriceListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceListeners")
            .field("symbols", &self.symbol_count())
            .field("callbacks", &self.len())
            .finish()
    }
}

// =============================================================================
// Global Listeners
// =============================================================================

/// An unordered set of callbacks that all receive every event.
pub struct CallbackSet<F: ?Sized> {
    entries: RwLock<Vec<(ListenerId, Arc<F>)>>,
}

impl<F: ?Sized> Default for CallbackSet<F> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> CallbackSet<F> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn add(&self, callback: Arc<F>) -> ListenerId {
        let id = ListenerId::new();
        self.entries.write().push((id, callback));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Snapshot all callbacks.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<F: ?Sized> std::fmt::Debug for CallbackSet<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("callbacks", &self.len())
            .finish()
    }
}

/// Alert listeners.
pub type AlertListeners = CallbackSet<dyn Fn(&TriggeredAlert) + Send + Sync>;

/// Connection state listeners.
pub type ConnectionListeners = CallbackSet<dyn Fn(bool) + Send + Sync>;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::price::PriceSource;

    fn update(symbol: &str) -> PriceUpdate {
        PriceUpdate::from_price(
            symbol.to_string(),
            Decimal::from(100),
            Utc::now(),
            PriceSource::Stream,
        )
    }

    fn counting() -> (Arc<AtomicUsize>, PriceCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let callback: PriceCallback = Arc::new(move |_: &PriceUpdate| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (hits, callback)
    }

    #[test]
    fn notify_reaches_only_matching_symbol() {
        let listeners = PriceListeners::new();
        let (aapl_hits, aapl) = counting();
        let (msft_hits, msft) = counting();
        listeners.add("AAPL", aapl);
        listeners.add("MSFT", msft);

        assert_eq!(listeners.notify(&update("AAPL")), 1);
        assert_eq!(aapl_hits.load(Ordering::SeqCst), 1);
        assert_eq!(msft_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_is_exact_and_drops_empty_entry() {
        let listeners = PriceListeners::new();
        let (_, first) = counting();
        let (second_hits, second) = counting();
        let first_id = listeners.add("AAPL", first);
        let second_id = listeners.add("AAPL", second);

        assert!(listeners.remove("AAPL", first_id));
        assert!(!listeners.remove("AAPL", first_id));
        assert_eq!(listeners.len(), 1);

        listeners.notify(&update("AAPL"));
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);

        assert!(listeners.remove("AAPL", second_id));
        assert_eq!(listeners.symbol_count(), 0);
        assert!(listeners.is_empty());
    }

    #[test]
    fn callback_may_unregister_itself() {
        let listeners = Arc::new(PriceListeners::new());
        let slot: Arc<parking_lot::Mutex<Option<ListenerId>>> = Arc::default();

        let registry = Arc::clone(&listeners);
        let own_id = Arc::clone(&slot);
        let id = listeners.add(
            "AAPL",
            Arc::new(move |u: &PriceUpdate| {
                if let Some(id) = *own_id.lock() {
                    registry.remove(&u.symbol, id);
                }
            }),
        );
        *slot.lock() = Some(id);

        assert_eq!(listeners.notify(&update("AAPL")), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn panicking_callback_does_not_stop_others() {
        let listeners = PriceListeners::new();
        listeners.add("AAPL", Arc::new(|_: &PriceUpdate| panic!("listener bug")));
        let (hits, callback) = counting();
        listeners.add("AAPL", callback);

        assert_eq!(listeners.notify(&update("AAPL")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_set_add_remove() {
        let set = ConnectionListeners::new();
        let id = set.add(Arc::new(|_connected: bool| {}));
        assert_eq!(set.len(), 1);
        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert!(set.is_empty());
    }
}
