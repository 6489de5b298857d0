//! Subscription Registry
//!
//! The single authoritative record of which symbols are wanted. The stream
//! connection never originates subscription intent; it reads this set
//! through [`SubscriptionSource`] and replays it after every
//! (re)authentication.
//!
//! The registry tracks intent only. Listener bookkeeping lives in the
//! distribution service, and removing the last listener for a symbol does
//! not remove the symbol from here.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::domain::price::Symbol;

// =============================================================================
// Subscription Source
// =============================================================================

/// Read-only view of the desired symbol set.
pub trait SubscriptionSource: Send + Sync {
    /// Snapshot of every desired symbol, sorted.
    fn desired_symbols(&self) -> Vec<Symbol>;
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Symbols whose membership actually changed in one registry call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Newly desired symbols.
    pub added: Vec<Symbol>,
    /// Symbols no longer desired.
    pub removed: Vec<Symbol>,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe set of desired symbols.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: RwLock<BTreeSet<Symbol>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols to the desired set.
    ///
    /// Returns only the symbols that were not already present.
    pub fn add(&self, symbols: &[Symbol]) -> SubscriptionChanges {
        let mut desired = self.desired.write();
        let added = symbols
            .iter()
            .filter(|s| desired.insert((*s).clone()))
            .cloned()
            .collect();
        SubscriptionChanges {
            added,
            removed: Vec::new(),
        }
    }

    /// Remove symbols from the desired set.
    ///
    /// Returns only the symbols that were present.
    pub fn remove(&self, symbols: &[Symbol]) -> SubscriptionChanges {
        let mut desired = self.desired.write();
        let removed = symbols
            .iter()
            .filter(|s| desired.remove(s.as_str()))
            .cloned()
            .collect();
        SubscriptionChanges {
            added: Vec::new(),
            removed,
        }
    }

    /// Whether a symbol is desired.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.desired.read().contains(symbol)
    }

    /// Number of desired symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.desired.read().len()
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.desired.read().is_empty()
    }
}

impl SubscriptionSource for SubscriptionRegistry {
    fn desired_symbols(&self) -> Vec<Symbol> {
        self.desired.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn syms(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn add_reports_only_new_symbols() {
        let registry = SubscriptionRegistry::new();
        let first = registry.add(&syms(&["AAPL", "MSFT"]));
        assert_eq!(first.added, syms(&["AAPL", "MSFT"]));

        let second = registry.add(&syms(&["MSFT", "TSLA"]));
        assert_eq!(second.added, syms(&["TSLA"]));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn add_same_symbol_twice_in_one_call() {
        let registry = SubscriptionRegistry::new();
        let changes = registry.add(&syms(&["AAPL", "AAPL"]));
        assert_eq!(changes.added, syms(&["AAPL"]));
    }

    #[test]
    fn remove_reports_only_present_symbols() {
        let registry = SubscriptionRegistry::new();
        registry.add(&syms(&["AAPL", "MSFT"]));

        let changes = registry.remove(&syms(&["MSFT", "GOOG"]));
        assert_eq!(changes.removed, syms(&["MSFT"]));
        assert!(!registry.contains("MSFT"));
        assert!(registry.contains("AAPL"));
    }

    #[test]
    fn desired_symbols_are_sorted() {
        let registry = SubscriptionRegistry::new();
        registry.add(&syms(&["TSLA", "AAPL", "MSFT"]));
        assert_eq!(registry.desired_symbols(), syms(&["AAPL", "MSFT", "TSLA"]));
    }

    #[test]
    fn empty_changes() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.remove(&syms(&["AAPL"])).removed.is_empty());
    }

    proptest! {
        #[test]
        fn desired_set_matches_model(ops in prop::collection::vec((any::<bool>(), "[A-E]"), 0..64)) {
            let registry = SubscriptionRegistry::new();
            let mut model = BTreeSet::new();
            for (add, symbol) in ops {
                if add {
                    let changes = registry.add(std::slice::from_ref(&symbol));
                    prop_assert_eq!(changes.added.len() == 1, model.insert(symbol));
                } else {
                    let changes = registry.remove(std::slice::from_ref(&symbol));
                    prop_assert_eq!(changes.removed.len() == 1, model.remove(&symbol));
                }
            }
            prop_assert_eq!(registry.desired_symbols(), model.into_iter().collect::<Vec<_>>());
        }
    }
}
