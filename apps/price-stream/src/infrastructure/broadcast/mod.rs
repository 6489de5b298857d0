//! Broadcast Channel Adapters
//!
//! Async fan-out of accepted prices, triggered alerts, and feed status
//! changes using tokio broadcast channels.
//!
//! # Architecture
//!
//! The `UpdateHub` sits next to the callback registry in the distribution
//! service. Callbacks are invoked synchronously; the hub serves consumers
//! that prefer to `.recv().await` in their own task. A receiver that falls
//! behind by more than the channel capacity sees `RecvError::Lagged` and
//! skips ahead, so a slow consumer never blocks the stream.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::BroadcastSettings;
use crate::domain::alert::TriggeredAlert;
use crate::domain::price::{FeedStatus, PriceUpdate};

// =============================================================================
// Update Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity for the price channel.
    pub prices_capacity: usize,
    /// Capacity for the alert channel.
    pub alerts_capacity: usize,
    /// Capacity for the feed status channel.
    pub feed_status_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            prices_capacity: 10_000,
            alerts_capacity: 1_000,
            feed_status_capacity: 64,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            prices_capacity: settings.prices_capacity,
            alerts_capacity: settings.alerts_capacity,
            feed_status_capacity: settings.feed_status_capacity,
        }
    }
}

/// Central hub for the service's broadcast channels.
///
/// # Example
///
/// ```rust
/// use price_stream::infrastructure::broadcast::{BroadcastConfig, UpdateHub};
///
/// let hub = UpdateHub::new(BroadcastConfig::default());
///
/// // Every receiver sees every price sent after it subscribed
/// let mut rx = hub.prices_rx();
/// assert_eq!(hub.prices_receiver_count(), 1);
/// # drop(rx);
/// ```
#[derive(Debug)]
#[allow(clippy::struct_field_names)]
pub struct UpdateHub {
    prices_tx: broadcast::Sender<PriceUpdate>,
    alerts_tx: broadcast::Sender<TriggeredAlert>,
    feed_status_tx: broadcast::Sender<FeedStatus>,
}

impl UpdateHub {
    /// Create a new hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            prices_tx: broadcast::channel(config.prices_capacity.max(1)).0,
            alerts_tx: broadcast::channel(config.alerts_capacity.max(1)).0,
            feed_status_tx: broadcast::channel(config.feed_status_capacity.max(1)).0,
        }
    }

    /// Create a new hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Prices
    // =========================================================================

    /// Send an accepted price to all receivers.
    ///
    /// Returns the number of receivers, or `None` if there are none.
    #[must_use]
    pub fn send_price(&self, update: PriceUpdate) -> Option<usize> {
        self.prices_tx.send(update).ok()
    }

    /// Get a new receiver for prices.
    #[must_use]
    pub fn prices_rx(&self) -> broadcast::Receiver<PriceUpdate> {
        self.prices_tx.subscribe()
    }

    /// Get the number of active price receivers.
    #[must_use]
    pub fn prices_receiver_count(&self) -> usize {
        self.prices_tx.receiver_count()
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Send a triggered alert to all receivers.
    #[must_use]
    pub fn send_alert(&self, alert: TriggeredAlert) -> Option<usize> {
        self.alerts_tx.send(alert).ok()
    }

    /// Get a new receiver for triggered alerts.
    #[must_use]
    pub fn alerts_rx(&self) -> broadcast::Receiver<TriggeredAlert> {
        self.alerts_tx.subscribe()
    }

    /// Get the number of active alert receivers.
    #[must_use]
    pub fn alerts_receiver_count(&self) -> usize {
        self.alerts_tx.receiver_count()
    }

    // =========================================================================
    // Feed Status
    // =========================================================================

    /// Send a feed status change to all receivers.
    #[must_use]
    pub fn send_feed_status(&self, status: FeedStatus) -> Option<usize> {
        self.feed_status_tx.send(status).ok()
    }

    /// Get a new receiver for feed status changes.
    #[must_use]
    pub fn feed_status_rx(&self) -> broadcast::Receiver<FeedStatus> {
        self.feed_status_tx.subscribe()
    }

    /// Get the number of active feed status receivers.
    #[must_use]
    pub fn feed_status_receiver_count(&self) -> usize {
        self.feed_status_tx.receiver_count()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            prices_receivers: self.prices_receiver_count(),
            alerts_receivers: self.alerts_receiver_count(),
            feed_status_receivers: self.feed_status_receiver_count(),
        }
    }
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Shared update hub reference.
pub type SharedUpdateHub = Arc<UpdateHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BroadcastStats {
    /// Number of price receivers.
    pub prices_receivers: usize,
    /// Number of alert receivers.
    pub alerts_receivers: usize,
    /// Number of feed status receivers.
    pub feed_status_receivers: usize,
}

impl BroadcastStats {
    /// Get total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.prices_receivers + self.alerts_receivers + self.feed_status_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================
