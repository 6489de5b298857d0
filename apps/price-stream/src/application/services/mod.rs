//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PriceDistributionService`: Subscriptions, fan-out, backfill, and alerts
//! - `PriceCache`: TTL cache over a primary and a fallback `PriceStore`
//! - `CacheWriteQueue`: Coalescing write-behind queue for the price cache
//! - `PriceListeners` / `CallbackSet`: Listener registries

mod distribution;
mod listeners;
mod price_cache;

pub use distribution::{
    DEFAULT_EVENT_BUFFER, DistributionConfig, PriceDistributionService, ServiceStats,
    SubscribeReport,
};
pub use listeners::{
    AlertCallback, AlertListeners, CallbackSet, ConnectionCallback, ConnectionListeners,
    ListenerId, PriceCallback, PriceListeners,
};
pub use price_cache::{CacheWriteQueue, DEFAULT_CACHE_TTL, PriceCache};
