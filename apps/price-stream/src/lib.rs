#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream - Real-Time Market Data Distribution
//!
//! Keeps one authenticated connection to Alpaca's stock stream, replays the
//! desired symbol set after every reconnect, caches the latest price per
//! symbol with a short TTL, and fans updates out to any number of
//! in-process consumers plus an alert-matching side-channel.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `price`: Price updates, connection state, feed status
//!   - `subscription`: The registry of desired symbols
//!   - `alert`: Alerts returned by the alert-matching endpoint
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Price stores, backfill, alert check
//!   - `services`: Distribution service, price cache, listener registries
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `alpaca`: Stream connection and latest-trade REST backfill
//!   - `cache`: In-process and Upstash price stores
//!   - `backfill`, `alerts`: HTTP clients
//!   - `broadcast`: Channel-based fan-out
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                     replay on auth
//!   SubscriptionRegistry ─────────┐
//!                                 v
//!   Alpaca stock WS ──> StreamConnection ──> PriceDistributionService
//!                                              │  ├─> price callbacks
//!   REST backfill ────────────────────────────>│  ├─> broadcast receivers
//!                                              │  ├─> PriceCache (Upstash | memory)
//!                                              │  └─> alert check ──> alert callbacks
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::TriggeredAlert;
pub use domain::price::{ConnectionState, FeedStatus, PriceSource, PriceUpdate, Symbol};
pub use domain::subscription::{SubscriptionChanges, SubscriptionRegistry, SubscriptionSource};

// Services
pub use application::services::{
    DistributionConfig, ListenerId, PriceCache, PriceDistributionService, ServiceStats,
    SubscribeReport,
};

// Infrastructure config
pub use infrastructure::config::{
    AlertSettings, BackfillSettings, BroadcastSettings, CacheSettings, ConfigError, DataFeed,
    ServerSettings, ServiceConfig, StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastStats, SharedUpdateHub, UpdateHub};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
