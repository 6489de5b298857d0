//! Configuration Module
//!
//! Configuration loading for the price stream service.

mod settings;

pub use settings::{
    AlertSettings, BackfillSettings, BroadcastSettings, CacheSettings, ConfigError, DataFeed,
    ServerSettings, ServiceConfig, StreamSettings,
};
