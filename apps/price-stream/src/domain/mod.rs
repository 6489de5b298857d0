//! Domain Layer - Core price distribution types.
//!
//! This layer contains the price, subscription, and alert types with no
//! I/O. All types here are pure Rust with serialization support.

/// Price updates, connection state, and feed status.
pub mod price;

/// Desired-symbol registry.
pub mod subscription;

/// Alerts returned by the alert-matching endpoint.
pub mod alert;
