//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Alerting endpoint client.
pub mod alerts;

/// Alpaca stock stream and REST adapters.
pub mod alpaca;

/// Generic HTTP backfill client.
pub mod backfill;

/// Broadcast channel adapters for async fan-out.
pub mod broadcast;

/// Price store adapters (in-process and Upstash).
pub mod cache;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
