//! Triggered Alerts
//!
//! The alert-matching endpoint compares a fresh price against stored
//! catalyst thresholds and returns the alerts that fired. They are passed
//! to alert listeners unmodified.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::price::Symbol;

/// An alert returned by the alert-matching endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredAlert {
    /// Alert identifier.
    pub id: String,
    /// Ticker the alert is attached to.
    pub ticker: Symbol,
    /// Catalyst the alert was created for.
    pub catalyst_id: String,
    /// Catalyst headline, when the endpoint includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalyst_title: Option<String>,
    /// Reference price before the catalyst.
    #[serde(with = "rust_decimal::serde::float")]
    pub before_price: Decimal,
    /// Reference price after the catalyst.
    #[serde(with = "rust_decimal::serde::float")]
    pub after_price: Decimal,
    /// Price that triggered the alert.
    #[serde(with = "rust_decimal::serde::float")]
    pub current_price: Decimal,
    /// Allowed distance from the reference price.
    #[serde(with = "rust_decimal::serde::float")]
    pub tolerance: Decimal,
    /// Minimum move required before the alert fires.
    #[serde(with = "rust_decimal::serde::float")]
    pub min_move: Decimal,
}
