//! HTTP Backfill Adapter
//!
//! Generic latest-price endpoint: `GET {url}?symbols=AAPL,MSFT` returning a
//! flat JSON map of symbol to nullable price, e.g.
//! `{"AAPL": 150.0, "MSFT": null}`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;

use crate::application::ports::{BackfillError, BackfillPort};
use crate::domain::price::{Symbol, normalize_symbol};

/// Backfill client for a symbol-to-price endpoint.
#[derive(Debug, Clone)]
pub struct HttpBackfillClient {
    client: Client,
    url: String,
}

impl HttpBackfillClient {
    /// Create a client for `url`.
    ///
    /// # Errors
    ///
    /// Returns `BackfillError::Request` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, BackfillError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackfillError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BackfillPort for HttpBackfillClient {
    async fn fetch_latest(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, Option<Decimal>>, BackfillError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .client
            .get(&self.url)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .map_err(|e| BackfillError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackfillError::Status {
                status: status.as_u16(),
            });
        }

        let body: HashMap<String, Option<Decimal>> = response
            .json()
            .await
            .map_err(|e| BackfillError::Decode(e.to_string()))?;

        Ok(body
            .into_iter()
            .filter_map(|(symbol, price)| {
                normalize_symbol(&symbol)
                    .map(|s| (s, price.filter(|p| *p > Decimal::ZERO)))
            })
            .collect())
    }
}
