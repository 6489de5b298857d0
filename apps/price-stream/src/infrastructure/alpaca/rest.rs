//! Alpaca Latest-Trade Backfill
//!
//! Backfill adapter over Alpaca's market-data REST API:
//! `GET {data_url}/v2/stocks/trades/latest?symbols=AAPL,MSFT&feed=iex`.
//!
//! # Response (JSON)
//! ```json
//! {"trades": {"AAPL": {"t": "2024-01-02T15:04:05Z", "p": 150.0, "s": 100}}}
//! ```
//!
//! Symbols missing from `trades` map to `None`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::application::ports::{BackfillError, BackfillPort};
use crate::domain::price::Symbol;

use super::auth::Credentials;

/// Default market-data REST base URL.
pub const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";

#[derive(Debug, Deserialize)]
struct LatestTradesResponse {
    #[serde(default)]
    trades: HashMap<String, LatestTrade>,
}

#[derive(Debug, Deserialize)]
struct LatestTrade {
    #[serde(rename = "p", default)]
    price: Option<Decimal>,
}

/// Latest-trade backfill client.
#[derive(Debug, Clone)]
pub struct AlpacaLatestTradeBackfill {
    client: Client,
    credentials: Credentials,
    data_url: String,
    feed: String,
}

impl AlpacaLatestTradeBackfill {
    /// Create a backfill client.
    ///
    /// # Errors
    ///
    /// Returns `BackfillError::Request` if the HTTP client cannot be built.
    pub fn new(
        credentials: Credentials,
        data_url: impl Into<String>,
        feed: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackfillError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackfillError::Request(e.to_string()))?;

        Ok(Self {
            client,
            credentials,
            data_url: data_url.into().trim_end_matches('/').to_string(),
            feed: feed.into(),
        })
    }
}

#[async_trait]
impl BackfillPort for AlpacaLatestTradeBackfill {
    async fn fetch_latest(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, Option<Decimal>>, BackfillError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/v2/stocks/trades/latest", self.data_url);
        let response = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", self.credentials.key())
            .header("APCA-API-SECRET-KEY", self.credentials.secret())
            .query(&[("symbols", symbols.join(",")), ("feed", self.feed.clone())])
            .send()
            .await
            .map_err(|e| BackfillError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackfillError::Status {
                status: status.as_u16(),
            });
        }

        let body: LatestTradesResponse = response
            .json()
            .await
            .map_err(|e| BackfillError::Decode(e.to_string()))?;

        Ok(symbols
            .iter()
            .map(|symbol| {
                let price = body
                    .trades
                    .get(symbol)
                    .and_then(|trade| trade.price)
                    .filter(|p| *p > Decimal::ZERO);
                (symbol.clone(), price)
            })
            .collect())
    }
}
