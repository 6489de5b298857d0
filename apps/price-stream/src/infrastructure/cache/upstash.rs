//! Upstash Redis REST price store.
//!
//! Commands are sent as a JSON array to the database URL with a bearer
//! token, e.g. `["SET", "price:AAPL", "{...}", "PX", "5000"]`. The reply is
//! `{"result": ...}` or `{"error": "..."}`.
//!
//! Transport failures, non-2xx replies, and `error` replies are all
//! `CacheError::Unavailable`; a value that is not a valid entry is
//! `CacheError::Corrupt`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::{CacheError, CachedPrice, PriceStore};

const KEY_PREFIX: &str = "price:";

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Price store backed by Upstash Redis over REST.
#[derive(Debug, Clone)]
pub struct UpstashPriceStore {
    client: Client,
    url: String,
    token: String,
}

impl UpstashPriceStore {
    /// Create a store.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unavailable` if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn key(symbol: &str) -> String {
        format!("{KEY_PREFIX}{symbol}")
    }

    async fn command(&self, args: &[String]) -> Result<Option<serde_json::Value>, CacheError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Unavailable(format!("HTTP {}", status.as_u16())));
        }

        let reply: CommandReply = response
            .json()
            .await
            .map_err(|e| CacheError::Unavailable(format!("unreadable reply: {e}")))?;

        if let Some(error) = reply.error {
            return Err(CacheError::Unavailable(error));
        }
        Ok(reply.result.filter(|v| !v.is_null()))
    }
}

#[async_trait]
impl PriceStore for UpstashPriceStore {
    async fn get(&self, symbol: &str) -> Result<Option<CachedPrice>, CacheError> {
        let Some(result) = self
            .command(&["GET".to_string(), Self::key(symbol)])
            .await?
        else {
            return Ok(None);
        };

        let raw = result
            .as_str()
            .ok_or_else(|| CacheError::Corrupt(format!("expected string, got {result}")))?;
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    async fn set(
        &self,
        symbol: &str,
        entry: CachedPrice,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let value =
            serde_json::to_string(&entry).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        let ttl_ms = ttl.as_millis().max(1);
        self.command(&[
            "SET".to_string(),
            Self::key(symbol),
            value,
            "PX".to_string(),
            ttl_ms.to_string(),
        ])
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "upstash"
    }
}
