//! HTTP Alert Checker
//!
//! Posts `{"symbol": "AAPL", "currentPrice": 150.25}` to the alert-matching
//! endpoint with a bearer token. The reply is `{"alerts": [...]}`; a missing
//! `alerts` field means nothing fired.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::{AlertCheckError, AlertCheckPort};
use crate::domain::alert::TriggeredAlert;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertCheckRequest<'a> {
    symbol: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    current_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct AlertCheckResponse {
    #[serde(default)]
    alerts: Vec<TriggeredAlert>,
}

/// Alert-matching endpoint client.
#[derive(Clone)]
pub struct HttpAlertChecker {
    client: Client,
    url: String,
    token: String,
}

impl std::fmt::Debug for HttpAlertChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAlertChecker")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpAlertChecker {
    /// Create a client for `url` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns `AlertCheckError::Request` if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AlertCheckError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertCheckError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl AlertCheckPort for HttpAlertChecker {
    async fn check(
        &self,
        symbol: &str,
        price: Decimal,
    ) -> Result<Vec<TriggeredAlert>, AlertCheckError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&AlertCheckRequest {
                symbol,
                current_price: price,
            })
            .send()
            .await
            .map_err(|e| AlertCheckError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertCheckError::Status {
                status: status.as_u16(),
            });
        }

        let body: AlertCheckResponse = response
            .json()
            .await
            .map_err(|e| AlertCheckError::Decode(e.to_string()))?;
        Ok(body.alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_symbol_and_price() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(serde_json::json!({"symbol": "NVDA", "currentPrice": 121.5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "alerts": [{
                    "id": "al_1", "ticker": "NVDA", "catalystId": "cat_9",
                    "beforePrice": 120.5, "afterPrice": 131.0, "currentPrice": 121.5,
                    "tolerance": 1.5, "minMove": 2.0
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let checker =
            HttpAlertChecker::new(server.uri(), "secret-token", Duration::from_secs(2)).unwrap();
        let alerts = checker.check("NVDA", Decimal::new(1215, 1)).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, "al_1");
    }

    #[test]
    fn debug_redacts_token() {
        let checker =
            HttpAlertChecker::new("http://alerts.local", "super-secret", Duration::from_secs(1))
                .unwrap();
        let debug = format!("{checker:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret"));
    }

    #[tokio::test]
    async fn missing_alerts_field_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        let checker = HttpAlertChecker::new(server.uri(), "t", Duration::from_secs(2)).unwrap();
        assert!(checker.check("F", Decimal::ONE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let checker = HttpAlertChecker::new(server.uri(), "t", Duration::from_secs(2)).unwrap();
        let err = checker.check("F", Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, AlertCheckError::Status { status: 401 }));
    }
}
