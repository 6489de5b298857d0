//! Cache and Backfill Integration Tests
//!
//! HTTP adapters against wiremock: store fallback when the shared cache is
//! down, and REST backfill seeding newly subscribed symbols.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{memory_cache, service_with};
use price_stream::application::ports::{BackfillPort, PriceStore};
use price_stream::infrastructure::backfill::HttpBackfillClient;
use price_stream::infrastructure::cache::{InMemoryPriceStore, UpstashPriceStore};
use price_stream::{FeedStatus, PriceCache, PriceSource};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Nothing listens on port 1, so the stream gives up after one attempt.
const UNREACHABLE_STREAM: &str = "ws://127.0.0.1:1";

#[tokio::test]
async fn shared_cache_outage_falls_back_to_memory() {
    let upstash = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstash)
        .await;

    let primary: Arc<dyn PriceStore> =
        Arc::new(UpstashPriceStore::new(upstash.uri(), "token", TIMEOUT).unwrap());
    let memory = Arc::new(InMemoryPriceStore::new());
    let fallback: Arc<dyn PriceStore> = memory.clone();
    let cache = PriceCache::new(Some(primary), fallback, Duration::from_secs(5));

    assert_eq!(cache.backend_name(), "upstash");
    assert_eq!(cache.set("TSLA", Decimal::from(250)).await, Some("memory"));
    assert_eq!(memory.len(), 1);

    let cached = cache.get("TSLA").await.unwrap();
    assert_eq!(cached.price, Decimal::from(250));
    assert_eq!(cached.source, PriceSource::Cache);
    assert!(!upstash.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn subscribe_backfills_from_http_endpoint() {
    let prices = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .and(query_param("symbols", "AAPL"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"AAPL": 150.00})),
        )
        .expect(1)
        .mount(&prices)
        .await;

    let backfill: Arc<dyn BackfillPort> = Arc::new(
        HttpBackfillClient::new(format!("{}/prices", prices.uri()), TIMEOUT).unwrap(),
    );
    let service = service_with(UNREACHABLE_STREAM, 1, memory_cache(), backfill);

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        service
            .on_price_update("AAPL", move |update| {
                assert_eq!(update.price, Decimal::from(150));
                assert_eq!(update.source, PriceSource::RestBackfill);
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    let report = service.subscribe_to_symbols(&["AAPL"]).await;
    assert_eq!(report.added, vec!["AAPL"]);
    assert_eq!(report.backfilled, vec!["AAPL"]);
    assert!(report.cached.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        service.get_price("AAPL").map(|p| p.source),
        Some(PriceSource::RestBackfill)
    );

    // Already tracked, so a second subscribe neither adds nor backfills.
    let report = service.subscribe_to_symbols(&["AAPL"]).await;
    assert!(report.added.is_empty());
    assert!(report.backfilled.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    service.shutdown();
}

#[tokio::test]
async fn failed_backfill_leaves_symbol_subscribed() {
    let prices = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&prices)
        .await;

    let backfill: Arc<dyn BackfillPort> =
        Arc::new(HttpBackfillClient::new(prices.uri(), TIMEOUT).unwrap());
    let service = service_with(UNREACHABLE_STREAM, 1, memory_cache(), backfill);

    let report = service.subscribe_to_symbols(&["NVDA"]).await;
    assert_eq!(report.added, vec!["NVDA"]);
    assert!(report.backfilled.is_empty());
    assert!(service.get_price("NVDA").is_none());
    assert_eq!(service.desired_symbols(), vec!["NVDA"]);
    assert_ne!(service.feed_status(), FeedStatus::Connected);

    service.shutdown();
}

#[tokio::test]
async fn cached_price_seeds_without_backfill() {
    let prices = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(0)
        .mount(&prices)
        .await;

    let cache = memory_cache();
    cache.set("MSFT", Decimal::from(410)).await;

    let backfill: Arc<dyn BackfillPort> =
        Arc::new(HttpBackfillClient::new(prices.uri(), TIMEOUT).unwrap());
    let service = service_with(UNREACHABLE_STREAM, 1, cache, backfill);

    let report = service.subscribe_to_symbols(&["MSFT"]).await;
    assert_eq!(report.cached, vec!["MSFT"]);
    assert!(report.backfilled.is_empty());

    let price = service.get_price("MSFT").unwrap();
    assert_eq!(price.price, Decimal::from(410));
    assert_eq!(price.source, PriceSource::Cache);

    service.shutdown();
}
