//! Warming scheduler tests: governed execution, quota deferral and retry
//! accounting through the gateway's warming queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use geogate::{
    CacheKind, CacheOptions, Gateway, Provider, ProviderAdapter, ProviderLimits,
    ProviderRequest, ProviderResponse, ResponseSource, Result,
};

struct RecordingAdapter {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ProviderAdapter for RecordingAdapter {
    fn provider(&self) -> Provider {
        Provider::GoogleMaps
    }

    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderResponse {
            provider: Provider::GoogleMaps,
            payload: json!({"warmed": true, "endpoint": request.endpoint}),
            confidence: None,
        })
    }
}

fn gateway_with_counter() -> (Gateway, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let gateway = Gateway::builder()
        .adapter(Arc::new(RecordingAdapter {
            calls: Arc::clone(&calls),
        }))
        .warming_delay(Duration::from_millis(1))
        .build()
        .unwrap();
    (gateway, calls)
}

fn traffic_request(segment: u32) -> ProviderRequest {
    ProviderRequest::new(
        Provider::GoogleMaps,
        CacheKind::Traffic,
        "/traffic",
        json!({"segment": segment}),
    )
}

#[tokio::test]
async fn warming_jobs_fetch_and_fill_the_cache() {
    let (gateway, calls) = gateway_with_counter();
    gateway
        .warming_queue()
        .enqueue(traffic_request(1), CacheOptions::default(), 7);
    gateway
        .warming_queue()
        .enqueue(traffic_request(2), CacheOptions::default(), 7);

    let completed = gateway.run_warming(10).await;
    assert_eq!(completed, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.warming_queue().report().completed, 2);

    // A live request for the warmed fingerprint is now a cache hit.
    let response = gateway
        .get(&traffic_request(1), &CacheOptions::default())
        .await
        .unwrap();
    assert_eq!(response.source, ResponseSource::FastCache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn quota_denied_jobs_are_deferred_not_burned() {
    let (gateway, calls) = gateway_with_counter();
    gateway
        .governor()
        .update_limits(
            Provider::GoogleMaps,
            ProviderLimits {
                per_second: 50,
                hourly: 1_000,
                daily: 10,
                cost_per_request: 0.005,
            },
            "test",
        )
        .unwrap();
    for _ in 0..10 {
        gateway.track_success(Provider::GoogleMaps, "/traffic", 10);
    }
    gateway
        .warming_queue()
        .enqueue(traffic_request(1), CacheOptions::default(), 7);

    let completed = gateway.run_warming(10).await;
    assert_eq!(completed, 0);
    // The adapter was never reached and the job waits for the window.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let report = gateway.warming_queue().report();
    assert_eq!(report.pending, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn an_empty_queue_is_a_noop() {
    let (gateway, calls) = gateway_with_counter();
    assert_eq!(gateway.run_warming(10).await, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn background_warming_stops_on_shutdown() {
    let (gateway, _) = gateway_with_counter();
    let gateway = Arc::new(gateway);
    gateway.spawn_warming(Duration::from_millis(5), 4);
    gateway
        .warming_queue()
        .enqueue(traffic_request(1), CacheOptions::default(), 7);

    tokio::time::sleep(Duration::from_millis(30)).await;
    gateway.shutdown().await;
    assert!(gateway.warming_queue().report().completed >= 1);
}
