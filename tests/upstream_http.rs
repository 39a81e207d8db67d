//! The live transport against a local mock of the statistics API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use statsgate::cache::{MemoryStore, SharedStore};
use statsgate::config::{GatewayConfig, UpstreamMode};
use statsgate::observability::MemorySink;
use statsgate::resilience::SystemClock;
use statsgate::upstream::{
    Fetched, HttpTransport, Platform, StatsClient, Transport, TransientKind, UpstreamError, UpstreamRequest,
};

mod common;
use common::{start_mock_upstream, MockReply};

fn live_config(base_url: String) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.mode = UpstreamMode::Live;
    config.upstream.base_url = base_url;
    config.upstream.api_key = Some("test-key".to_string());
    config.upstream.request_timeout_ms = 2_000;
    config.pacer.min_interval_ms = 0;
    config.retries.base_delay_ms = 10;
    config.retries.min_delay_ms = 1;
    config.retries.max_delay_ms = 50;
    config
}

fn client_for(config: &GatewayConfig) -> StatsClient {
    let transport = Arc::new(HttpTransport::new(&config.upstream).unwrap());
    let store: SharedStore = Arc::new(MemoryStore::new());
    StatsClient::new(
        config,
        transport,
        store,
        Arc::new(SystemClock),
        Arc::new(MemorySink::new()),
    )
}

fn player_document() -> serde_json::Value {
    json!({
        "data": [{
            "type": "player",
            "id": "account.abc123",
            "attributes": { "name": "shroud", "shardId": "steam" },
            "relationships": { "matches": { "data": [{ "type": "match", "id": "m-1" }] } }
        }]
    })
}

#[tokio::test]
async fn test_player_lookup_sends_credentials() {
    let (addr, seen) = start_mock_upstream(|_| async { MockReply::json(200, player_document()) }).await;
    let config = live_config(format!("http://{}", addr));
    let client = client_for(&config);

    let fetched = client.fetch_player_by_name("shroud", Platform::Steam).await;
    let player = match fetched {
        Fetched::Live(player) => player,
        other => panic!("expected live data, got {:?}", other.source()),
    };
    assert_eq!(player.id, "account.abc123");
    assert_eq!(player.match_ids, vec!["m-1".to_string()]);

    let head = seen.all()[0].to_lowercase();
    assert!(head.starts_with("get /shards/steam/players?"), "{}", head);
    assert!(head.contains("authorization: bearer test-key"), "{}", head);
    assert!(head.contains("accept: application/vnd.api+json"), "{}", head);

    // Second lookup is a cache hit.
    let again = client.fetch_player_by_name("SHROUD", Platform::Steam).await;
    assert_eq!(again.source(), "cache");
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn test_not_found_carries_detail() {
    let (addr, _) = start_mock_upstream(|_| async {
        MockReply::json(404, json!({ "errors": [{ "title": "Not Found", "detail": "No Players Found" }] }))
    })
    .await;
    let config = live_config(format!("http://{}", addr));
    let transport = HttpTransport::new(&config.upstream).unwrap();

    let err = transport
        .get(UpstreamRequest::new("/shards/steam/players", Duration::from_secs(2)))
        .await
        .unwrap_err();
    match err {
        UpstreamError::Client { status, detail } => {
            assert_eq!(status, 404);
            assert_eq!(detail, "No Players Found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_throttling_exposes_retry_after() {
    let (addr, _) = start_mock_upstream(|_| async {
        MockReply::json(429, json!({ "errors": [{ "title": "Too Many Requests" }] })).header("Retry-After", "7")
    })
    .await;
    let config = live_config(format!("http://{}", addr));
    let transport = HttpTransport::new(&config.upstream).unwrap();

    let err = transport
        .get(UpstreamRequest::new("/shards/steam/seasons", Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(
        matches!(err, UpstreamError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(7)),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let (addr, seen) = start_mock_upstream(move |_| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                MockReply::json(503, json!({ "errors": [{ "title": "Service Unavailable" }] }))
            } else {
                MockReply::json(200, player_document())
            }
        }
    })
    .await;
    let config = live_config(format!("http://{}", addr));
    let client = client_for(&config);

    let fetched = client.fetch_player_by_name("shroud", Platform::Steam).await;
    assert_eq!(fetched.source(), "live");
    assert_eq!(seen.len(), 3);
    // Two failures then a success: the breaker never opened.
    assert_eq!(client.breaker().snapshot().consecutive_failures, 0);
}

#[tokio::test]
async fn test_unreachable_upstream_is_connect_failure() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let config = live_config(format!("http://{}", addr));
    let transport = HttpTransport::new(&config.upstream).unwrap();

    let err = transport
        .get(UpstreamRequest::new("/status", Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            UpstreamError::Transient {
                kind: TransientKind::Connect,
                ..
            }
        ),
        "{:?}",
        err
    );
}
