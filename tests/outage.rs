//! Upstream outage: the breaker opens, callers get stale data, health degrades.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use statsgate::cache::{MemoryStore, SharedStore};
use statsgate::config::{GatewayConfig, UpstreamMode};
use statsgate::health::{HealthAggregator, HealthStatus};
use statsgate::observability::MemorySink;
use statsgate::resilience::{CircuitState, MockClock, SharedClock};
use statsgate::upstream::{
    Fetched, Platform, StatsClient, Transport, UpstreamError, UpstreamRequest, UpstreamResponse,
};

/// Plays back queued replies; once empty every call times out.
#[derive(Default)]
struct FlakyUpstream {
    replies: Mutex<VecDeque<Value>>,
    calls: AtomicUsize,
}

impl FlakyUpstream {
    fn push(&self, body: Value) {
        self.replies.lock().unwrap().push_back(body);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyUpstream {
    async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.lock().unwrap().pop_front() {
            Some(body) => Ok(UpstreamResponse { status: 200, body }),
            None => Err(UpstreamError::timeout(request.timeout)),
        }
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

fn player_document() -> Value {
    json!({
        "data": [{
            "type": "player",
            "id": "account.outage",
            "attributes": { "name": "survivor", "shardId": "steam" }
        }]
    })
}

struct Setup {
    client: Arc<StatsClient>,
    upstream: Arc<FlakyUpstream>,
    store: SharedStore,
    clock: MockClock,
    sink: MemorySink,
}

fn setup() -> Setup {
    let mut config = GatewayConfig::default();
    config.upstream.mode = UpstreamMode::Offline;
    config.retries.max_retries = 0;

    let clock = MockClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let sink = MemorySink::new();
    let store: SharedStore = Arc::new(MemoryStore::with_clock(shared.clone()));
    let upstream = Arc::new(FlakyUpstream::default());
    let client = Arc::new(StatsClient::new(
        &config,
        upstream.clone(),
        store.clone(),
        shared,
        Arc::new(sink.clone()),
    ));

    Setup {
        client,
        upstream,
        store,
        clock,
        sink,
    }
}

#[tokio::test(start_paused = true)]
async fn test_outage_serves_stale_and_opens_breaker() {
    let s = setup();
    s.upstream.push(player_document());

    let first = s.client.fetch_player_by_name("survivor", Platform::Steam).await;
    assert_eq!(first.source(), "live");

    // Past the fresh TTL, only the shadow copy remains.
    s.clock.advance(Duration::from_secs(2 * 3_600));

    for attempt in 1..=5u32 {
        let fetched = s.client.fetch_player_by_name("survivor", Platform::Steam).await;
        assert!(fetched.is_stale(), "attempt {} was {}", attempt, fetched.source());
        assert_eq!(s.client.breaker().snapshot().consecutive_failures, attempt);
    }
    assert_eq!(s.client.breaker().state(), CircuitState::Open);
    assert_eq!(s.upstream.calls(), 6);

    // Breaker open: stale data with no network call.
    let sixth = s.client.fetch_player_by_name("survivor", Platform::Steam).await;
    match sixth {
        Fetched::Stale { value, cause, .. } => {
            assert_eq!(value.id, "account.outage");
            assert!(matches!(cause, UpstreamError::BreakerOpen { .. }));
        }
        other => panic!("expected stale data, got {}", other.source()),
    }
    assert_eq!(s.upstream.calls(), 6);
    assert!(s.sink.count("stale_served") >= 6);

    let health = HealthAggregator::new(
        s.client.clone(),
        s.store.clone(),
        Arc::new(s.clock.clone()),
        Arc::new(s.sink.clone()),
        Duration::from_secs(1),
    );
    let report = health.check().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.cache_ok);
    assert!(!report.api_ok);
    assert_eq!(report.breaker_state, CircuitState::Open);
    assert!(report.timeout_remaining_ms.is_some());
    assert_eq!(s.upstream.calls(), 6, "probe must not run while open");
}

#[tokio::test(start_paused = true)]
async fn test_outage_without_cached_copy_is_unavailable() {
    let s = setup();

    let fetched = s.client.fetch_player_by_name("nobody", Platform::Steam).await;
    assert!(matches!(fetched, Fetched::Unavailable(UpstreamError::Transient { .. })));
    assert_eq!(s.sink.count("fetch_unavailable"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_open_timeout() {
    let s = setup();
    for _ in 0..5 {
        s.client.fetch_player_by_name("survivor", Platform::Steam).await;
    }
    assert_eq!(s.client.breaker().state(), CircuitState::Open);

    s.clock.advance(Duration::from_millis(60_000));
    s.upstream.push(player_document());

    let fetched = s.client.fetch_player_by_name("survivor", Platform::Steam).await;
    assert_eq!(fetched.source(), "live");
    assert_ne!(s.client.breaker().state(), CircuitState::Open);
}
