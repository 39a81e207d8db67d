//! Resilient statistics client.
//!
//! # Data Flow
//! ```text
//! fetch_*()
//!     → fresh cache hit?            → Fetched::Cached
//!     → within fetch_deadline:
//!         → pacer.before_request()
//!         → retry executor
//!             → breaker permit?     (no → BreakerOpen, not retried)
//!             → transport.get + parse
//!             → outcome reported on the permit
//!     → success                     → write both tiers → Fetched::Live
//!     → 404                         → Fetched::NotFound
//!     → failure or deadline + shadow copy → Fetched::Stale
//!     → failure or deadline         → Fetched::Unavailable
//! ```
//!
//! The deadline stays below the inbound request timeout so a slow outage
//! still ends in the fallback path rather than a dropped handler.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::cache::{DataKind, SharedStore, TieredCache};
use crate::config::schema::GatewayConfig;
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::{BreakerPermit, CircuitBreaker, RequestPacer, RetryExecutor, SharedClock};
use crate::upstream::error::UpstreamError;
use crate::upstream::transport::{Transport, UpstreamRequest};
use crate::upstream::types::{
    self, Fetched, GameMode, LeaderboardEntry, MatchSummary, Platform, Player, PlayerStats, Season,
};

const MAX_NAME_LEN: usize = 64;

pub struct StatsClient {
    transport: Arc<dyn Transport>,
    cache: TieredCache,
    breaker: Arc<CircuitBreaker>,
    pacer: RequestPacer,
    retry: RetryExecutor,
    sink: SharedSink,
    clock: SharedClock,
    cancel: CancellationToken,
    request_timeout: Duration,
    fetch_deadline: Duration,
    probe_path: String,
}

impl StatsClient {
    pub fn new(
        config: &GatewayConfig,
        transport: Arc<dyn Transport>,
        store: SharedStore,
        clock: SharedClock,
        sink: SharedSink,
    ) -> Self {
        let cancel = CancellationToken::new();
        let breaker = Arc::new(CircuitBreaker::new(
            "upstream",
            config.breaker.clone(),
            clock.clone(),
            sink.clone(),
        ));
        let retry = RetryExecutor::new(config.retries.clone(), sink.clone()).with_cancellation(cancel.clone());
        let cache = TieredCache::new(store, config.cache.clone(), clock.clone(), sink.clone());

        Self {
            transport,
            cache,
            breaker,
            pacer: RequestPacer::new(&config.pacer),
            retry,
            sink,
            clock,
            cancel,
            request_timeout: Duration::from_millis(config.upstream.request_timeout_ms),
            fetch_deadline: Duration::from_millis(config.upstream.fetch_deadline_ms),
            probe_path: config.upstream.probe_path.clone(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Abort in-flight retry sleeps and refuse further attempts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn fetch_player_by_name(&self, name: &str, platform: Platform) -> Fetched<Player> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return invalid_input("player name must be 1-64 characters");
        }

        let key = format!("player-name:{}:{}", platform, name.to_ascii_lowercase());
        let request = UpstreamRequest::new(format!("/shards/{}/players", platform), self.request_timeout)
            .param("filter[playerNames]", name);
        self.fetch(DataKind::Player, &key, "player_by_name", request, |body| {
            types::parse_player(body, platform)
        })
        .await
    }

    /// Lifetime stats when `season_id` is `None`.
    pub async fn fetch_player_stats(
        &self,
        player_id: &str,
        platform: Platform,
        season_id: Option<&str>,
    ) -> Fetched<PlayerStats> {
        if !valid_id(player_id) || season_id.is_some_and(|s| !valid_id(s)) {
            return invalid_input("malformed player or season id");
        }

        let season_segment = season_id.unwrap_or("lifetime");
        let key = format!("player:{}:stats:{}:{}", player_id, platform, season_segment);
        let request = UpstreamRequest::new(
            format!("/shards/{}/players/{}/seasons/{}", platform, player_id, season_segment),
            self.request_timeout,
        );
        self.fetch(DataKind::PlayerStats, &key, "player_stats", request, |body| {
            types::parse_player_stats(body, player_id, season_id)
        })
        .await
    }

    /// Leaderboard for a season, or the current season when `season_id` is `None`.
    pub async fn fetch_leaderboard(
        &self,
        platform: Platform,
        mode: GameMode,
        season_id: Option<&str>,
    ) -> Fetched<Vec<LeaderboardEntry>> {
        let season = match season_id {
            Some(id) if !valid_id(id) => return invalid_input("malformed season id"),
            Some(id) => id.to_string(),
            None => match self.fetch_current_season(platform).await.into_result() {
                Ok(season) => season.id,
                Err(fallback) => return fallback,
            },
        };

        let key = format!("leaderboard:{}:{}:{}", platform, season, mode);
        let request = UpstreamRequest::new(
            format!("/shards/{}/leaderboards/{}/{}", platform, season, mode),
            self.request_timeout,
        );
        self.fetch(DataKind::Leaderboard, &key, "leaderboard", request, types::parse_leaderboard)
            .await
    }

    pub async fn fetch_current_season(&self, platform: Platform) -> Fetched<Season> {
        let key = format!("season:{}:current", platform);
        let request = UpstreamRequest::new(format!("/shards/{}/seasons", platform), self.request_timeout);
        self.fetch(DataKind::Season, &key, "current_season", request, |body| {
            types::current_season(types::parse_seasons(body)?)
                .ok_or_else(|| UpstreamError::from_status(404, "no current season", None))
        })
        .await
    }

    /// Finished matches never change, so they are cached for a day.
    pub async fn fetch_match(&self, match_id: &str, platform: Platform) -> Fetched<MatchSummary> {
        if !valid_id(match_id) {
            return invalid_input("malformed match id");
        }
        let key = format!("match:{}:{}", platform, match_id);
        let request = UpstreamRequest::new(format!("/shards/{}/matches/{}", platform, match_id), self.request_timeout);
        self.fetch(DataKind::Match, &key, "match", request, types::parse_match)
            .await
    }

    /// Drop every cached entry for one player, both tiers.
    pub async fn invalidate_player(&self, player_id: &str) -> usize {
        let removed = self.cache.invalidate_prefix(&format!("player:{}:", player_id)).await;
        self.sink.log_event(
            Category::Cache,
            Severity::Info,
            "cache_invalidated",
            json!({ "player_id": player_id, "removed": removed }),
        );
        removed
    }

    /// One breaker-gated call to the probe endpoint. No pacing, no retries.
    pub async fn probe(&self, timeout: Duration) -> Result<(), UpstreamError> {
        let permit = self.admit()?;
        let result = self
            .transport
            .get(UpstreamRequest::new(self.probe_path.clone(), timeout))
            .await
            .map(|_| ());
        report(permit, &result);
        metrics::record_upstream_request("probe", outcome_label(&result));
        result
    }

    async fn fetch<T, P>(&self, kind: DataKind, key: &str, operation: &'static str, request: UpstreamRequest, parse: P) -> Fetched<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        P: Fn(&Value) -> Result<T, UpstreamError>,
    {
        if let Some(entry) = self.cache.get_fresh::<T>(kind, key).await {
            return Fetched::Cached(entry.value);
        }

        let attempt = self.call_upstream(operation, &request, &parse);
        let outcome = match tokio::time::timeout(self.fetch_deadline, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    operation,
                    key,
                    deadline_ms = self.fetch_deadline.as_millis() as u64,
                    "Upstream fetch exceeded its deadline"
                );
                metrics::record_upstream_request(operation, "deadline");
                Err(UpstreamError::timeout(self.fetch_deadline))
            }
        };

        match outcome {
            Ok(value) => {
                self.cache.put(kind, key, &value).await;
                Fetched::Live(value)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(operation, key, "Upstream reported not found");
                Fetched::NotFound
            }
            Err(e) => self.fallback(kind, key, operation, e).await,
        }
    }

    async fn call_upstream<T, P>(&self, operation: &'static str, request: &UpstreamRequest, parse: &P) -> Result<T, UpstreamError>
    where
        P: Fn(&Value) -> Result<T, UpstreamError>,
    {
        self.pacer.before_request().await;

        self.retry
            .execute(operation, move || async move {
                let permit = match self.admit() {
                    Ok(permit) => permit,
                    Err(refused) => return Err(refused),
                };
                let result = match self.transport.get(request.clone()).await {
                    Ok(response) => parse(&response.body),
                    Err(e) => Err(e),
                };
                report(permit, &result);
                metrics::record_upstream_request(operation, outcome_label(&result));
                result
            })
            .await
    }

    fn admit(&self) -> Result<BreakerPermit<'_>, UpstreamError> {
        self.breaker.try_acquire().ok_or_else(|| UpstreamError::BreakerOpen {
            retry_in: self.breaker.retry_in(),
        })
    }

    async fn fallback<T: DeserializeOwned>(&self, kind: DataKind, key: &str, operation: &str, cause: UpstreamError) -> Fetched<T> {
        match self.cache.get_stale::<T>(kind, key).await {
            Some(entry) => {
                let age_ms = entry.age(self.clock.epoch_millis()).as_millis() as u64;
                metrics::record_cache_event(kind.as_str(), "stale_serve");
                self.sink.log_event(
                    Category::Cache,
                    Severity::Warning,
                    "stale_served",
                    json!({
                        "operation": operation,
                        "key": key,
                        "age_ms": age_ms,
                        "cause": cause.to_string(),
                    }),
                );
                Fetched::Stale {
                    value: entry.value,
                    stored_at_ms: entry.stored_at_ms,
                    cause,
                }
            }
            None => {
                self.sink.log_event(
                    Category::Upstream,
                    Severity::Error,
                    "fetch_unavailable",
                    json!({ "operation": operation, "key": key, "error": cause.to_string() }),
                );
                Fetched::Unavailable(cause)
            }
        }
    }
}

impl<T> Fetched<T> {
    /// Split into the value or a `Fetched` of another type carrying the failure.
    fn into_result<U>(self) -> Result<T, Fetched<U>> {
        match self {
            Fetched::Live(v) | Fetched::Cached(v) | Fetched::Stale { value: v, .. } => Ok(v),
            Fetched::NotFound => Err(Fetched::NotFound),
            Fetched::Unavailable(e) => Err(Fetched::Unavailable(e)),
        }
    }
}

fn invalid_input<T>(detail: &str) -> Fetched<T> {
    Fetched::Unavailable(UpstreamError::Client {
        status: 400,
        detail: detail.to_string(),
    })
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Client errors prove the upstream answered. Outcomes that say nothing
/// about upstream health drop the permit and free its slot.
fn report<T>(permit: BreakerPermit<'_>, result: &Result<T, UpstreamError>) {
    match result {
        Ok(_) => permit.success(),
        Err(e) => match e.breaker_failure() {
            Some(true) => permit.failure(),
            Some(false) => permit.success(),
            None => drop(permit),
        },
    }
}

fn outcome_label<T>(result: &Result<T, UpstreamError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.label(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::schema::UpstreamMode;
    use crate::observability::MemorySink;
    use crate::resilience::{CircuitState, MockClock};
    use crate::upstream::offline::OfflineTransport;
    use crate::upstream::transport::UpstreamResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Plays back queued results, then fails with a timeout.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Value, UpstreamError>>>,
        calls: AtomicUsize,
        paths: Mutex<Vec<String>>,
        stalled: AtomicBool,
    }

    impl Scripted {
        fn push(&self, reply: Result<Value, UpstreamError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        /// While stalled, calls never complete.
        fn stall(&self, stalled: bool) {
            self.stalled.store(stalled, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().unwrap().push(request.path.clone());
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::timeout(request.timeout)));
            reply.map(|body| UpstreamResponse { status: 200, body })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct Harness {
        client: StatsClient,
        transport: Arc<Scripted>,
        clock: MockClock,
        sink: MemorySink,
    }

    fn harness() -> Harness {
        let mut config = GatewayConfig::default();
        config.upstream.mode = UpstreamMode::Offline;
        config.pacer.min_interval_ms = 10;
        let clock = MockClock::new();
        let sink = MemorySink::new();
        let transport = Arc::new(Scripted::default());
        let store: SharedStore = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let client = StatsClient::new(
            &config,
            transport.clone(),
            store,
            Arc::new(clock.clone()),
            Arc::new(sink.clone()),
        );
        Harness {
            client,
            transport,
            clock,
            sink,
        }
    }

    fn stats_body() -> Value {
        json!({ "data": { "attributes": { "gameModeStats": { "solo": { "roundsPlayed": 3, "wins": 1 } } } } })
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_then_cached() {
        let h = harness();
        h.transport.push(Ok(stats_body()));

        let first = h.client.fetch_player_stats("account.1", Platform::Steam, None).await;
        assert!(matches!(first, Fetched::Live(_)));
        let second = h.client.fetch_player_stats("account.1", Platform::Steam, None).await;
        assert!(matches!(second, Fetched::Cached(_)));

        assert_eq!(h.transport.calls(), 1);
        assert_eq!(h.sink.count("cache_hit"), 1);
        assert_eq!(
            h.transport.paths.lock().unwrap()[0],
            "/shards/steam/players/account.1/seasons/lifetime"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_single_call_and_keeps_breaker_closed() {
        let h = harness();
        h.transport.push(Err(UpstreamError::from_status(404, "no such player", None)));

        let result = h.client.fetch_player_by_name("ghost", Platform::Xbox).await;
        assert!(matches!(result, Fetched::NotFound));
        assert_eq!(h.transport.calls(), 1);
        assert_eq!(h.client.breaker().snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_served_after_fresh_expiry_and_failure() {
        let h = harness();
        h.transport.push(Ok(stats_body()));
        h.client.fetch_player_stats("account.1", Platform::Steam, None).await;

        h.clock.advance(Duration::from_secs(601));
        let result = h.client.fetch_player_stats("account.1", Platform::Steam, None).await;
        match result {
            Fetched::Stale { value, cause, .. } => {
                assert_eq!(value.modes["solo"].rounds_played, 3);
                assert!(matches!(cause, UpstreamError::Transient { .. }));
            }
            other => panic!("expected stale, got {:?}", other),
        }
        // 1 initial + 4 attempts
        assert_eq!(h.transport.calls(), 5);
        assert_eq!(h.sink.count("stale_served"), 1);
        assert_eq!(h.sink.count("retry_exhausted"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_without_shadow_copy() {
        let h = harness();
        let result = h.client.fetch_match("m-1", Platform::Steam).await;
        assert!(matches!(result, Fetched::Unavailable(UpstreamError::Transient { .. })));
        assert_eq!(h.sink.count("fetch_unavailable"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_blocks_calls() {
        let h = harness();
        // 4 failing attempts, then 1 more from the next fetch opens the breaker
        h.client.fetch_match("m-1", Platform::Steam).await;
        assert_eq!(h.transport.calls(), 4);
        h.client.fetch_match("m-2", Platform::Steam).await;
        assert_eq!(h.client.breaker().state(), CircuitState::Open);

        let before = h.transport.calls();
        let result = h.client.fetch_match("m-3", Platform::Steam).await;
        assert!(matches!(result, Fetched::Unavailable(UpstreamError::BreakerOpen { .. })));
        assert_eq!(h.transport.calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaderboard_resolves_current_season() {
        let h = harness();
        h.transport.push(Ok(json!({ "data": [
            { "type": "season", "id": "s-9", "attributes": { "isCurrentSeason": true } }
        ]})));
        h.transport.push(Ok(json!({ "data": { "type": "leaderboard" }, "included": [] })));

        let result = h.client.fetch_leaderboard(Platform::Steam, GameMode::SquadFpp, None).await;
        assert!(matches!(result, Fetched::Live(ref v) if v.is_empty()));
        let paths = h.transport.paths.lock().unwrap().clone();
        assert_eq!(paths, vec!["/shards/steam/seasons", "/shards/steam/leaderboards/s-9/squad-fpp"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaderboard_without_current_season_is_not_found() {
        let h = harness();
        h.transport.push(Ok(json!({ "data": [] })));
        let result = h.client.fetch_leaderboard(Platform::Psn, GameMode::Solo, None).await;
        assert!(matches!(result, Fetched::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_never_reaches_upstream() {
        let h = harness();
        let result = h.client.fetch_player_stats("../admin", Platform::Steam, None).await;
        assert!(matches!(result, Fetched::Unavailable(UpstreamError::Client { status: 400, .. })));
        let result = h.client.fetch_player_by_name("   ", Platform::Steam).await;
        assert!(matches!(result, Fetched::Unavailable(UpstreamError::Client { status: 400, .. })));
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_player_clears_both_tiers() {
        let h = harness();
        h.transport.push(Ok(stats_body()));
        h.client.fetch_player_stats("account.1", Platform::Steam, None).await;

        assert_eq!(h.client.invalidate_player("account.1").await, 2);
        let result = h.client.fetch_player_stats("account.1", Platform::Steam, None).await;
        assert!(matches!(result, Fetched::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retrying() {
        let h = harness();
        h.client.cancel();
        let result = h.client.fetch_match("m-1", Platform::Steam).await;
        assert!(matches!(result, Fetched::Unavailable(UpstreamError::Cancelled)));
        assert_eq!(h.transport.calls(), 0);
        assert_eq!(h.client.breaker().snapshot().consecutive_failures, 0);
    }

    async fn trip_breaker(h: &Harness) {
        h.client.fetch_match("m-1", Platform::Steam).await;
        h.client.fetch_match("m-2", Platform::Steam).await;
        assert_eq!(h.client.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_half_open_checks_do_not_wedge_breaker() {
        let h = harness();
        trip_breaker(&h).await;
        h.clock.advance(Duration::from_secs(60));

        h.transport.stall(true);
        for _ in 0..5 {
            let check = h.client.probe(Duration::from_secs(1));
            let abandoned = tokio::time::timeout(Duration::from_millis(50), check).await;
            assert!(abandoned.is_err());
        }
        let snap = h.client.breaker().snapshot();
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert_eq!(snap.half_open_probes_used, 0);

        h.transport.stall(false);
        for _ in 0..3 {
            h.transport.push(Ok(json!({})));
            assert!(h.client.probe(Duration::from_secs(1)).await.is_ok());
        }
        assert_eq!(h.client.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fetch_releases_half_open_slot() {
        let h = harness();
        trip_breaker(&h).await;
        h.clock.advance(Duration::from_secs(60));

        h.transport.stall(true);
        let dropped = tokio::time::timeout(
            Duration::from_millis(50),
            h.client.fetch_player_stats("account.9", Platform::Steam, None),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(h.client.breaker().snapshot().half_open_probes_used, 0);

        h.transport.stall(false);
        h.transport.push(Ok(stats_body()));
        let fetched = h.client.fetch_player_stats("account.9", Platform::Steam, None).await;
        assert!(matches!(fetched, Fetched::Live(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_serves_stale_copy() {
        let h = harness();
        h.transport.push(Ok(stats_body()));
        h.client.fetch_player_stats("account.1", Platform::Steam, None).await;
        h.clock.advance(Duration::from_secs(601));

        h.transport.stall(true);
        let start = tokio::time::Instant::now();
        let result = h.client.fetch_player_stats("account.1", Platform::Steam, None).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(12) && waited < Duration::from_secs(13), "{:?}", waited);
        match result {
            Fetched::Stale { value, cause, .. } => {
                assert_eq!(value.modes["solo"].rounds_played, 3);
                assert!(matches!(
                    cause,
                    UpstreamError::Transient {
                        kind: crate::upstream::TransientKind::Timeout,
                        ..
                    }
                ));
            }
            other => panic!("expected stale, got {:?}", other),
        }
        assert_eq!(h.client.breaker().snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_transport_end_to_end() {
        let mut config = GatewayConfig::default();
        config.upstream.mode = UpstreamMode::Offline;
        let client = StatsClient::new(
            &config,
            Arc::new(OfflineTransport::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MockClock::new()),
            Arc::new(MemorySink::new()),
        );
        let player = client
            .fetch_player_by_name("chocoTaco", Platform::Steam)
            .await
            .into_value()
            .unwrap();
        let stats = client.fetch_player_stats(&player.id, Platform::Steam, None).await;
        assert!(matches!(stats, Fetched::Live(_)));
        let board = client.fetch_leaderboard(Platform::Steam, GameMode::Squad, None).await;
        assert_eq!(board.into_value().unwrap().len(), 10);
        assert!(client.probe(Duration::from_secs(1)).await.is_ok());
    }
}
