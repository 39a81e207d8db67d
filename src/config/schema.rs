//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the stats gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound HTTP listener.
    pub listener: ListenerConfig,

    /// Upstream statistics API.
    pub upstream: UpstreamConfig,

    /// Outbound request pacing.
    pub pacer: PacerConfig,

    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,

    /// Retry policy for upstream calls.
    pub retries: RetryConfig,

    /// Response cache TTLs.
    pub cache: CacheConfig,

    /// Periodic health checks.
    pub health: HealthConfig,

    /// Inbound rate limit rules.
    pub limits: LimitsConfig,

    /// Automatic blocking of abusive identifiers.
    pub abuse: AbuseConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whole-request timeout for inbound calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// How upstream data is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamMode {
    /// Real HTTP calls to `base_url`.
    #[default]
    Live,
    /// Deterministic synthetic data, no network.
    Offline,
}

/// Upstream API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub mode: UpstreamMode,

    /// API root, e.g. "https://api.pubg.com".
    pub base_url: String,

    /// Bearer credential. Usually supplied through `STATSGATE_API_KEY`.
    pub api_key: Option<String>,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Budget for one fetch including pacing, retries and backoff. When it
    /// runs out the caller gets the shadow copy, if any. Must leave room
    /// inside `listener.request_timeout_secs` for two chained fetches.
    pub fetch_deadline_ms: u64,

    /// Path of the lightweight health probe endpoint.
    pub probe_path: String,

    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            mode: UpstreamMode::Live,
            base_url: "https://api.pubg.com".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
            fetch_deadline_ms: 12_000,
            probe_path: "/status".to_string(),
            user_agent: concat!("statsgate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PacerConfig {
    /// Minimum spacing between upstream requests in milliseconds.
    pub min_interval_ms: u64,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self { min_interval_ms: 1_000 }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing, in milliseconds.
    pub open_timeout_ms: u64,

    /// Probes admitted while half-open; that many successes close it.
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
            half_open_max_probes: 3,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Relative jitter, e.g. 0.1 for ±10%.
    pub jitter_factor: f64,

    /// Lower bound applied after jitter, in milliseconds.
    pub min_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
            min_delay_ms: 100,
        }
    }
}

/// Response cache TTLs, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub player_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    pub leaderboard_ttl_secs: u64,
    pub season_ttl_secs: u64,
    pub match_ttl_secs: u64,

    /// Lifetime of the stale-fallback copy.
    pub shadow_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            player_ttl_secs: 3_600,
            stats_ttl_secs: 600,
            leaderboard_ttl_secs: 900,
            season_ttl_secs: 21_600,
            match_ttl_secs: 86_400,
            shadow_ttl_secs: 7 * 86_400,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the periodic health monitor.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Timeout of the upstream probe in milliseconds.
    pub probe_timeout_ms: u64,

    /// `GET /health` reuses a report younger than this instead of probing.
    pub report_max_age_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            probe_timeout_ms: 3_000,
            report_max_age_ms: 5_000,
        }
    }
}

/// A fixed-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    pub window_ms: u64,
    pub max_requests: u64,
}

/// A token bucket rule.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BurstRule {
    pub capacity: f64,
    pub refill_per_second: f64,
}

/// Inbound rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Enable admission control on the HTTP surface.
    pub enabled: bool,

    /// Named fixed-window rules. `default` applies to routes without their own.
    pub rules: HashMap<String, RateLimitRule>,

    pub burst: BurstRule,
}

impl LimitsConfig {
    /// Rule by name, falling back to `default`.
    pub fn rule(&self, name: &str) -> Option<RateLimitRule> {
        self.rules.get(name).or_else(|| self.rules.get("default")).copied()
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            "default".to_string(),
            RateLimitRule {
                window_ms: 60_000,
                max_requests: 100,
            },
        );
        rules.insert(
            "lookup".to_string(),
            RateLimitRule {
                window_ms: 60_000,
                max_requests: 30,
            },
        );
        rules.insert(
            "leaderboard".to_string(),
            RateLimitRule {
                window_ms: 60_000,
                max_requests: 10,
            },
        );
        Self {
            enabled: true,
            rules,
            burst: BurstRule {
                capacity: 10.0,
                refill_per_second: 1.0,
            },
        }
    }
}

/// Abuse blocking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AbuseConfig {
    pub enabled: bool,

    /// Violations within `violation_window_secs` that trigger a block.
    pub violation_threshold: u64,

    pub violation_window_secs: u64,

    /// Block at once when one window's hits exceed `limit * hits_multiplier`.
    pub hits_multiplier: u64,

    pub block_duration_secs: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            violation_threshold: 5,
            violation_window_secs: 600,
            hits_multiplier: 3,
            block_duration_secs: 900,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
