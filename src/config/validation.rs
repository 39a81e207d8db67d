//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that live mode has a credential and a usable base URL
//! - Keep the upstream fetch deadline inside the inbound request timeout
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, UpstreamMode};

/// A single semantic problem, keyed by its dotted config path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    positive(&mut errors, "listener.request_timeout_secs", config.listener.request_timeout_secs);

    let upstream = &config.upstream;
    if upstream.mode == UpstreamMode::Live {
        match url::Url::parse(&upstream.base_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(_) => errors.push(ValidationError::new("upstream.base_url", "scheme must be http or https")),
            Err(e) => errors.push(ValidationError::new("upstream.base_url", e.to_string())),
        }
        if upstream.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            errors.push(ValidationError::new(
                "upstream.api_key",
                "live mode requires an API key (set STATSGATE_API_KEY or upstream.mode = \"offline\")",
            ));
        }
    }
    positive(&mut errors, "upstream.request_timeout_ms", upstream.request_timeout_ms);
    positive(&mut errors, "upstream.fetch_deadline_ms", upstream.fetch_deadline_ms);
    if upstream.fetch_deadline_ms < upstream.request_timeout_ms {
        errors.push(ValidationError::new(
            "upstream.fetch_deadline_ms",
            "must be >= upstream.request_timeout_ms",
        ));
    }
    // a leaderboard without a season chains two fetches
    let inbound_ms = config.listener.request_timeout_secs.saturating_mul(1_000);
    if inbound_ms <= upstream.fetch_deadline_ms.saturating_mul(2) {
        errors.push(ValidationError::new(
            "listener.request_timeout_secs",
            format!(
                "must exceed twice upstream.fetch_deadline_ms ({}ms) so stale data can be served",
                upstream.fetch_deadline_ms
            ),
        ));
    }
    if !upstream.probe_path.starts_with('/') {
        errors.push(ValidationError::new("upstream.probe_path", "must start with '/'"));
    }

    positive(&mut errors, "breaker.failure_threshold", config.breaker.failure_threshold as u64);
    positive(&mut errors, "breaker.open_timeout_ms", config.breaker.open_timeout_ms);
    positive(&mut errors, "breaker.half_open_max_probes", config.breaker.half_open_max_probes as u64);

    let retries = &config.retries;
    positive(&mut errors, "retries.base_delay_ms", retries.base_delay_ms);
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(ValidationError::new("retries.max_delay_ms", "must be >= base_delay_ms"));
    }
    if !(0.0..=1.0).contains(&retries.jitter_factor) {
        errors.push(ValidationError::new("retries.jitter_factor", "must be within 0.0..=1.0"));
    }

    let cache = &config.cache;
    for (field, value) in [
        ("cache.player_ttl_secs", cache.player_ttl_secs),
        ("cache.stats_ttl_secs", cache.stats_ttl_secs),
        ("cache.leaderboard_ttl_secs", cache.leaderboard_ttl_secs),
        ("cache.season_ttl_secs", cache.season_ttl_secs),
        ("cache.match_ttl_secs", cache.match_ttl_secs),
        ("cache.shadow_ttl_secs", cache.shadow_ttl_secs),
    ] {
        positive(&mut errors, field, value);
    }

    if config.health.enabled {
        positive(&mut errors, "health.interval_secs", config.health.interval_secs);
    }
    positive(&mut errors, "health.probe_timeout_ms", config.health.probe_timeout_ms);
    positive(&mut errors, "health.report_max_age_ms", config.health.report_max_age_ms);

    let limits = &config.limits;
    if !limits.rules.contains_key("default") {
        errors.push(ValidationError::new("limits.rules", "a 'default' rule is required"));
    }
    for (name, rule) in &limits.rules {
        positive(&mut errors, &format!("limits.rules.{}.window_ms", name), rule.window_ms);
        positive(&mut errors, &format!("limits.rules.{}.max_requests", name), rule.max_requests);
    }
    if !(limits.burst.capacity >= 1.0) {
        errors.push(ValidationError::new("limits.burst.capacity", "must be >= 1"));
    }
    if !(limits.burst.refill_per_second > 0.0) {
        errors.push(ValidationError::new("limits.burst.refill_per_second", "must be > 0"));
    }

    if config.abuse.enabled {
        positive(&mut errors, "abuse.violation_threshold", config.abuse.violation_threshold);
        positive(&mut errors, "abuse.violation_window_secs", config.abuse.violation_window_secs);
        positive(&mut errors, "abuse.hits_multiplier", config.abuse.hits_multiplier);
        positive(&mut errors, "abuse.block_duration_secs", config.abuse.block_duration_secs);
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than zero"));
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}
