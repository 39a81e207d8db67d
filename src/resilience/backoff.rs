//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::schema::RetryConfig;

/// Un-jittered delay before retry number `attempt + 1`: `min(base * 2^attempt, max)`.
pub fn base_delay(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

/// Jittered backoff for a zero-based attempt number.
///
/// The delay is spread by `± delay * jitter_factor` and clamped to
/// `[min_delay_ms, max_delay_ms]`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let delay = base_delay(attempt, config.base_delay_ms, config.max_delay_ms) as f64;
    let spread: f64 = if config.jitter_factor > 0.0 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    } else {
        0.0
    };
    let jittered = delay + delay * config.jitter_factor * spread;
    let floor = config.min_delay_ms.min(config.max_delay_ms) as f64;
    let clamped = jittered.clamp(floor, config.max_delay_ms as f64);
    Duration::from_millis(clamped.round() as u64)
}
