//! Retry configuration and backoff calculation.
//!
//! The async retry loop lives in `aac-prepare` next to the fetcher; this
//! module only holds the portable building blocks:
//!
//! - [`RetryConfig`]: retry parameters (max retries, backoff, jitter)
//! - [`calculate_backoff_delay_with_random`]: capped exponential backoff with jitter
//! - [`parse_retry_after_seconds`]: numeric `Retry-After` header values

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// No retries at all; used by tests and one-shot checks.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), using `random` in `[0, 1)`.
    pub fn delay_ms(&self, attempt: u32, random: f64) -> u64 {
        calculate_backoff_delay_with_random(
            attempt.saturating_sub(1),
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate backoff delay with explicit randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (2r - 1) * jitter)`
/// where `random` (`r`) should be a value in `[0.0, 1.0)` from a PRNG.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    // Maps random [0,1) to [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

/// Parse a numeric `Retry-After` header value into milliseconds.
#[must_use]
pub fn parse_retry_after_seconds(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|s| s.saturating_mul(1000))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn retry_config_serde_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"maxRetries": 7}"#).unwrap();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.base_delay_ms, 1000);
    }

    #[test]
    fn backoff_exponential_growth() {
        let d: Vec<u64> = (0..4)
            .map(|a| calculate_backoff_delay_with_random(a, 1000, 60_000, 0.0, 0.5))
            .collect();
        assert_eq!(d, [1000, 2000, 4000, 8000]);
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(
            calculate_backoff_delay_with_random(20, 1000, 60_000, 0.2, 0.5),
            60_000
        );
    }

    #[test]
    fn backoff_jitter_bounds() {
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 0.0), 800);
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 1.0), 1200);
    }

    #[test]
    fn backoff_high_attempt_no_overflow() {
        let delay = calculate_backoff_delay_with_random(100, u64::MAX / 2, u64::MAX, 0.0, 0.5);
        assert!(delay > 0);
    }

    #[test]
    fn delay_ms_is_one_based() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_ms(1, 0.3), 1000);
        assert_eq!(config.delay_ms(2, 0.3), 2000);
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after_seconds("120"), Some(120_000));
        assert_eq!(parse_retry_after_seconds(" 1 "), Some(1000));
        assert_eq!(parse_retry_after_seconds("Thu, 01 Dec 2025"), None);
    }
}
