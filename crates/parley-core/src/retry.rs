//! Retry configuration and backoff math.
//!
//! Two policies are used across the workspace:
//!
//! - [`RateLimitRetry`]: fixed delay, bounded count. Adapters use it for
//!   HTTP 429 responses.
//! - [`ReconnectBackoff`]: capped exponential delay. The fan-out layer uses it
//!   when the shared substrate drops.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Rate-limit retry
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of rate-limit retries.
pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 3;
/// Default delay between rate-limit retries in milliseconds.
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 3000;

/// Fixed-delay retry policy for rate-limited requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitRetry {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RateLimitRetry {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RATE_LIMIT_RETRIES,
            delay_ms: DEFAULT_RATE_LIMIT_DELAY_MS,
        }
    }
}

impl RateLimitRetry {
    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    /// Delay before the next attempt.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconnect backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Capped exponential reconnect policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectBackoff {
    /// Attempts before giving up.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 3000,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnect attempt `attempt` (zero-based), or `None`
    /// once the retry budget is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then(|| {
            Duration::from_millis(calculate_backoff_delay(
                attempt,
                self.base_delay_ms,
                self.max_delay_ms,
            ))
        })
    }
}

/// `min(max_delay, base_delay * 2^attempt)`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_defaults() {
        let policy = RateLimitRetry::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay(), Duration::from_secs(3));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(calculate_backoff_delay(0, 100, 3000), 100);
        assert_eq!(calculate_backoff_delay(1, 100, 3000), 200);
        assert_eq!(calculate_backoff_delay(4, 100, 3000), 1600);
        assert_eq!(calculate_backoff_delay(5, 100, 3000), 3000);
        assert_eq!(calculate_backoff_delay(40, 100, 3000), 3000);
    }

    #[test]
    fn reconnect_budget_is_bounded() {
        let policy = ReconnectBackoff::default();
        assert!(policy.delay_for(4).is_some());
        assert!(policy.delay_for(5).is_none());
    }

    #[test]
    fn deserialize_partial() {
        let policy: RateLimitRetry = serde_json::from_str(r#"{"maxRetries":1}"#).unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.delay_ms, DEFAULT_RATE_LIMIT_DELAY_MS);
    }
}
