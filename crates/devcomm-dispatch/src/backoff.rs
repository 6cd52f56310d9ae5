//! Retry delay policies.

use devcomm_core::constants::{DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS};
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Delay before the next attempt of a message that has failed
/// `retry_count` times.
pub trait BackoffPolicy: Debug + Send + Sync {
    fn delay(&self, retry_count: u32) -> Duration;
}

/// Same delay for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, _retry_count: u32) -> Duration {
        self.delay
    }
}

/// `base * factor^(retry_count - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, factor: u32, max: Duration) -> Self {
        Self { base, factor, max }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            factor: 2,
            max: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let multiplier = self.factor.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(multiplier)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Backoff as it appears in configuration files.
///
/// ```toml
/// [dispatch.backoff]
/// kind = "exponential"
/// base_ms = 5000
/// factor = 2
/// max_ms = 300000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        base_ms: u64,
        factor: u32,
        max_ms: u64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            base_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            factor: 2,
            max_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl BackoffConfig {
    pub fn build(&self) -> Arc<dyn BackoffPolicy> {
        match *self {
            BackoffConfig::Fixed { delay_ms } => {
                Arc::new(FixedBackoff::new(Duration::from_millis(delay_ms)))
            }
            BackoffConfig::Exponential {
                base_ms,
                factor,
                max_ms,
            } => Arc::new(ExponentialBackoff::new(
                Duration::from_millis(base_ms),
                factor,
                Duration::from_millis(max_ms),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 5)]
    #[case(1, 5)]
    #[case(2, 10)]
    #[case(3, 20)]
    #[case(7, 300)]
    #[case(40, 300)]
    fn test_exponential_delay(#[case] retry_count: u32, #[case] expected_secs: u64) {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay(retry_count), Duration::from_secs(expected_secs));
    }

    #[test]
    fn test_fixed_delay() {
        let backoff = FixedBackoff::new(Duration::from_millis(250));
        assert_eq!(backoff.delay(1), Duration::from_millis(250));
        assert_eq!(backoff.delay(9), Duration::from_millis(250));
    }

    #[test]
    fn test_config_from_toml() {
        let fixed: BackoffConfig = toml::from_str("kind = \"fixed\"\ndelay_ms = 100").unwrap();
        assert_eq!(fixed, BackoffConfig::Fixed { delay_ms: 100 });
        assert_eq!(fixed.build().delay(3), Duration::from_millis(100));

        let exp: BackoffConfig =
            toml::from_str("kind = \"exponential\"\nbase_ms = 10\nfactor = 3\nmax_ms = 50").unwrap();
        let policy = exp.build();
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(30));
        assert_eq!(policy.delay(3), Duration::from_millis(50));
    }
}
