use crate::backoff::BackoffConfig;
use devcomm_core::constants::{DEFAULT_MAX_RETRY_COUNT, DEFAULT_PROCESS_TIMEOUT_MS};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Dispatch coordinator configuration
///
/// Durations are read from `*_ms` keys when deserialized.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Messages processed at the same time across all devices
    pub max_concurrency: usize,

    /// Queued messages per device before submitters wait
    pub lane_capacity: usize,

    /// A device lane with nothing to do for this long is torn down
    #[serde(rename = "lane_idle_timeout_ms", deserialize_with = "millis")]
    pub lane_idle_timeout: Duration,

    /// Upper bound for one process attempt, downstream call included
    #[serde(rename = "process_timeout_ms", deserialize_with = "millis")]
    pub process_timeout: Duration,

    /// Overall deadline of a batch submission
    #[serde(rename = "batch_deadline_ms", deserialize_with = "millis")]
    pub batch_deadline: Duration,

    /// Attempts allowed for retryable failures
    pub max_retry_count: u32,

    #[serde(rename = "retry_sweep_interval_ms", deserialize_with = "millis")]
    pub retry_sweep_interval: Duration,

    /// Records claimed per sweep
    pub retry_sweep_batch: usize,

    pub backoff: BackoffConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            lane_capacity: 256,
            lane_idle_timeout: Duration::from_secs(60),
            process_timeout: Duration::from_millis(DEFAULT_PROCESS_TIMEOUT_MS),
            batch_deadline: Duration::from_secs(30),
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            retry_sweep_interval: Duration::from_secs(1),
            retry_sweep_batch: 100,
            backoff: BackoffConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn lane_capacity(mut self, capacity: usize) -> Self {
        self.lane_capacity = capacity;
        self
    }

    pub fn lane_idle_timeout(mut self, timeout: Duration) -> Self {
        self.lane_idle_timeout = timeout;
        self
    }

    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = deadline;
        self
    }

    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = count;
        self
    }

    pub fn retry_sweep_interval(mut self, interval: Duration) -> Self {
        self.retry_sweep_interval = interval;
        self
    }

    pub fn retry_sweep_batch(mut self, batch: usize) -> Self {
        self.retry_sweep_batch = batch;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_retry_count, 3);
        assert_eq!(config.process_timeout, Duration::from_secs(3));
        assert!(config.max_concurrency > 0);
        assert!(matches!(config.backoff, BackoffConfig::Exponential { .. }));
    }

    #[test]
    fn test_builder() {
        let config = DispatchConfig::new()
            .max_concurrency(4)
            .lane_capacity(8)
            .lane_idle_timeout(Duration::from_secs(5))
            .process_timeout(Duration::from_millis(100))
            .batch_deadline(Duration::from_secs(2))
            .max_retry_count(5)
            .retry_sweep_interval(Duration::from_millis(50))
            .retry_sweep_batch(10)
            .backoff(BackoffConfig::Fixed { delay_ms: 1 });

        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.lane_capacity, 8);
        assert_eq!(config.lane_idle_timeout, Duration::from_secs(5));
        assert_eq!(config.process_timeout, Duration::from_millis(100));
        assert_eq!(config.batch_deadline, Duration::from_secs(2));
        assert_eq!(config.max_retry_count, 5);
        assert_eq!(config.retry_sweep_interval, Duration::from_millis(50));
        assert_eq!(config.retry_sweep_batch, 10);
        assert_eq!(config.backoff, BackoffConfig::Fixed { delay_ms: 1 });
    }

    #[test]
    fn test_deserialize_millis_keys() {
        let config: DispatchConfig = toml::from_str(
            r#"
            max_concurrency = 2
            process_timeout_ms = 1500
            retry_sweep_interval_ms = 250
            lane_idle_timeout_ms = 750

            [backoff]
            kind = "fixed"
            delay_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.process_timeout, Duration::from_millis(1500));
        assert_eq!(config.retry_sweep_interval, Duration::from_millis(250));
        assert_eq!(config.lane_idle_timeout, Duration::from_millis(750));
        assert_eq!(config.backoff, BackoffConfig::Fixed { delay_ms: 10 });
        // untouched keys keep their defaults
        assert_eq!(config.lane_capacity, 256);
        assert_eq!(config.batch_deadline, Duration::from_secs(30));
    }
}
