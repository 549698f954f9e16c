use serde::Deserialize;
use std::time::Duration;

use crate::retry::{DelayMethod, Retry};

/// Default timeout for rollbacks that run after the caller's context is done.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Construction-time settings for a [`RetryTransaction`](crate::RetryTransaction).
///
/// Defaults to a single attempt with no delay and a 30 second grace period.
/// Can also be deserialized from a flat settings table:
///
/// ```
/// # use postgres_tx_retry::Config;
/// let config: Config = serde_json::from_str(
///     r#"{ "attempts": 5, "delay_ms": 20, "delay_method": "incremental" }"#,
/// ).unwrap();
/// assert_eq!(config.retry.attempts, 5);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "ConfigFile")]
pub struct Config {
    pub retry: Retry,
    pub grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: Retry::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole retry policy.
    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the attempt count and the delay between attempts.
    pub fn retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry.attempts = attempts;
        self.retry.delay = delay;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    pub fn delay_method(mut self, method: DelayMethod) -> Self {
        self.retry.method = method;
        self
    }

    /// Sets the timeout of the context used for rollbacks after the caller's
    /// context has been cancelled.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    attempts: u32,
    delay_ms: u64,
    delay_method: DelayMethod,
    grace_period_ms: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let config = Config::default();
        Self {
            attempts: config.retry.attempts,
            delay_ms: config.retry.delay.as_millis() as u64,
            delay_method: config.retry.method,
            grace_period_ms: config.grace_period.as_millis() as u64,
        }
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Config::new()
            .retry(file.attempts, Duration::from_millis(file.delay_ms))
            .delay_method(file.delay_method)
            .grace_period(Duration::from_millis(file.grace_period_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retry.attempts, 1);
        assert_eq!(config.retry.delay, Duration::ZERO);
        assert!(matches!(config.retry.method, DelayMethod::Standard));
        assert_eq!(config.grace_period, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_methods() {
        let config = Config::new()
            .retry(4, Duration::from_millis(50))
            .delay_method(DelayMethod::Exponential)
            .grace_period(Duration::from_secs(5));
        assert_eq!(config.retry.attempts, 4);
        assert_eq!(config.retry.delay, Duration::from_millis(50));
        assert!(matches!(config.retry.method, DelayMethod::Exponential));
        assert_eq!(config.grace_period, Duration::from_secs(5));

        let config = config.with_retry(Retry::new(2, Duration::ZERO)).attempts(9);
        assert_eq!(config.retry.attempts, 9);
        assert!(matches!(config.retry.method, DelayMethod::Standard));
    }

    #[test]
    fn test_deserialize_full_table() {
        let config: Config = serde_json::from_str(
            r#"{
                "attempts": 10,
                "delay_ms": 250,
                "delay_method": "exponential",
                "grace_period_ms": 2000
            }"#,
        )
        .unwrap();
        assert_eq!(config.retry.attempts, 10);
        assert_eq!(config.retry.delay, Duration::from_millis(250));
        assert!(matches!(config.retry.method, DelayMethod::Exponential));
        assert_eq!(config.grace_period, Duration::from_secs(2));
    }

    #[test]
    fn test_deserialize_missing_keys_use_defaults() {
        let config: Config = serde_json::from_str(r#"{ "attempts": 3 }"#).unwrap();
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.grace_period, DEFAULT_GRACE_PERIOD);
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let result: Result<Config, _> = serde_json::from_str(r#"{ "retries": 3 }"#);
        assert!(result.is_err());
    }
}
