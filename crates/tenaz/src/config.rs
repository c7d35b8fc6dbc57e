//! Engine configuration
//!
//! All defaults live here and are injected into the engine at construction.
//! Configuration can also be read from a flat key/value set, either as string
//! pairs or as a YAML map:
//!
//! ```yaml
//! timeout_ms: 20000
//! conditional_timeout_ms: 5000
//! poll_interval_ms: 500
//! verify_timeout_ms: 5000
//! chain_timeout_ms: 30000
//! retry.max_attempts: 3
//! retry.initial_delay_ms: 500
//! retry.backoff_factor: 2.0
//! retry.max_delay_ms: 10000
//! retry.jitter: false
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::result::{TenazError, TenazResult};
use crate::wait::{WaitOptions, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};

/// Default per-attempt timeout for conditional actions (5 seconds)
pub const DEFAULT_CONDITIONAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for a verification to pass (5 seconds)
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct EngineConfig {
    /// Per-attempt timeout for "must be present" actions
    pub default_timeout: Duration,
    /// Per-attempt timeout for "may be absent" actions
    pub conditional_timeout: Duration,
    /// Sleep between polls
    pub poll_interval: Duration,
    /// How long a verification keeps re-checking
    pub verify_timeout: Duration,
    /// Optional cap on one walk of a locator chain
    pub chain_timeout: Option<Duration>,
    /// Retry policy used when a call does not pass its own
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_WAIT_TIMEOUT,
            conditional_timeout: DEFAULT_CONDITIONAL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            chain_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default per-attempt timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set conditional per-attempt timeout
    #[must_use]
    pub const fn with_conditional_timeout(mut self, timeout: Duration) -> Self {
        self.conditional_timeout = timeout;
        self
    }

    /// Set poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set verification timeout
    #[must_use]
    pub const fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Cap each locator chain walk
    #[must_use]
    pub const fn with_chain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.chain_timeout = timeout;
        self
    }

    /// Set default retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Wait options for explicit waits with the default timeout
    #[must_use]
    pub const fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout: self.default_timeout,
            poll_interval: self.poll_interval,
        }
    }

    /// Parse from string pairs such as `("timeout_ms", "20000")`.
    ///
    /// Unset keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Config`] for unknown keys, values of the wrong
    /// type, or values that fail validation.
    pub fn from_pairs<I, K, V>(pairs: I) -> TenazResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = Map::new();
        for (key, value) in pairs {
            let raw = value.as_ref().trim();
            let parsed =
                serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.into()));
            map.insert(key.as_ref().trim().to_string(), parsed);
        }
        serde_json::from_value(Value::Object(map)).map_err(|e| config_error(e.to_string()))
    }

    /// Parse a flat YAML map.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Config`] for malformed YAML, unknown keys, or
    /// invalid values.
    pub fn from_yaml_str(yaml: &str) -> TenazResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(yaml).map_err(|e| config_error(e.to_string()))
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Config`] for a zero poll interval or a zero chain
    /// budget.
    pub fn validate(&self) -> TenazResult<()> {
        if self.poll_interval.is_zero() {
            return Err(config_error("poll_interval_ms must be greater than 0"));
        }
        if self.chain_timeout.is_some_and(|t| t.is_zero()) {
            return Err(config_error("chain_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> TenazError {
    TenazError::Config {
        message: message.into(),
    }
}

/// Flat on-disk shape
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    timeout_ms: Option<u64>,
    conditional_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    verify_timeout_ms: Option<u64>,
    chain_timeout_ms: Option<u64>,
    #[serde(rename = "retry.max_attempts")]
    retry_max_attempts: Option<u32>,
    #[serde(rename = "retry.initial_delay_ms")]
    retry_initial_delay_ms: Option<u64>,
    #[serde(rename = "retry.backoff_factor")]
    retry_backoff_factor: Option<f64>,
    #[serde(rename = "retry.max_delay_ms")]
    retry_max_delay_ms: Option<u64>,
    #[serde(rename = "retry.jitter")]
    retry_jitter: Option<bool>,
}

impl TryFrom<RawConfig> for EngineConfig {
    type Error = String;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let defaults = Self::default();
        let ms = Duration::from_millis;
        let retry_defaults = &defaults.retry;

        let retry = RetryPolicy::new(
            raw.retry_max_attempts
                .unwrap_or_else(|| retry_defaults.max_attempts()),
            raw.retry_initial_delay_ms
                .map_or(retry_defaults.initial_delay(), ms),
            raw.retry_backoff_factor
                .unwrap_or_else(|| retry_defaults.backoff_factor()),
            raw.retry_max_delay_ms
                .map_or(retry_defaults.max_delay(), ms),
            raw.retry_jitter.unwrap_or_else(|| retry_defaults.jitter()),
        )
        .map_err(|e| e.to_string())?;

        let config = Self {
            default_timeout: raw.timeout_ms.map_or(defaults.default_timeout, ms),
            conditional_timeout: raw
                .conditional_timeout_ms
                .map_or(defaults.conditional_timeout, ms),
            poll_interval: raw.poll_interval_ms.map_or(defaults.poll_interval, ms),
            verify_timeout: raw.verify_timeout_ms.map_or(defaults.verify_timeout, ms),
            chain_timeout: raw.chain_timeout_ms.map(ms),
            retry,
        };
        config.validate().map_err(|e| match e {
            TenazError::Config { message } => message,
            other => other.to_string(),
        })?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod default_tests {
        use super::*;

        #[test]
        fn test_documented_defaults() {
            let c = EngineConfig::default();
            assert_eq!(c.default_timeout, Duration::from_secs(20));
            assert_eq!(c.conditional_timeout, Duration::from_secs(5));
            assert_eq!(c.poll_interval, Duration::from_millis(500));
            assert_eq!(c.verify_timeout, Duration::from_secs(5));
            assert_eq!(c.chain_timeout, None);
            assert_eq!(c.retry, RetryPolicy::default());
        }

        #[test]
        fn test_builder() {
            let c = EngineConfig::new()
                .with_default_timeout(Duration::from_secs(3))
                .with_chain_timeout(Some(Duration::from_secs(9)));
            assert_eq!(c.wait_options().timeout, Duration::from_secs(3));
            assert_eq!(c.chain_timeout, Some(Duration::from_secs(9)));
        }
    }

    mod pairs_tests {
        use super::*;

        #[test]
        fn test_from_pairs_overrides() {
            let c = EngineConfig::from_pairs([
                ("timeout_ms", "1000"),
                ("poll_interval_ms", "25"),
                ("retry.max_attempts", "5"),
                ("retry.jitter", "true"),
            ])
            .unwrap();
            assert_eq!(c.default_timeout, Duration::from_secs(1));
            assert_eq!(c.poll_interval, Duration::from_millis(25));
            assert_eq!(c.retry.max_attempts(), 5);
            assert!(c.retry.jitter());
            assert_eq!(c.conditional_timeout, DEFAULT_CONDITIONAL_TIMEOUT);
        }

        #[test]
        fn test_from_pairs_empty_is_default() {
            let c = EngineConfig::from_pairs(Vec::<(String, String)>::new()).unwrap();
            assert_eq!(c, EngineConfig::default());
        }

        #[test]
        fn test_unknown_key_rejected() {
            let err = EngineConfig::from_pairs([("timeout", "10")]).unwrap_err();
            assert!(matches!(err, TenazError::Config { .. }));
        }

        #[test]
        fn test_wrong_type_rejected() {
            let err = EngineConfig::from_pairs([("timeout_ms", "soon")]).unwrap_err();
            assert!(matches!(err, TenazError::Config { .. }));
        }

        #[test]
        fn test_invalid_retry_is_config_error() {
            let err = EngineConfig::from_pairs([("retry.max_attempts", "0")]).unwrap_err();
            match err {
                TenazError::Config { message } => assert!(message.contains("max_attempts")),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_zero_poll_interval_rejected() {
            assert!(EngineConfig::from_pairs([("poll_interval_ms", "0")]).is_err());
        }
    }

    mod yaml_tests {
        use super::*;

        #[test]
        fn test_from_yaml() {
            let yaml = r"
timeout_ms: 15000
chain_timeout_ms: 30000
retry.backoff_factor: 1.5
retry.max_delay_ms: 4000
";
            let c = EngineConfig::from_yaml_str(yaml).unwrap();
            assert_eq!(c.default_timeout, Duration::from_secs(15));
            assert_eq!(c.chain_timeout, Some(Duration::from_secs(30)));
            assert!((c.retry.backoff_factor() - 1.5).abs() < f64::EPSILON);
            assert_eq!(c.retry.max_delay(), Duration::from_secs(4));
        }

        #[test]
        fn test_empty_yaml_is_default() {
            assert_eq!(
                EngineConfig::from_yaml_str("  \n").unwrap(),
                EngineConfig::default()
            );
        }

        #[test]
        fn test_malformed_yaml() {
            assert!(matches!(
                EngineConfig::from_yaml_str("timeout_ms: [1, 2"),
                Err(TenazError::Config { .. })
            ));
        }

        #[test]
        fn test_negative_backoff_rejected() {
            assert!(EngineConfig::from_yaml_str("retry.backoff_factor: 0.5").is_err());
        }
    }
}
