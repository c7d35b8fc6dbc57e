//! Backoff policy for repeated attempts.
//!
//! ```text
//! delay(n) = min(max_delay, initial_delay × backoff_factor^(n−1))
//! ```
//!
//! `n` is the number of the attempt that just failed, so the first retry
//! waits `initial_delay`. With jitter enabled the delay is drawn uniformly
//! from `[0, delay(n)]`.

use rand::Rng;
use std::time::Duration;

use crate::result::{TenazError, TenazResult};

/// Default number of attempts, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default growth factor
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Validated retry policy. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Build and validate a policy.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::InvalidPolicy`] if `max_attempts` is zero, the
    /// factor is below 1 or not finite, or `max_delay < initial_delay`.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
        jitter: bool,
    ) -> TenazResult<Self> {
        if max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(invalid(format!(
                "backoff_factor must be a finite number >= 1, got {backoff_factor}"
            )));
        }
        if max_delay < initial_delay {
            return Err(invalid(format!(
                "max_delay ({}ms) must be >= initial_delay ({}ms)",
                max_delay.as_millis(),
                initial_delay.as_millis()
            )));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
            jitter,
        })
    }

    /// Start a builder seeded with the defaults
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that never retries
    #[must_use]
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Maximum attempts, including the first
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Growth factor
    #[must_use]
    pub const fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Delay cap
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether delays are randomized
    #[must_use]
    pub const fn jitter(&self) -> bool {
        self.jitter
    }

    /// Deterministic delay after failed attempt `n` (1-based; 0 is treated as 1)
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let cap = self.max_delay.as_secs_f64();
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        if secs.is_finite() && secs < cap {
            Duration::from_secs_f64(secs).min(self.max_delay)
        } else {
            self.max_delay
        }
    }

    /// Delay after failed attempt `n`, with jitter applied if enabled
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let nanos = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
    }

    /// Deterministic delays between consecutive attempts
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|n| self.base_delay(n))
    }
}

fn invalid(message: impl Into<String>) -> TenazError {
    TenazError::InvalidPolicy {
        message: message.into(),
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_attempts: p.max_attempts,
            initial_delay: p.initial_delay,
            backoff_factor: p.backoff_factor,
            max_delay: p.max_delay,
            jitter: p.jitter,
        }
    }
}

impl RetryPolicyBuilder {
    /// Set maximum attempts
    #[must_use]
    pub const fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set initial delay
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set growth factor
    #[must_use]
    pub const fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set delay cap
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub const fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// See [`RetryPolicy::new`].
    pub fn build(self) -> TenazResult<RetryPolicy> {
        RetryPolicy::new(
            self.max_attempts,
            self.initial_delay,
            self.backoff_factor,
            self.max_delay,
            self.jitter,
        )
    }
}
