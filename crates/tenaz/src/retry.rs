//! Retry controller.
//!
//! Wraps an attempt (resolve + act) with a [`RetryPolicy`]:
//!
//! ```text
//! Attempting ──ok──────────────────────────────► Success
//!     │
//!     ├─retryable, attempts < max──► sleep(delay(n)) ──► Attempting
//!     ├─retryable, attempts == max─► RetryExhausted (full history)
//!     └─not retryable──────────────► error returned as-is
//! ```
//!
//! A non-retryable failure is surfaced immediately and is not counted as a
//! used attempt.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;
use crate::locator::LocatorSpec;
use crate::result::{TenazError, TenazResult};

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// Locator that produced the element, or every locator tried when
    /// resolution failed (`css=#a -> id=b`)
    pub locator: Option<String>,
    /// Failure description
    pub reason: String,
    /// Wall-clock time the attempt failed
    pub at: DateTime<Utc>,
    /// Time since the first attempt started
    pub elapsed: Duration,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt {}", self.attempt)?;
        if let Some(ref locator) = self.locator {
            write!(f, " [{locator}]")?;
        }
        write!(
            f,
            " at {} (+{}ms): {}",
            self.at.format("%H:%M:%S%.3f"),
            self.elapsed.as_millis(),
            self.reason
        )
    }
}

/// Every allowed attempt failed with a retryable error
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted {
    /// What was being attempted, e.g. `click [css=#save]`
    pub action: String,
    /// History, oldest first
    pub attempts: Vec<AttemptRecord>,
    /// Total time including backoff
    pub elapsed: Duration,
}

impl RetryExhausted {
    /// The last recorded failure
    #[must_use]
    pub fn last(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s) ({:.2}s):",
            self.action,
            self.attempts.len(),
            self.elapsed.as_secs_f64()
        )?;
        for record in &self.attempts {
            write!(f, "\n  {record}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RetryExhausted {}

/// Result of [`with_retry_outcome`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final value or error
    pub result: TenazResult<T>,
    /// Attempts consumed
    pub attempts: u32,
    /// Total time including backoff
    pub elapsed: Duration,
    /// Failed attempts, oldest first
    pub history: Vec<AttemptRecord>,
}

/// Locator (or chain) an attempt error refers to, if any
fn locator_of(err: &TenazError) -> Option<String> {
    match err {
        TenazError::ActionabilityTimeout { locator, .. } | TenazError::Interaction { locator, .. } => {
            Some(locator.to_string())
        }
        TenazError::Resolution(failure) => Some(
            failure
                .chain
                .iter()
                .map(LocatorSpec::to_string)
                .collect::<Vec<_>>()
                .join(" -> "),
        ),
        _ => None,
    }
}

/// Run `operation` under `policy` and return the value or the final error.
///
/// # Errors
///
/// Returns [`TenazError::RetryExhausted`] once every attempt failed with a
/// retryable error, or the first non-retryable error unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    action: &str,
    operation: F,
) -> TenazResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TenazResult<T>>,
{
    with_retry_outcome(policy, action, operation).await.result
}

/// Run `operation` under `policy`, returning attempt details as well.
///
/// `operation` receives the 1-based attempt number.
pub async fn with_retry_outcome<T, F, Fut>(
    policy: &RetryPolicy,
    action: &str,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TenazResult<T>>,
{
    let start = Instant::now();
    let mut history: Vec<AttemptRecord> = Vec::new();
    let mut attempt = 0_u32;

    loop {
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(action, total_attempts = attempt, "succeeded after retries");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                    history,
                };
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!(action, attempt, error = %err, "non-retryable failure");
            return RetryOutcome {
                result: Err(err),
                attempts: attempt - 1,
                elapsed: start.elapsed(),
                history,
            };
        }

        history.push(AttemptRecord {
            attempt,
            locator: locator_of(&err),
            reason: err.to_string(),
            at: Utc::now(),
            elapsed: start.elapsed(),
        });

        if attempt >= policy.max_attempts() {
            let elapsed = start.elapsed();
            warn!(
                action,
                attempt,
                max_attempts = policy.max_attempts(),
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "giving up after all attempts"
            );
            let exhausted = RetryExhausted {
                action: action.to_string(),
                attempts: history.clone(),
                elapsed,
            };
            return RetryOutcome {
                result: Err(exhausted.into()),
                attempts: attempt,
                elapsed,
                history,
            };
        }

        let delay = policy.delay(attempt);
        debug!(
            action,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "retrying after failure"
        );
        tokio::time::sleep(delay).await;
    }
}
