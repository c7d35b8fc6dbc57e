//! Soft assertions
//!
//! Collect verification failures without stopping the test, then report them
//! together as one error.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::AssertionFailure;

/// Soft assertions collector
///
/// ## Example
///
/// ```ignore
/// engine.verify(&chain, Predicate::Visible, VerifyMode::Soft).await?;
/// engine.verify(&other, Predicate::text("Saved"), VerifyMode::Soft).await?;
/// // both are checked; any failures surface here
/// engine.soft().verify()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SoftAssertions {
    failures: Vec<AssertionFailure>,
    assertion_count: usize,
}

impl SoftAssertions {
    /// Create a new soft assertions collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a passing check
    pub fn record_pass(&mut self) {
        self.assertion_count += 1;
    }

    /// Count a failing check and keep it
    pub fn record_failure(&mut self, failure: AssertionFailure) {
        self.assertion_count += 1;
        let index = self.failures.len();
        self.failures.push(failure.with_index(index));
    }

    /// Record a verdict from a verifier
    pub fn record(&mut self, verdict: Result<(), AssertionFailure>) {
        match verdict {
            Ok(()) => self.record_pass(),
            Err(failure) => self.record_failure(failure),
        }
    }

    /// Get all failures
    #[must_use]
    pub fn failures(&self) -> &[AssertionFailure] {
        &self.failures
    }

    /// Get the number of failures
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Get the total number of assertions checked
    #[must_use]
    pub const fn assertion_count(&self) -> usize {
        self.assertion_count
    }

    /// Check if all assertions passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Verify all assertions passed
    ///
    /// # Errors
    ///
    /// Returns every recorded failure as one error if any assertion failed
    pub fn verify(&self) -> Result<(), SoftAssertionError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(SoftAssertionError::new(&self.failures))
        }
    }

    /// Clear all recorded failures
    pub fn clear(&mut self) {
        self.failures.clear();
        self.assertion_count = 0;
    }

    /// Get a summary of the assertions
    #[must_use]
    pub fn summary(&self) -> AssertionSummary {
        AssertionSummary {
            total: self.assertion_count,
            passed: self.assertion_count - self.failures.len(),
            failed: self.failures.len(),
        }
    }
}

/// Summary of assertion results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionSummary {
    /// Total assertions checked
    pub total: usize,
    /// Assertions that passed
    pub passed: usize,
    /// Assertions that failed
    pub failed: usize,
}

/// All soft failures, reported together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftAssertionError {
    /// Failures in the order they were recorded
    pub failures: Vec<AssertionFailure>,
}

impl SoftAssertionError {
    /// Create a new error from failures
    #[must_use]
    pub fn new(failures: &[AssertionFailure]) -> Self {
        Self {
            failures: failures.to_vec(),
        }
    }

    /// Number of failed assertions
    #[must_use]
    pub fn count(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for SoftAssertionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} assertion(s) failed:", self.count())?;
        for (i, failure) in self.failures.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for SoftAssertionError {}
