//! Result and error types for Tenaz.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assertion::soft::SoftAssertionError;
use crate::assertion::AssertionFailure;
use crate::locator::LocatorSpec;
use crate::resolver::ResolutionFailure;
use crate::retry::RetryExhausted;
use crate::target::TargetError;

/// Result type for Tenaz operations
pub type TenazResult<T> = Result<T, TenazError>;

/// Errors that can occur in Tenaz
#[derive(Debug, Error)]
pub enum TenazError {
    /// No locator in the chain resolved
    #[error("{0}")]
    Resolution(#[from] ResolutionFailure),

    /// Element resolved but never reached the required state
    #[error(
        "Element {locator} was not {requirement} after {waited_ms}ms (last observed: {last_observed})"
    )]
    ActionabilityTimeout {
        /// Locator that produced the element
        locator: LocatorSpec,
        /// Required state, e.g. "visible, enabled and stable"
        requirement: String,
        /// Time spent waiting
        waited_ms: u64,
        /// Last observed state
        last_observed: String,
    },

    /// Action was dispatched but the target rejected it
    #[error("{action} on {locator} failed: {message}")]
    Interaction {
        /// Action name
        action: String,
        /// Locator that produced the element
        locator: LocatorSpec,
        /// Error message
        message: String,
    },

    /// Malformed retry policy, chain or engine input
    #[error("Invalid policy: {message}")]
    InvalidPolicy {
        /// Error message
        message: String,
    },

    /// Action arguments are invalid for the resolved element
    #[error("Invalid action: {message}")]
    InvalidAction {
        /// Error message
        message: String,
    },

    /// Verification mismatch
    #[error("{0}")]
    Assertion(#[from] AssertionFailure),

    /// Aggregated soft verification failures
    #[error("{0}")]
    SoftAssertions(#[from] SoftAssertionError),

    /// Wait condition was not satisfied in time
    #[error("Timed out after {ms}ms waiting for {waited_for}")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
        /// Description of the condition
        waited_for: String,
    },

    /// Every attempt failed with a retryable error
    #[error("{0}")]
    RetryExhausted(#[from] RetryExhausted),

    /// Collaborator failure that is not an interaction rejection
    #[error("Remote target error: {0}")]
    Target(#[from] TargetError),

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },
}

/// Classification of a [`TenazError`] without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// See [`TenazError::Resolution`]
    Resolution,
    /// See [`TenazError::ActionabilityTimeout`]
    ActionabilityTimeout,
    /// See [`TenazError::Interaction`]
    Interaction,
    /// See [`TenazError::InvalidPolicy`]
    InvalidPolicy,
    /// See [`TenazError::InvalidAction`]
    InvalidAction,
    /// See [`TenazError::Assertion`] and [`TenazError::SoftAssertions`]
    Assertion,
    /// See [`TenazError::Timeout`]
    Timeout,
    /// See [`TenazError::RetryExhausted`]
    RetryExhausted,
    /// See [`TenazError::Target`]
    Target,
    /// See [`TenazError::Config`]
    Config,
}

impl TenazError {
    /// Payload-free classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::ActionabilityTimeout { .. } => ErrorKind::ActionabilityTimeout,
            Self::Interaction { .. } => ErrorKind::Interaction,
            Self::InvalidPolicy { .. } => ErrorKind::InvalidPolicy,
            Self::InvalidAction { .. } => ErrorKind::InvalidAction,
            Self::Assertion(_) | Self::SoftAssertions(_) => ErrorKind::Assertion,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RetryExhausted(_) => ErrorKind::RetryExhausted,
            Self::Target(_) => ErrorKind::Target,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether the retry controller may try again after this error.
    ///
    /// Environment-caused, transient failures are retryable. Programmer
    /// errors, assertion mismatches and exhausted retries are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Resolution(_)
            | Self::ActionabilityTimeout { .. }
            | Self::Interaction { .. }
            | Self::Timeout { .. } => true,
            Self::Target(err) => err.is_transient(),
            Self::InvalidPolicy { .. }
            | Self::InvalidAction { .. }
            | Self::Assertion(_)
            | Self::SoftAssertions(_)
            | Self::RetryExhausted(_)
            | Self::Config { .. } => false,
        }
    }
}
