//! Verification of element state.
//!
//! A [`Predicate`] is checked against the first locator of a chain that
//! resolves. Checks are polled until they pass or the verify timeout runs
//! out; the failure then reports the last value actually observed.

pub mod soft;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::locator::{LocatorChain, LocatorSpec};
use crate::resolver::Resolver;
use crate::result::{TenazError, TenazResult};
use crate::target::{ElementState, RemoteTarget, TargetError};
use crate::wait::{Check, Polled, Poller, WaitOptions};

// =============================================================================
// TEXT MATCHING
// =============================================================================

/// How expected text is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Whole text must match
    #[default]
    Exact,
    /// Expected text must appear somewhere
    Partial,
}

/// Text comparison with mode and case sensitivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    /// Expected text
    pub expected: String,
    /// Exact or partial
    pub mode: MatchMode,
    /// Compare case-sensitively
    pub case_sensitive: bool,
}

impl TextMatch {
    /// Exact, case-sensitive
    pub fn exact(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            mode: MatchMode::Exact,
            case_sensitive: true,
        }
    }

    /// Substring, case-sensitive
    pub fn partial(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            mode: MatchMode::Partial,
            case_sensitive: true,
        }
    }

    /// Ignore case
    #[must_use]
    pub const fn ignore_case(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    /// Compare against observed text
    #[must_use]
    pub fn matches(&self, actual: &str) -> bool {
        let (actual, expected) = if self.case_sensitive {
            (actual.to_string(), self.expected.clone())
        } else {
            (actual.to_lowercase(), self.expected.to_lowercase())
        };
        match self.mode {
            MatchMode::Exact => actual == expected,
            MatchMode::Partial => actual.contains(&expected),
        }
    }
}

impl fmt::Display for TextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            MatchMode::Exact => "text",
            MatchMode::Partial => "text containing",
        };
        write!(f, "{mode} {:?}", self.expected)?;
        if !self.case_sensitive {
            write!(f, " (ignoring case)")?;
        }
        Ok(())
    }
}

// =============================================================================
// PREDICATES
// =============================================================================

/// What to verify about an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "predicate", content = "args", rename_all = "snake_case")]
pub enum Predicate {
    /// Some locator resolves
    Exists,
    /// No locator resolves
    NotExists,
    /// Resolved and visible
    Visible,
    /// Absent or not visible
    Hidden,
    /// Resolved and enabled
    Enabled,
    /// Resolved and disabled
    Disabled,
    /// Text content matches
    Text(TextMatch),
    /// Attribute has a value
    AttributeEquals {
        /// Attribute name
        name: String,
        /// Expected value
        value: String,
    },
    /// Number of matches of the first locator with any
    Count(usize),
}

impl Predicate {
    /// Exact text predicate
    pub fn text(expected: impl Into<String>) -> Self {
        Self::Text(TextMatch::exact(expected))
    }

    /// Partial text predicate
    pub fn text_containing(expected: impl Into<String>) -> Self {
        Self::Text(TextMatch::partial(expected))
    }

    /// Attribute predicate
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::AttributeEquals {
            name: name.into(),
            value: value.into(),
        }
    }

    fn expected(&self) -> String {
        match self {
            Self::Exists => "present".into(),
            Self::NotExists => "absent".into(),
            Self::Visible => "visible".into(),
            Self::Hidden => "hidden".into(),
            Self::Enabled => "enabled".into(),
            Self::Disabled => "disabled".into(),
            Self::Text(m) => m.to_string(),
            Self::AttributeEquals { name, value } => format!("{name}={value:?}"),
            Self::Count(n) => format!("{n} match(es)"),
        }
    }

    /// Whether the predicate needs element state beyond presence
    const fn needs_state(&self) -> bool {
        !matches!(self, Self::Exists | Self::NotExists | Self::Count(_))
    }

    fn judge(&self, state: Option<&ElementState>) -> (bool, String) {
        let Some(state) = state else {
            return (matches!(self, Self::NotExists | Self::Hidden), "absent".into());
        };
        match self {
            Self::Exists => (true, "present".into()),
            Self::NotExists => (false, "present".into()),
            Self::Visible => (state.visible, visibility(state)),
            Self::Hidden => (!state.visible, visibility(state)),
            Self::Enabled => (state.enabled, enablement(state)),
            Self::Disabled => (!state.enabled, enablement(state)),
            Self::Text(m) => {
                let text = state.text_content.clone().unwrap_or_default();
                (m.matches(&text), format!("{text:?}"))
            }
            Self::AttributeEquals { name, value } => match state.attribute(name) {
                Some(v) => (v == value, format!("{name}={v:?}")),
                None => (false, format!("no {name} attribute")),
            },
            Self::Count(_) => (false, String::new()),
        }
    }
}

fn visibility(state: &ElementState) -> String {
    String::from(if state.visible { "visible" } else { "hidden" })
}

fn enablement(state: &ElementState) -> String {
    String::from(if state.enabled { "enabled" } else { "disabled" })
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expected())
    }
}

/// Whether a failed verification raises or is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerifyMode {
    /// Raise immediately
    #[default]
    Hard,
    /// Record into the soft collector
    Soft,
}

// =============================================================================
// FAILURE
// =============================================================================

/// A verification mismatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionFailure {
    /// Summary line
    pub message: String,
    /// What was expected
    pub expected: String,
    /// What was last observed
    pub actual: String,
    /// Locators consulted, in order
    pub locators: Vec<LocatorSpec>,
    /// Position among soft failures; 0 for hard failures
    pub index: usize,
}

impl AssertionFailure {
    /// Build a failure for `chain`
    #[must_use]
    pub fn new(chain: &LocatorChain, expected: String, actual: String) -> Self {
        Self {
            message: format!("{chain} expected to be {expected}, but was {actual}"),
            expected,
            actual,
            locators: chain.specs().to_vec(),
            index: 0,
        }
    }

    /// Set the position in a soft collection
    #[must_use]
    pub const fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Assertion failed: {} (expected: {}, actual: {})",
            self.message, self.expected, self.actual
        )
    }
}

impl std::error::Error for AssertionFailure {}

// =============================================================================
// VERIFIER
// =============================================================================

/// Polls a predicate against a chain
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    options: WaitOptions,
    lookup: Duration,
}

impl Verifier {
    /// `options.timeout` bounds the whole verification; each lookup is
    /// bounded by the poll interval
    #[must_use]
    pub const fn new(options: WaitOptions) -> Self {
        Self {
            options,
            lookup: options.poll_interval,
        }
    }

    /// Check `predicate` until it holds or time runs out.
    ///
    /// The outer `Result` carries collaborator failures; the inner one the
    /// verdict.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Target`] if the collaborator fails outright.
    pub async fn check<T: RemoteTarget>(
        &self,
        target: &T,
        chain: &LocatorChain,
        predicate: &Predicate,
    ) -> TenazResult<Result<(), AssertionFailure>> {
        let polled = Poller::new(self.options)
            .poll(|| async {
                let (passed, actual) = self.observe(target, chain, predicate).await?;
                Ok(if passed {
                    Check::Satisfied(())
                } else {
                    Check::Pending(actual)
                })
            })
            .await?;

        Ok(match polled {
            Polled::Ready { polls, .. } => {
                debug!(chain = %chain, %predicate, polls, "verified");
                Ok(())
            }
            Polled::TimedOut { last_observed, .. } => Err(AssertionFailure::new(
                chain,
                predicate.expected(),
                last_observed,
            )),
        })
    }

    async fn observe<T: RemoteTarget>(
        &self,
        target: &T,
        chain: &LocatorChain,
        predicate: &Predicate,
    ) -> TenazResult<(bool, String)> {
        if let Predicate::Count(expected) = predicate {
            let mut found = 0;
            for spec in chain {
                found = target.count(spec).await?;
                if found > 0 {
                    break;
                }
            }
            return Ok((found == *expected, format!("{found} match(es)")));
        }

        let handle = match Resolver::new(self.lookup).resolve(target, chain).await {
            Ok(handle) => Some(handle),
            Err(TenazError::Resolution(_)) => None,
            Err(e) => return Err(e),
        };

        let state = match handle {
            Some(ref h) if predicate.needs_state() => match target.query_state(h.remote()).await {
                Ok(state) => Some(state),
                Err(TargetError::Detached) => None,
                Err(e) => return Err(e.into()),
            },
            Some(_) => Some(ElementState::default()),
            None => None,
        };
        Ok(predicate.judge(state.as_ref()))
    }
}
