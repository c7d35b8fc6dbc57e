//! Wait conditions and the polling loop.
//!
//! Every synchronization point in the engine (explicit waits, actionability
//! checks before an action, verification retries) runs through [`Poller`].
//!
//! ```text
//!   ┌──────────┐ satisfied ┌─────────┐
//!   │  check   │──────────►│  Ready  │
//!   └────┬─────┘           └─────────┘
//!        │ pending
//!        ▼
//!   elapsed >= timeout? ──yes──► TimedOut
//!        │ no
//!        ▼
//!   sleep(min(interval, remaining)) ──► check
//! ```
//!
//! The check always runs at least once, even with a zero timeout. A check
//! that returns an error ends the wait with that error.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::locator::LocatorSpec;
use crate::result::{TenazError, TenazResult};
use crate::target::{ElementState, RemoteTarget, TargetError, TargetResult};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for explicit waits (20 seconds)
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default polling interval (500ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest sleep between checks; smaller intervals are raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout passed to `resolve` when a condition only wants a snapshot
const SNAPSHOT: Duration = Duration::ZERO;

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Timeout and poll interval for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Overall time limit
    pub timeout: Duration,
    /// Sleep between checks
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

// =============================================================================
// WAIT CONDITIONS
// =============================================================================

/// Result of evaluating a condition once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitConditionResult {
    /// Whether the condition holds
    pub satisfied: bool,
    /// Observed value, for diagnostics (text, count, url...)
    pub value: Option<String>,
}

impl WaitConditionResult {
    /// Condition holds
    #[must_use]
    pub fn satisfied(value: Option<String>) -> Self {
        Self {
            satisfied: true,
            value,
        }
    }

    /// Condition does not hold yet
    #[must_use]
    pub fn pending(value: Option<String>) -> Self {
        Self {
            satisfied: false,
            value,
        }
    }

    fn from_bool(satisfied: bool, value: Option<String>) -> Self {
        Self { satisfied, value }
    }
}

/// User-supplied condition evaluated against the remote target
#[async_trait]
pub trait CustomCondition: Send + Sync {
    /// Evaluate once
    async fn check(&self, target: &dyn RemoteTarget) -> TargetResult<WaitConditionResult>;

    /// Description for error messages
    fn description(&self) -> String;
}

type CheckFn =
    dyn for<'a> Fn(&'a dyn RemoteTarget) -> BoxFuture<'a, TargetResult<bool>> + Send + Sync;

/// A closure-based custom condition
pub struct FnCondition {
    func: Box<CheckFn>,
    description: String,
}

impl fmt::Debug for FnCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl FnCondition {
    /// Wrap a closure returning a boxed future
    pub fn new<F>(func: F, description: impl Into<String>) -> Self
    where
        F: for<'a> Fn(&'a dyn RemoteTarget) -> BoxFuture<'a, TargetResult<bool>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            func: Box::new(func),
            description: description.into(),
        }
    }
}

#[async_trait]
impl CustomCondition for FnCondition {
    async fn check(&self, target: &dyn RemoteTarget) -> TargetResult<WaitConditionResult> {
        let satisfied = (self.func)(target).await?;
        Ok(WaitConditionResult::from_bool(satisfied, None))
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Condition checked against the remote target's current state
#[derive(Clone)]
pub enum WaitCondition {
    /// At least one node matches
    ElementExists(LocatorSpec),
    /// A matching node is visible
    ElementVisible(LocatorSpec),
    /// No matching node, or the node is not visible
    ElementHidden(LocatorSpec),
    /// Attribute of a matching node equals a value
    AttributeEquals {
        /// Element locator
        locator: LocatorSpec,
        /// Attribute name
        name: String,
        /// Expected value
        value: String,
    },
    /// Text content of a matching node contains a substring
    TextContains {
        /// Element locator
        locator: LocatorSpec,
        /// Expected substring
        text: String,
    },
    /// Exactly `count` nodes match
    CountEquals {
        /// Element locator
        locator: LocatorSpec,
        /// Expected count
        count: usize,
    },
    /// Current address contains a substring
    PageUrlContains(String),
    /// Caller-defined check
    Custom(Arc<dyn CustomCondition>),
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaitCondition({self})")
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementExists(spec) => write!(f, "{spec} to exist"),
            Self::ElementVisible(spec) => write!(f, "{spec} to be visible"),
            Self::ElementHidden(spec) => write!(f, "{spec} to be hidden"),
            Self::AttributeEquals {
                locator,
                name,
                value,
            } => write!(f, "{locator} to have {name}={value:?}"),
            Self::TextContains { locator, text } => {
                write!(f, "{locator} to contain text {text:?}")
            }
            Self::CountEquals { locator, count } => write!(f, "{locator} to match {count} node(s)"),
            Self::PageUrlContains(part) => write!(f, "address to contain {part:?}"),
            Self::Custom(c) => write!(f, "{}", c.description()),
        }
    }
}

impl WaitCondition {
    /// Custom condition from a closure
    pub fn custom<F>(func: F, description: impl Into<String>) -> Self
    where
        F: for<'a> Fn(&'a dyn RemoteTarget) -> BoxFuture<'a, TargetResult<bool>>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(FnCondition::new(func, description)))
    }

    /// Evaluate once against `target`.
    ///
    /// A node detached between lookup and state query counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Target`] if the collaborator fails.
    pub async fn check<T: RemoteTarget>(&self, target: &T) -> TenazResult<WaitConditionResult> {
        let result = match self {
            Self::ElementExists(spec) => {
                let n = target.count(spec).await?;
                WaitConditionResult::from_bool(n > 0, Some(n.to_string()))
            }
            Self::ElementVisible(spec) => {
                let visible = visible_now(target, spec).await?;
                WaitConditionResult::from_bool(visible, Some(visible.to_string()))
            }
            Self::ElementHidden(spec) => {
                let visible = visible_now(target, spec).await?;
                WaitConditionResult::from_bool(!visible, Some(visible.to_string()))
            }
            Self::AttributeEquals {
                locator,
                name,
                value,
            } => {
                let actual = snapshot(target, locator)
                    .await?
                    .and_then(|s| s.attribute(name).map(str::to_string));
                WaitConditionResult::from_bool(actual.as_deref() == Some(value.as_str()), actual)
            }
            Self::TextContains { locator, text } => {
                let actual = snapshot(target, locator)
                    .await?
                    .and_then(|s| s.text_content);
                let ok = actual.as_deref().is_some_and(|t| t.contains(text.as_str()));
                WaitConditionResult::from_bool(ok, actual)
            }
            Self::CountEquals { locator, count } => {
                let n = target.count(locator).await?;
                WaitConditionResult::from_bool(n == *count, Some(n.to_string()))
            }
            Self::PageUrlContains(part) => {
                let url = target.current_address().await?;
                WaitConditionResult::from_bool(url.contains(part.as_str()), Some(url))
            }
            Self::Custom(condition) => condition.check(target).await?,
        };
        Ok(result)
    }
}

async fn snapshot<T: RemoteTarget>(
    target: &T,
    spec: &LocatorSpec,
) -> TenazResult<Option<ElementState>> {
    let Some(handle) = target.resolve(spec, SNAPSHOT).await? else {
        return Ok(None);
    };
    match target.query_state(&handle).await {
        Ok(state) => Ok(Some(state)),
        Err(TargetError::Detached) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn visible_now<T: RemoteTarget>(target: &T, spec: &LocatorSpec) -> TenazResult<bool> {
    Ok(snapshot(target, spec).await?.is_some_and(|s| s.visible))
}

// =============================================================================
// POLLER
// =============================================================================

/// One evaluation of a polled check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<V> {
    /// Done, with the produced value
    Satisfied(V),
    /// Not yet; carries a description of what was observed
    Pending(String),
}

/// Final state of a polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<V> {
    /// The check was satisfied
    Ready {
        /// Value produced by the check
        value: V,
        /// Time spent
        elapsed: Duration,
        /// Number of evaluations
        polls: u32,
    },
    /// Time ran out
    TimedOut {
        /// Last pending observation
        last_observed: String,
        /// Time spent
        elapsed: Duration,
        /// Number of evaluations
        polls: u32,
    },
}

/// Cooperative polling loop on tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct Poller {
    options: WaitOptions,
}

impl Poller {
    /// Poller with explicit options, the interval raised to
    /// [`MIN_POLL_INTERVAL`]
    #[must_use]
    pub fn new(mut options: WaitOptions) -> Self {
        options.poll_interval = options.poll_interval.max(MIN_POLL_INTERVAL);
        Self { options }
    }

    /// Options in effect
    #[must_use]
    pub const fn options(&self) -> WaitOptions {
        self.options
    }

    /// Run `check` until it is satisfied or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `check`.
    pub async fn poll<V, F, Fut>(&self, mut check: F) -> TenazResult<Polled<V>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TenazResult<Check<V>>>,
    {
        let start = Instant::now();
        let mut polls = 0_u32;

        loop {
            polls += 1;
            let last_observed = match check().await? {
                Check::Satisfied(value) => {
                    return Ok(Polled::Ready {
                        value,
                        elapsed: start.elapsed(),
                        polls,
                    });
                }
                Check::Pending(observed) => observed,
            };

            let elapsed = start.elapsed();
            if elapsed >= self.options.timeout {
                return Ok(Polled::TimedOut {
                    last_observed,
                    elapsed,
                    polls,
                });
            }

            trace!(polls, observed = %last_observed, "condition pending");
            let remaining = self.options.timeout - elapsed;
            tokio::time::sleep(self.options.poll_interval.min(remaining)).await;
        }
    }

    /// Wait for a [`WaitCondition`].
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Timeout`] if the condition is not satisfied in
    /// time, or the collaborator error that aborted the wait.
    pub async fn wait_for<T: RemoteTarget>(
        &self,
        target: &T,
        condition: &WaitCondition,
    ) -> TenazResult<WaitConditionResult> {
        let polled = self
            .poll(|| async {
                let result = condition.check(target).await?;
                Ok(if result.satisfied {
                    Check::Satisfied(result)
                } else {
                    Check::Pending(result.value.unwrap_or_else(|| "unsatisfied".to_string()))
                })
            })
            .await?;

        match polled {
            Polled::Ready { value, .. } => Ok(value),
            Polled::TimedOut {
                last_observed,
                elapsed,
                ..
            } => Err(TenazError::Timeout {
                ms: duration_ms(elapsed),
                waited_for: format!("{condition} (last observed: {last_observed})"),
            }),
        }
    }
}

/// Wait for `condition` with an explicit timeout and poll interval.
///
/// # Errors
///
/// See [`Poller::wait_for`].
pub async fn wait_for<T: RemoteTarget>(
    target: &T,
    condition: &WaitCondition,
    timeout: Duration,
    poll_interval: Duration,
) -> TenazResult<WaitConditionResult> {
    Poller::new(
        WaitOptions::new()
            .with_timeout(timeout)
            .with_poll_interval(poll_interval),
    )
    .wait_for(target, condition)
    .await
}

/// Saturating conversion for error payloads
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
