//! Locator chain resolution.
//!
//! Locators are tried strictly in order, one at a time. The first one that
//! resolves wins and the rest are never sent to the target. Each remote call
//! is bounded locally with a tokio timer, so a target that ignores its
//! timeout argument still cannot stall the chain.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::locator::{LocatorChain, LocatorSpec};
use crate::result::{TenazError, TenazResult};
use crate::target::{RemoteHandle, RemoteTarget, TargetError};

/// A resolved element, valid for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    remote: RemoteHandle,
    spec: LocatorSpec,
    resolved_at: Instant,
}

impl ElementHandle {
    /// Pair a remote handle with the locator that produced it
    #[must_use]
    pub fn new(remote: RemoteHandle, spec: LocatorSpec) -> Self {
        Self {
            remote,
            spec,
            resolved_at: Instant::now(),
        }
    }

    /// Remote reference
    #[must_use]
    pub const fn remote(&self) -> &RemoteHandle {
        &self.remote
    }

    /// Locator that resolved
    #[must_use]
    pub const fn spec(&self) -> &LocatorSpec {
        &self.spec
    }

    /// When resolution succeeded
    #[must_use]
    pub const fn resolved_at(&self) -> Instant {
        self.resolved_at
    }
}

/// Why one locator in a chain did not resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The target answered "no match"
    NotFound,
    /// No answer within the locator's time slice
    TimedOut(Duration),
    /// The chain budget was spent before this locator was tried
    Skipped,
    /// The target returned an error
    Target(TargetError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::TimedOut(d) => write!(f, "timed out after {}ms", d.as_millis()),
            Self::Skipped => write!(f, "skipped, chain budget exhausted"),
            Self::Target(e) => write!(f, "{e}"),
        }
    }
}

/// Per-locator outcome inside a [`ResolutionFailure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorFailure {
    /// Locator tried
    pub spec: LocatorSpec,
    /// Why it failed
    pub reason: FailureReason,
}

/// No locator in a chain resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    /// Chain that was walked
    pub chain: LocatorChain,
    /// One entry per locator, in chain order
    pub reasons: Vec<LocatorFailure>,
    /// Document address at the time of failure
    pub address: String,
}

impl ResolutionFailure {
    /// Locators that were actually sent to the target
    pub fn attempted(&self) -> impl Iterator<Item = &LocatorSpec> {
        self.reasons
            .iter()
            .filter(|r| r.reason != FailureReason::Skipped)
            .map(|r| &r.spec)
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "No element found for {} at {}:",
            self.chain, self.address
        )?;
        for r in &self.reasons {
            write!(f, "\n  {}: {}", r.spec, r.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolutionFailure {}

/// Walks a [`LocatorChain`] against a [`RemoteTarget`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    per_locator: Duration,
    chain_budget: Option<Duration>,
}

impl Resolver {
    /// Resolver giving each locator up to `per_locator`
    #[must_use]
    pub const fn new(per_locator: Duration) -> Self {
        Self {
            per_locator,
            chain_budget: None,
        }
    }

    /// Cap the whole chain walk at `budget`
    #[must_use]
    pub const fn with_chain_budget(mut self, budget: Option<Duration>) -> Self {
        self.chain_budget = budget;
        self
    }

    /// Per-locator time slice
    #[must_use]
    pub const fn per_locator(&self) -> Duration {
        self.per_locator
    }

    /// Resolve the first locator in `chain` that matches.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Resolution`] when every locator failed, or
    /// [`TenazError::Target`] as soon as the target reports a non-transient
    /// failure such as a lost connection.
    pub async fn resolve<T: RemoteTarget>(
        &self,
        target: &T,
        chain: &LocatorChain,
    ) -> TenazResult<ElementHandle> {
        let start = Instant::now();
        let mut reasons = Vec::with_capacity(chain.len());

        for spec in chain {
            let slice = match self.chain_budget {
                Some(budget) => {
                    let remaining = budget.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        trace!(locator = %spec, "skipping, chain budget exhausted");
                        reasons.push(LocatorFailure {
                            spec: spec.clone(),
                            reason: FailureReason::Skipped,
                        });
                        continue;
                    }
                    self.per_locator.min(remaining)
                }
                None => self.per_locator,
            };

            let reason = match tokio::time::timeout(slice, target.resolve(spec, slice)).await {
                Ok(Ok(Some(remote))) => {
                    debug!(
                        locator = %spec,
                        fallback = !reasons.is_empty(),
                        "resolved"
                    );
                    return Ok(ElementHandle::new(remote, spec.clone()));
                }
                Ok(Ok(None)) => FailureReason::NotFound,
                Ok(Err(e)) if e.is_transient() => FailureReason::Target(e),
                Ok(Err(e)) => {
                    debug!(locator = %spec, error = %e, "target failed, abandoning chain");
                    return Err(TenazError::Target(e));
                }
                Err(_) => FailureReason::TimedOut(slice),
            };
            debug!(locator = %spec, reason = %reason, "locator failed");
            reasons.push(LocatorFailure {
                spec: spec.clone(),
                reason,
            });
        }

        let address = target
            .current_address()
            .await
            .unwrap_or_else(|e| format!("<address unavailable: {e}>"));
        Err(ResolutionFailure {
            chain: chain.clone(),
            reasons,
            address,
        }
        .into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mock::{MockElement, MockTarget};

    const SLICE: Duration = Duration::from_secs(2);

    fn failure(err: TenazError) -> ResolutionFailure {
        match err {
            TenazError::Resolution(f) => f,
            other => panic!("expected resolution failure, got {other:?}"),
        }
    }

    mod order_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_first_success_wins() {
            let a = LocatorSpec::css("#a");
            let b = LocatorSpec::css("#b");
            let c = LocatorSpec::css("#c");
            let target = MockTarget::new()
                .with(b.clone(), MockElement::new())
                .with(c.clone(), MockElement::new());
            let chain = LocatorChain::new(a.clone()).or(b.clone()).or(c.clone());

            let handle = Resolver::new(SLICE).resolve(&target, &chain).await.unwrap();
            assert_eq!(handle.spec(), &b);
            assert_eq!(target.resolve_log(), vec![a, b]);
            assert_eq!(target.resolve_count(&c), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_primary_success_never_consults_fallbacks() {
            let a = LocatorSpec::css("#a");
            let target = MockTarget::new().with(a.clone(), MockElement::new());
            let chain = LocatorChain::new(a.clone()).or(LocatorSpec::css("#b"));
            Resolver::new(SLICE).resolve(&target, &chain).await.unwrap();
            assert_eq!(target.resolve_log(), vec![a]);
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_all_fail_reports_every_locator() {
            let target = MockTarget::at("https://app.test/login");
            let chain = LocatorChain::parse_all(&["#a", "xpath=//b", "text=C"]).unwrap();
            let err = Resolver::new(SLICE).resolve(&target, &chain).await.unwrap_err();
            assert!(err.is_retryable());

            let f = failure(err);
            assert_eq!(f.reasons.len(), 3);
            assert_eq!(f.attempted().count(), 3);
            assert_eq!(f.address, "https://app.test/login");
            let text = f.to_string();
            assert!(text.contains("css=#a: not found"));
            assert!(text.contains("xpath=//b: not found"));
            assert!(text.contains("text=C: not found"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_hanging_locator_counts_as_failed() {
            let slow = LocatorSpec::css("#slow");
            let fast = LocatorSpec::css("#fast");
            let target = MockTarget::new()
                .with(
                    slow.clone(),
                    MockElement::new().hang_on_resolve(Duration::from_secs(60)),
                )
                .with(fast.clone(), MockElement::new());
            let chain = LocatorChain::new(slow).or(fast.clone());

            let start = Instant::now();
            let handle = Resolver::new(SLICE).resolve(&target, &chain).await.unwrap();
            assert_eq!(handle.spec(), &fast);
            assert_eq!(start.elapsed(), SLICE);
        }

        struct Broken(TargetError);

        #[async_trait::async_trait]
        impl RemoteTarget for Broken {
            async fn resolve(
                &self,
                _: &LocatorSpec,
                _: Duration,
            ) -> crate::target::TargetResult<Option<RemoteHandle>> {
                Err(self.0.clone())
            }
            async fn query_state(
                &self,
                _: &RemoteHandle,
            ) -> crate::target::TargetResult<crate::target::ElementState> {
                Err(TargetError::Detached)
            }
            async fn dispatch(
                &self,
                _: &RemoteHandle,
                _: &crate::target::DispatchKind,
            ) -> crate::target::TargetResult<()> {
                Ok(())
            }
            async fn count(&self, _: &LocatorSpec) -> crate::target::TargetResult<usize> {
                Ok(0)
            }
            async fn current_address(&self) -> crate::target::TargetResult<String> {
                Err(TargetError::Connection {
                    message: "gone".into(),
                })
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_transient_target_error_recorded_as_reason() {
            let broken = Broken(TargetError::Rejected {
                message: "navigation in progress".into(),
            });
            let chain = LocatorChain::new(LocatorSpec::css("#a")).or(LocatorSpec::css("#b"));
            let f = failure(Resolver::new(SLICE).resolve(&broken, &chain).await.unwrap_err());
            assert_eq!(f.reasons.len(), 2);
            assert!(matches!(f.reasons[0].reason, FailureReason::Target(_)));
            assert!(f.address.starts_with("<address unavailable"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_connection_loss_ends_the_walk() {
            let broken = Broken(TargetError::Connection {
                message: "websocket closed".into(),
            });
            let chain = LocatorChain::new(LocatorSpec::css("#a")).or(LocatorSpec::css("#b"));
            let err = Resolver::new(SLICE)
                .resolve(&broken, &chain)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                TenazError::Target(TargetError::Connection { .. })
            ));
            assert!(!err.is_retryable());
        }
    }

    mod budget_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_chain_budget_skips_late_locators() {
            let hang = MockElement::new().hang_on_resolve(Duration::from_secs(60));
            let a = LocatorSpec::css("#a");
            let b = LocatorSpec::css("#b");
            let c = LocatorSpec::css("#c");
            let target = MockTarget::new()
                .with(a.clone(), hang.clone())
                .with(b.clone(), hang)
                .with(c.clone(), MockElement::new());
            let chain = LocatorChain::new(a).or(b).or(c.clone());

            let start = Instant::now();
            let resolver = Resolver::new(SLICE).with_chain_budget(Some(Duration::from_secs(3)));
            let f = failure(resolver.resolve(&target, &chain).await.unwrap_err());

            assert_eq!(start.elapsed(), Duration::from_secs(3));
            assert_eq!(f.reasons[0].reason, FailureReason::TimedOut(SLICE));
            assert_eq!(
                f.reasons[1].reason,
                FailureReason::TimedOut(Duration::from_secs(1))
            );
            assert_eq!(f.reasons[2].reason, FailureReason::Skipped);
            assert_eq!(target.resolve_count(&c), 0);
            assert_eq!(f.attempted().count(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_waiting_target_spends_budget_on_absent_primary() {
            let primary = LocatorSpec::css("#id-primary");
            let fallback = LocatorSpec::css("#main-heading");
            let target = MockTarget::new()
                .waiting()
                .with(fallback.clone(), MockElement::new());
            let chain = LocatorChain::new(primary).or(fallback.clone());

            let start = Instant::now();
            let resolver = Resolver::new(Duration::from_secs(2))
                .with_chain_budget(Some(Duration::from_secs(1)));
            let f = failure(resolver.resolve(&target, &chain).await.unwrap_err());

            assert_eq!(start.elapsed(), Duration::from_secs(1));
            assert!(matches!(
                f.reasons[0].reason,
                FailureReason::NotFound | FailureReason::TimedOut(_)
            ));
            assert_eq!(f.reasons[1].reason, FailureReason::Skipped);
            assert_eq!(target.resolve_count(&fallback), 0);

            // with the whole slice available the fallback is reached
            let start = Instant::now();
            let handle = Resolver::new(Duration::from_secs(2))
                .resolve(&target, &chain)
                .await
                .unwrap();
            assert_eq!(handle.spec(), &fallback);
            assert_eq!(start.elapsed(), Duration::from_secs(2));
        }

        #[tokio::test(start_paused = true)]
        async fn test_without_budget_every_locator_is_tried() {
            let hang = MockElement::new().hang_on_resolve(Duration::from_secs(60));
            let specs: Vec<_> = (0..4).map(|i| LocatorSpec::css(format!("#n{i}"))).collect();
            let mut target = MockTarget::new();
            for s in &specs {
                target = target.with(s.clone(), hang.clone());
            }
            let chain = LocatorChain::try_from_iter(specs).unwrap();

            let start = Instant::now();
            let f = failure(Resolver::new(SLICE).resolve(&target, &chain).await.unwrap_err());
            assert_eq!(f.attempted().count(), 4);
            assert_eq!(start.elapsed(), SLICE * 4);
        }
    }
}
