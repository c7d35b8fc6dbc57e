//! Engine - the caller-facing entry point.
//!
//! ```text
//! act(chain, action)
//!   └─ retry controller ─────────────── attempt n ───────────────┐
//!        │  resolver: walk chain, first match wins                │
//!        │  dispatcher: await actionability, then dispatch        │
//!        └─ retryable failure → sleep(backoff) → attempt n+1 ─────┘
//! ```
//!
//! "Must be present" operations (`click`, `fill`, `verify`...) return errors.
//! "May be absent" operations (`conditional_click`, `probe_*`) return `bool`
//! and treat a failed resolution as `false`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::assertion::soft::SoftAssertions;
use crate::assertion::{Predicate, Verifier, VerifyMode};
use crate::backoff::RetryPolicy;
use crate::config::EngineConfig;
use crate::dispatcher::{ActionOptions, ActionResult, ActionSpec, Dispatcher};
use crate::locator::{LocatorChain, LocatorSpec};
use crate::resolver::Resolver;
use crate::result::{TenazError, TenazResult};
use crate::retry::{with_retry_outcome, AttemptRecord};
use crate::target::RemoteTarget;
use crate::wait::{self, WaitCondition, WaitConditionResult, WaitOptions};

/// Result of [`Engine::act`]
#[derive(Debug)]
pub struct ActionOutcome {
    /// Whether the action completed
    pub succeeded: bool,
    /// Attempts consumed
    pub attempts_used: u32,
    /// Locator that produced the element acted on
    pub locator_used: Option<LocatorSpec>,
    /// Final error when the action did not complete
    pub error: Option<TenazError>,
    /// Answer of a probe action
    pub probe: Option<bool>,
    /// Total time including backoff
    pub elapsed: Duration,
    /// Failed attempts, oldest first
    pub history: Vec<AttemptRecord>,
}

impl ActionOutcome {
    /// `Ok(self)` on success, the final error otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the action.
    pub fn into_result(mut self) -> TenazResult<Self> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Locator resolution and synchronized interaction over a [`RemoteTarget`]
pub struct Engine<T: RemoteTarget> {
    target: T,
    config: EngineConfig,
    dispatcher: Dispatcher,
    soft: Mutex<SoftAssertions>,
}

impl<T: RemoteTarget> std::fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: RemoteTarget> Engine<T> {
    /// Engine over `target` with explicit configuration
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::Config`] if `config` fails
    /// [`EngineConfig::validate`].
    pub fn new(target: T, config: EngineConfig) -> TenazResult<Self> {
        config.validate()?;
        Ok(Self::build(target, config))
    }

    /// Engine with [`EngineConfig::default`]
    #[must_use]
    pub fn with_defaults(target: T) -> Self {
        Self::build(target, EngineConfig::default())
    }

    fn build(target: T, config: EngineConfig) -> Self {
        Self {
            target,
            dispatcher: Dispatcher::new(config.poll_interval),
            config,
            soft: Mutex::new(SoftAssertions::new()),
        }
    }

    /// The remote target
    #[must_use]
    pub const fn target(&self) -> &T {
        &self.target
    }

    /// Configuration in effect
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Resolve `chain` and perform `action`, retrying transient failures.
    ///
    /// Never returns an error directly; inspect [`ActionOutcome::error`] or
    /// call [`ActionOutcome::into_result`].
    pub async fn act(
        &self,
        chain: &LocatorChain,
        action: ActionSpec,
        policy: Option<&RetryPolicy>,
    ) -> ActionOutcome {
        self.act_with(chain, action, ActionOptions::default(), policy)
            .await
    }

    /// [`Engine::act`] with per-call options
    #[instrument(skip_all, fields(chain = %chain, action = %action))]
    pub async fn act_with(
        &self,
        chain: &LocatorChain,
        action: ActionSpec,
        options: ActionOptions,
        policy: Option<&RetryPolicy>,
    ) -> ActionOutcome {
        let policy = policy.unwrap_or(&self.config.retry);
        let label = format!("{} {chain}", action.name());
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);

        let outcome = with_retry_outcome(policy, &label, |attempt| {
            debug!(attempt, "attempt starting");
            self.attempt(chain, &action, timeout, options.force)
        })
        .await;

        match outcome.result {
            Ok(result) => ActionOutcome {
                succeeded: true,
                attempts_used: outcome.attempts,
                locator_used: Some(result.locator),
                error: None,
                probe: result.probe,
                elapsed: outcome.elapsed,
                history: outcome.history,
            },
            Err(err) => ActionOutcome {
                succeeded: false,
                attempts_used: outcome.attempts,
                locator_used: None,
                error: Some(err),
                probe: None,
                elapsed: outcome.elapsed,
                history: outcome.history,
            },
        }
    }

    /// One resolve + act; actionability shares the attempt's time budget
    async fn attempt(
        &self,
        chain: &LocatorChain,
        action: &ActionSpec,
        timeout: Duration,
        force: bool,
    ) -> TenazResult<ActionResult> {
        let start = Instant::now();
        let handle = self.resolver(timeout).resolve(&self.target, chain).await?;
        // actionability always gets room for two stability samples
        let remaining = timeout
            .saturating_sub(start.elapsed())
            .max(self.config.poll_interval.saturating_mul(2));
        self.dispatcher
            .perform(&self.target, &handle, action, remaining, force)
            .await
    }

    fn resolver(&self, per_locator: Duration) -> Resolver {
        Resolver::new(per_locator).with_chain_budget(self.config.chain_timeout)
    }

    async fn must(&self, chain: &LocatorChain, action: ActionSpec) -> TenazResult<ActionOutcome> {
        self.act(chain, action, None).await.into_result()
    }

    /// Click the element's center.
    ///
    /// # Errors
    ///
    /// Returns the final error once retries are exhausted or a
    /// non-retryable failure occurs.
    pub async fn click(&self, chain: &LocatorChain) -> TenazResult<ActionOutcome> {
        self.must(chain, ActionSpec::Click).await
    }

    /// Double-click the element's center.
    ///
    /// # Errors
    ///
    /// See [`Engine::click`].
    pub async fn double_click(&self, chain: &LocatorChain) -> TenazResult<ActionOutcome> {
        self.must(chain, ActionSpec::DoubleClick).await
    }

    /// Right-click the element's center.
    ///
    /// # Errors
    ///
    /// See [`Engine::click`].
    pub async fn context_click(&self, chain: &LocatorChain) -> TenazResult<ActionOutcome> {
        self.must(chain, ActionSpec::ContextClick).await
    }

    /// Click at `(x, y)` relative to the element's top-left corner.
    ///
    /// # Errors
    ///
    /// [`TenazError::InvalidAction`] if the offset lies outside the element;
    /// otherwise see [`Engine::click`].
    pub async fn click_at_offset(
        &self,
        chain: &LocatorChain,
        x: f64,
        y: f64,
    ) -> TenazResult<ActionOutcome> {
        self.must(chain, ActionSpec::ClickAtOffset { x, y }).await
    }

    /// Replace the element's value with `value`.
    ///
    /// # Errors
    ///
    /// See [`Engine::click`].
    pub async fn fill(&self, chain: &LocatorChain, value: &str) -> TenazResult<ActionOutcome> {
        self.must(chain, ActionSpec::fill(value)).await
    }

    /// Choose an option of a `<select>`.
    ///
    /// # Errors
    ///
    /// See [`Engine::click`].
    pub async fn select_option(
        &self,
        chain: &LocatorChain,
        option: &str,
    ) -> TenazResult<ActionOutcome> {
        self.must(chain, ActionSpec::select(option)).await
    }

    /// Move the pointer over the element.
    ///
    /// # Errors
    ///
    /// See [`Engine::click`].
    pub async fn hover(&self, chain: &LocatorChain) -> TenazResult<ActionOutcome> {
        self.must(chain, ActionSpec::Hover).await
    }

    // =========================================================================
    // May-be-absent operations
    // =========================================================================

    /// One attempt with the conditional timeout; resolution failure is `None`
    async fn single_attempt(
        &self,
        chain: &LocatorChain,
        action: &ActionSpec,
    ) -> TenazResult<Option<ActionResult>> {
        match self
            .attempt(chain, action, self.config.conditional_timeout, false)
            .await
        {
            Ok(result) => Ok(Some(result)),
            Err(TenazError::Resolution(failure)) => {
                debug!(
                    chain = %chain,
                    action = action.name(),
                    tried = failure.reasons.len(),
                    "absent"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Click if the element shows up within the conditional timeout.
    ///
    /// Returns `false` without raising when no locator resolves.
    ///
    /// # Errors
    ///
    /// Raises any failure after the element was found.
    #[instrument(skip_all, fields(chain = %chain))]
    pub async fn conditional_click(&self, chain: &LocatorChain) -> TenazResult<bool> {
        Ok(self
            .single_attempt(chain, &ActionSpec::Click)
            .await?
            .is_some())
    }

    /// Whether any locator resolves.
    ///
    /// # Errors
    ///
    /// Raises collaborator failures other than "not found".
    pub async fn probe_exists(&self, chain: &LocatorChain) -> TenazResult<bool> {
        self.probe(chain, ActionSpec::ProbeExists).await
    }

    /// Whether the element resolves and is visible.
    ///
    /// # Errors
    ///
    /// See [`Engine::probe_exists`].
    pub async fn probe_visible(&self, chain: &LocatorChain) -> TenazResult<bool> {
        self.probe(chain, ActionSpec::ProbeVisible).await
    }

    /// Whether the element resolves and is enabled.
    ///
    /// # Errors
    ///
    /// See [`Engine::probe_exists`].
    pub async fn probe_enabled(&self, chain: &LocatorChain) -> TenazResult<bool> {
        self.probe(chain, ActionSpec::ProbeEnabled).await
    }

    async fn probe(&self, chain: &LocatorChain, action: ActionSpec) -> TenazResult<bool> {
        Ok(self
            .single_attempt(chain, &action)
            .await?
            .and_then(|r| r.probe)
            .unwrap_or(false))
    }

    // =========================================================================
    // Waiting and verification
    // =========================================================================

    /// Poll `condition` until satisfied.
    ///
    /// # Errors
    ///
    /// [`TenazError::Timeout`] when time runs out, or the collaborator error
    /// that aborted the wait.
    pub async fn wait_for(
        &self,
        condition: &WaitCondition,
        timeout: Duration,
        poll_interval: Duration,
    ) -> TenazResult<WaitConditionResult> {
        wait::wait_for(&self.target, condition, timeout, poll_interval).await
    }

    /// [`Engine::wait_for`] with the configured timeout and poll interval.
    ///
    /// # Errors
    ///
    /// See [`Engine::wait_for`].
    pub async fn wait(&self, condition: &WaitCondition) -> TenazResult<WaitConditionResult> {
        let opts = self.config.wait_options();
        self.wait_for(condition, opts.timeout, opts.poll_interval)
            .await
    }

    /// Check `predicate` against `chain`, re-checking until the verify
    /// timeout.
    ///
    /// In [`VerifyMode::Soft`] a mismatch is recorded and `Ok(())` returned.
    ///
    /// # Errors
    ///
    /// [`TenazError::Assertion`] on a hard mismatch, or a collaborator error.
    #[instrument(skip_all, fields(chain = %chain, predicate = %predicate, ?mode))]
    pub async fn verify(
        &self,
        chain: &LocatorChain,
        predicate: Predicate,
        mode: VerifyMode,
    ) -> TenazResult<()> {
        let verifier = Verifier::new(
            WaitOptions::new()
                .with_timeout(self.config.verify_timeout)
                .with_poll_interval(self.config.poll_interval),
        );
        let verdict = verifier.check(&self.target, chain, &predicate).await?;
        match mode {
            VerifyMode::Hard => verdict.map_err(TenazError::from),
            VerifyMode::Soft => {
                self.soft_guard().record(verdict);
                Ok(())
            }
        }
    }

    fn soft_guard(&self) -> MutexGuard<'_, SoftAssertions> {
        self.soft.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the soft assertion collector
    #[must_use]
    pub fn soft(&self) -> SoftAssertions {
        self.soft_guard().clone()
    }

    /// Raise every soft failure recorded so far as one error, then reset.
    ///
    /// # Errors
    ///
    /// [`TenazError::SoftAssertions`] if any soft verification failed.
    pub fn assert_soft(&self) -> TenazResult<()> {
        let mut soft = self.soft_guard();
        let result = soft.verify();
        soft.clear();
        result.map_err(TenazError::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mock::{MockElement, MockTarget};
    use crate::target::{DispatchKind, TargetError};
    use std::sync::Arc;

    fn fast_config() -> EngineConfig {
        EngineConfig::new()
            .with_default_timeout(Duration::from_secs(2))
            .with_conditional_timeout(Duration::from_millis(500))
            .with_poll_interval(Duration::from_millis(50))
            .with_verify_timeout(Duration::from_secs(1))
    }

    fn engine(target: MockTarget) -> Engine<Arc<MockTarget>> {
        Engine::new(Arc::new(target), fast_config()).unwrap()
    }

    mod act_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_fallback_locator_used() {
            let fallback = LocatorSpec::xpath("//button[text()='Save']");
            let target = MockTarget::new().with(fallback.clone(), MockElement::new());
            let engine = engine(target);
            let chain = LocatorChain::new(LocatorSpec::css("#save")).or(fallback.clone());

            let outcome = engine.act(&chain, ActionSpec::Click, None).await;
            assert!(outcome.succeeded);
            assert_eq!(outcome.attempts_used, 1);
            assert_eq!(outcome.locator_used, Some(fallback));
            assert!(outcome.error.is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn test_fallback_after_waiting_primary_still_actionable() {
            let fallback = LocatorSpec::css("#main-heading");
            let chain = LocatorChain::new(LocatorSpec::css("#id-primary")).or(fallback.clone());

            for action in [ActionSpec::Click, ActionSpec::Hover] {
                let target = MockTarget::new()
                    .waiting()
                    .with(fallback.clone(), MockElement::new());
                let engine = engine(target);
                let start = Instant::now();

                let outcome = engine.act(&chain, action.clone(), None).await;
                assert!(outcome.succeeded, "{}: {:?}", action.name(), outcome.error);
                assert_eq!(outcome.attempts_used, 1);
                assert_eq!(outcome.locator_used, Some(fallback.clone()));
                // the primary consumed the whole budget
                let elapsed = start.elapsed();
                assert!(elapsed >= Duration::from_secs(2));
                assert!(elapsed <= Duration::from_secs(2) + Duration::from_millis(100));
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_late_attach_recovers_on_retry() {
            let spec = LocatorSpec::css("#late");
            // each attempt's single resolve call fails until the third
            let target = MockTarget::new().with(spec.clone(), MockElement::new().attach_after(2));
            let engine = engine(target);
            let outcome = engine
                .act(&LocatorChain::new(spec), ActionSpec::Click, None)
                .await;
            assert!(outcome.succeeded);
            assert_eq!(outcome.attempts_used, 3);
            assert_eq!(outcome.history.len(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_detached_mid_action_is_retried() {
            let spec = LocatorSpec::css("#flaky");
            let target = MockTarget::new().with(
                spec.clone(),
                MockElement::new().fail_next_dispatch(TargetError::Detached),
            );
            let engine = engine(target);
            let outcome = engine.click(&LocatorChain::new(spec)).await.unwrap();
            assert_eq!(outcome.attempts_used, 2);
            assert_eq!(engine.target().dispatch_log().len(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_invalid_offset_not_retried() {
            let spec = LocatorSpec::css("canvas");
            let engine = engine(MockTarget::new().with(spec.clone(), MockElement::new()));
            let outcome = engine
                .act(
                    &LocatorChain::new(spec.clone()),
                    ActionSpec::ClickAtOffset { x: 1_000.0, y: 0.0 },
                    None,
                )
                .await;
            assert!(!outcome.succeeded);
            assert_eq!(outcome.attempts_used, 0);
            assert!(matches!(
                outcome.error,
                Some(TenazError::InvalidAction { .. })
            ));
            assert_eq!(engine.target().resolve_count(&spec), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_connection_error_is_terminal() {
            let spec = LocatorSpec::css("#x");
            let target = MockTarget::new().with(
                spec.clone(),
                MockElement::new().fail_next_dispatch(TargetError::Connection {
                    message: "socket closed".into(),
                }),
            );
            let err = engine(target)
                .click(&LocatorChain::new(spec))
                .await
                .unwrap_err();
            assert!(matches!(err, TenazError::Target(TargetError::Connection { .. })));
        }

        #[tokio::test(start_paused = true)]
        async fn test_forced_click_on_hidden_element() {
            let spec = LocatorSpec::css("#hidden");
            let engine = engine(MockTarget::new().with(spec.clone(), MockElement::new().hidden()));
            let outcome = engine
                .act_with(
                    &LocatorChain::new(spec),
                    ActionSpec::Click,
                    ActionOptions::new().forced(),
                    Some(&RetryPolicy::single_attempt()),
                )
                .await;
            assert!(outcome.succeeded);
        }

        #[tokio::test(start_paused = true)]
        async fn test_every_action_variant() {
            let field = LocatorSpec::css("#field");
            let select = LocatorSpec::css("#select");
            let engine = engine(
                MockTarget::new()
                    .with(field.clone(), MockElement::new())
                    .with(select.clone(), MockElement::new()),
            );
            let f = LocatorChain::new(field.clone());
            engine.double_click(&f).await.unwrap();
            engine.context_click(&f).await.unwrap();
            engine.click_at_offset(&f, 5.0, 5.0).await.unwrap();
            engine.hover(&f).await.unwrap();
            engine.fill(&f, "hello").await.unwrap();
            engine
                .select_option(&LocatorChain::new(select.clone()), "b")
                .await
                .unwrap();

            let names: Vec<_> = engine
                .target()
                .dispatch_log()
                .iter()
                .map(|(_, k)| k.name())
                .collect();
            assert_eq!(
                names,
                vec![
                    "click",
                    "click",
                    "click",
                    "hover",
                    "clear",
                    "insert_text",
                    "select_option"
                ]
            );
            assert_eq!(engine.target().value_of(&field).as_deref(), Some("hello"));
            assert_eq!(engine.target().value_of(&select).as_deref(), Some("b"));
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_zero_poll_interval_rejected() {
            let config = fast_config().with_poll_interval(Duration::ZERO);
            let err = Engine::new(Arc::new(MockTarget::new()), config).unwrap_err();
            assert!(matches!(err, TenazError::Config { .. }));
            assert!(err.to_string().contains("poll_interval_ms"));
        }

        #[test]
        fn test_zero_chain_budget_rejected() {
            let config = fast_config().with_chain_timeout(Some(Duration::ZERO));
            let err = Engine::new(Arc::new(MockTarget::new()), config).unwrap_err();
            assert!(err.to_string().contains("chain_timeout_ms"));
        }

        #[test]
        fn test_valid_config_accepted() {
            let config = fast_config().with_chain_timeout(Some(Duration::from_secs(1)));
            assert!(Engine::new(Arc::new(MockTarget::new()), config).is_ok());
        }
    }

    mod conditional_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_conditional_click_absent_is_false() {
            let engine = engine(MockTarget::new());
            let start = Instant::now();
            let clicked = engine
                .conditional_click(&LocatorChain::new(LocatorSpec::css("#cookie-banner")))
                .await
                .unwrap();
            assert!(!clicked);
            assert!(start.elapsed() < Duration::from_secs(1));
        }

        #[tokio::test(start_paused = true)]
        async fn test_conditional_click_present_clicks() {
            let spec = LocatorSpec::css("#cookie-banner button");
            let engine = engine(MockTarget::new().with(spec.clone(), MockElement::new()));
            assert!(engine
                .conditional_click(&LocatorChain::new(spec))
                .await
                .unwrap());
            assert!(matches!(
                engine.target().dispatch_log()[0].1,
                DispatchKind::Click { .. }
            ));
        }

        #[tokio::test(start_paused = true)]
        async fn test_probes() {
            let spec = LocatorSpec::css("#btn");
            let engine = engine(MockTarget::new().with(spec.clone(), MockElement::new().disabled()));
            let present = LocatorChain::new(spec);
            let absent = LocatorChain::new(LocatorSpec::css("#nope"));
            assert!(engine.probe_exists(&present).await.unwrap());
            assert!(engine.probe_visible(&present).await.unwrap());
            assert!(!engine.probe_enabled(&present).await.unwrap());
            assert!(!engine.probe_exists(&absent).await.unwrap());
            assert!(!engine.probe_visible(&absent).await.unwrap());
            assert!(engine.target().dispatch_log().is_empty());
        }
    }

    mod verify_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_hard_verify_raises() {
            let engine = engine(MockTarget::new());
            let err = engine
                .verify(
                    &LocatorChain::new(LocatorSpec::css("#toast")),
                    Predicate::Visible,
                    VerifyMode::Hard,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, TenazError::Assertion(_)));
            assert!(!err.is_retryable());
        }

        #[tokio::test(start_paused = true)]
        async fn test_soft_verify_collects() {
            let spec = LocatorSpec::css("h1");
            let engine =
                engine(MockTarget::new().with(spec.clone(), MockElement::new().with_text("Home")));
            let chain = LocatorChain::new(spec);
            engine
                .verify(&chain, Predicate::text("Home"), VerifyMode::Soft)
                .await
                .unwrap();
            engine
                .verify(&chain, Predicate::text("About"), VerifyMode::Soft)
                .await
                .unwrap();
            engine
                .verify(&chain, Predicate::Disabled, VerifyMode::Soft)
                .await
                .unwrap();

            let soft = engine.soft();
            assert_eq!(soft.assertion_count(), 3);
            assert_eq!(soft.failure_count(), 2);

            match engine.assert_soft().unwrap_err() {
                TenazError::SoftAssertions(e) => assert_eq!(e.count(), 2),
                other => panic!("unexpected {other:?}"),
            }
            assert!(engine.assert_soft().is_ok());
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_uses_config() {
            let spec = LocatorSpec::css("#x");
            let engine = engine(MockTarget::new());
            let start = Instant::now();
            let err = engine
                .wait(&WaitCondition::ElementExists(spec))
                .await
                .unwrap_err();
            assert!(matches!(err, TenazError::Timeout { .. }));
            assert_eq!(start.elapsed(), Duration::from_secs(2));
        }
    }
}
