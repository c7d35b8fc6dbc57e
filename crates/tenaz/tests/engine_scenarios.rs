//! End-to-end scenarios for the engine over the scripted mock target.
//!
//! All tests run on paused tokio time, so backoff sleeps and poll
//! intervals complete instantly and elapsed times are exact.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;
use tenaz::mock::{MockElement, MockTarget};
use tenaz::prelude::*;
use tokio::time::Instant;

fn engine_over(target: MockTarget, config: EngineConfig) -> Engine<Arc<MockTarget>> {
    Engine::new(Arc::new(target), config).unwrap()
}

fn quick() -> EngineConfig {
    EngineConfig::new()
        .with_default_timeout(Duration::from_secs(2))
        .with_conditional_timeout(Duration::from_secs(1))
        .with_poll_interval(Duration::from_millis(100))
        .with_verify_timeout(Duration::from_secs(1))
}

// ============================================================================
// Fallback resolution
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_heading_found_through_fallback() {
    let h1 = LocatorSpec::xpath("//h1");
    let target = MockTarget::at("https://shop.example/home")
        .with(h1.clone(), MockElement::new().with_text("Welcome back"));
    let engine = engine_over(target, quick());

    let heading = LocatorChain::parse_all(&["css=#main-heading", "xpath=//h1"]).unwrap();
    let outcome = engine.click(&heading).await.unwrap();

    assert_eq!(outcome.locator_used, Some(h1.clone()));
    assert_eq!(outcome.attempts_used, 1);
    assert_eq!(
        engine.target().resolve_log(),
        vec![LocatorSpec::css("#main-heading"), h1]
    );

    engine
        .verify(
            &heading,
            Predicate::text_containing("Welcome"),
            VerifyMode::Hard,
        )
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_everywhere_reports_each_locator() {
    let engine = engine_over(MockTarget::at("https://shop.example/cart"), quick());
    let chain = LocatorChain::new(LocatorSpec::css("#checkout"))
        .or(LocatorSpec::text("Checkout"))
        .or(LocatorSpec::role("button"));

    let err = engine
        .act(&chain, ActionSpec::Click, Some(&RetryPolicy::single_attempt()))
        .await
        .into_result()
        .unwrap_err();

    let TenazError::RetryExhausted(exhausted) = err else {
        panic!("expected exhausted retries, got {err:?}");
    };
    let last = exhausted.last().unwrap();
    assert!(last.reason.contains("https://shop.example/cart"));
    assert!(last.reason.contains("css=#checkout"));
    assert!(last.reason.contains("text=Checkout"));
    assert!(last.reason.contains("role=button"));
}

// ============================================================================
// Retry and backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_follows_backoff_schedule() {
    let policy = RetryPolicy::builder()
        .max_attempts(4)
        .initial_delay(Duration::from_secs(1))
        .backoff_factor(2.0)
        .max_delay(Duration::from_secs(30))
        .jitter(false)
        .build()
        .unwrap();
    let engine = engine_over(MockTarget::new(), quick());
    let chain = LocatorChain::new(LocatorSpec::id("never"));

    let outcome = engine.act(&chain, ActionSpec::Click, Some(&policy)).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.attempts_used, 4);
    // 1s + 2s + 4s between the four attempts
    assert_eq!(outcome.elapsed, Duration::from_secs(7));
    let offsets: Vec<_> = outcome.history.iter().map(|r| r.elapsed).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(7)
        ]
    );
    match outcome.error {
        Some(TenazError::RetryExhausted(e)) => {
            assert_eq!(e.attempts.len(), 4);
            assert!(e.to_string().contains("failed after 4 attempt(s)"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_element_attached_by_background_render() {
    let spec = LocatorSpec::css("#results");
    let target = Arc::new(MockTarget::new());
    let engine = Engine::new(Arc::clone(&target), quick()).unwrap();

    let renderer = Arc::clone(&target);
    let render_spec = spec.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        renderer.add(render_spec, MockElement::new().with_text("3 results"));
    });

    let start = Instant::now();
    engine
        .wait_for(
            &WaitCondition::TextContains {
                locator: spec.clone(),
                text: "results".into(),
            },
            Duration::from_secs(5),
            Duration::from_millis(250),
        )
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(1_250));

    engine.click(&LocatorChain::new(spec)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_animating_button_is_clicked_once_settled() {
    let spec = LocatorSpec::css("#slide-in");
    let target = MockTarget::new().with(spec.clone(), MockElement::new().unstable_for(5));
    let engine = engine_over(target, quick());

    let start = Instant::now();
    engine.click(&LocatorChain::new(spec)).await.unwrap();

    assert_eq!(engine.target().dispatch_log().len(), 1);
    assert_eq!(start.elapsed(), Duration::from_millis(500));
}

// ============================================================================
// Must-be-present vs may-be-absent
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_conditional_click_versus_click_on_absent_element() {
    let engine = engine_over(MockTarget::new(), EngineConfig::default());
    let banner = LocatorChain::new(LocatorSpec::css("#cookie-consent"));

    assert!(!engine.conditional_click(&banner).await.unwrap());
    assert!(!engine.probe_exists(&banner).await.unwrap());

    let start = Instant::now();
    let err = engine.click(&banner).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RetryExhausted);
    // default policy: three attempts, 500ms then 1s apart
    assert_eq!(start.elapsed(), Duration::from_millis(1_500));
}

#[tokio::test(start_paused = true)]
async fn test_fill_replaces_previous_value() {
    let email = LocatorSpec::css("input[name=email]");
    let target = MockTarget::new().with(email.clone(), MockElement::new().with_value("stale"));
    let engine = engine_over(target, quick());
    let chain = LocatorChain::new(email.clone());

    engine.fill(&chain, "first@example.com").await.unwrap();
    engine.fill(&chain, "ana@example.com").await.unwrap();

    assert_eq!(
        engine.target().value_of(&email).as_deref(),
        Some("ana@example.com")
    );
    engine
        .verify(
            &chain,
            Predicate::attribute("value", "ana@example.com"),
            VerifyMode::Hard,
        )
        .await
        .unwrap();
}

// ============================================================================
// Verification
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_soft_verification_reports_everything_at_the_end() {
    let title = LocatorSpec::css("h1");
    let save = LocatorSpec::css("#save");
    let rows = LocatorSpec::css("tr.item");
    let target = MockTarget::new()
        .with(title.clone(), MockElement::new().with_text("Invoices"))
        .with(save.clone(), MockElement::new().disabled());
    target.set_count(rows.clone(), 3);
    let engine = engine_over(target, quick());

    let soft = VerifyMode::Soft;
    let title = LocatorChain::new(title);
    engine
        .verify(&title, Predicate::text("Invoices"), soft)
        .await
        .unwrap();
    engine
        .verify(&LocatorChain::new(save), Predicate::Enabled, soft)
        .await
        .unwrap();
    engine
        .verify(&LocatorChain::new(rows), Predicate::Count(5), soft)
        .await
        .unwrap();

    let summary = engine.soft().summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 2);

    let err = engine.assert_soft().unwrap_err();
    assert!(matches!(err, TenazError::SoftAssertions(_)));
    assert_eq!(err.kind(), ErrorKind::Assertion);
    let message = err.to_string();
    assert!(message.starts_with("2 assertion(s) failed:"));
    assert!(message.contains("css=#save"));
    assert!(message.contains("css=tr.item"));
}

#[tokio::test(start_paused = true)]
async fn test_hard_verification_waits_for_late_text() {
    let status = LocatorSpec::css("#status");
    let target = Arc::new(
        MockTarget::new().with(status.clone(), MockElement::new().with_text("Saving...")),
    );
    let engine = Engine::new(Arc::clone(&target), quick()).unwrap();

    let updater = Arc::clone(&target);
    let spec = status.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        updater.update(&spec, |s| s.text_content = Some("Saved".into()));
    });

    engine
        .verify(
            &LocatorChain::new(status),
            Predicate::text("Saved"),
            VerifyMode::Hard,
        )
        .await
        .unwrap();
}

// ============================================================================
// Configuration and logging
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_from_yaml_config() {
    let config = EngineConfig::from_yaml_str(
        "timeout_ms: 3000\nretry.max_attempts: 2\nretry.initial_delay_ms: 250\n",
    )
    .unwrap();
    init_tracing(LogFormat::Pretty).ok();
    let engine = engine_over(MockTarget::new(), config);

    let outcome = engine
        .act(
            &LocatorChain::new(LocatorSpec::css("#gone")),
            ActionSpec::Hover,
            None,
        )
        .await;
    assert_eq!(outcome.attempts_used, 2);
    assert_eq!(outcome.elapsed, Duration::from_millis(250));
}
