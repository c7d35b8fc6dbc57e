//! Tenaz: resilient locator resolution and synchronized interaction
//!
//! Tenaz (Portuguese: "tenacious") drives a remote browser page through a
//! narrow collaborator trait and absorbs the flakiness of the page itself:
//! elements that attach late, move while animating, or are re-rendered
//! between lookup and click.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                               Engine                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐   │
//! │  │ Locator  │──►│ Resolver │──►│ Dispatcher │──►│  Verifier  │   │
//! │  │  Chain   │   │(fallback)│   │(actionable)│   │(hard/soft) │   │
//! │  └──────────┘   └──────────┘   └────────────┘   └────────────┘   │
//! │        ▲              │  retry controller + backoff  │           │
//! │        └──────────────┴──────────────────────────────┘           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                 RemoteTarget (mock / CDP / ...)                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tenaz::prelude::*;
//!
//! let engine = Engine::with_defaults(target);
//! let heading = LocatorChain::new(LocatorSpec::css("#main-heading"))
//!     .or(LocatorSpec::xpath("//h1"));
//! engine.click(&heading).await?;
//! engine.verify(&heading, Predicate::text("Welcome"), VerifyMode::Hard).await?;
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod assertion;
mod backoff;
mod config;
mod dispatcher;
mod engine;
mod locator;
mod resolver;
mod result;
mod retry;
mod target;

/// Scripted in-memory target for tests
pub mod mock;

/// Polling waits and wait conditions
pub mod wait;

/// Tracing subscriber setup
pub mod logging;

/// Chromium DevTools Protocol target
#[cfg(feature = "cdp")]
pub mod cdp;

pub use assertion::soft::{AssertionSummary, SoftAssertionError, SoftAssertions};
pub use assertion::{
    AssertionFailure, MatchMode, Predicate, TextMatch, Verifier, VerifyMode,
};
pub use backoff::{
    RetryPolicy, RetryPolicyBuilder, DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use config::{EngineConfig, DEFAULT_CONDITIONAL_TIMEOUT, DEFAULT_VERIFY_TIMEOUT};
pub use dispatcher::{ActionOptions, ActionResult, ActionSpec, Dispatcher, Requirement};
pub use engine::{ActionOutcome, Engine};
pub use locator::{LocatorChain, LocatorSpec, Strategy};
pub use resolver::{ElementHandle, FailureReason, LocatorFailure, ResolutionFailure, Resolver};
pub use result::{ErrorKind, TenazError, TenazResult};
pub use retry::{with_retry, with_retry_outcome, AttemptRecord, RetryExhausted, RetryOutcome};
pub use target::{
    BoundingBox, DispatchKind, ElementState, MouseButton, Point, RemoteHandle, RemoteTarget,
    TargetError, TargetResult,
};
pub use wait::{
    wait_for, CustomCondition, FnCondition, Poller, WaitCondition, WaitConditionResult,
    WaitOptions, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT, MIN_POLL_INTERVAL,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::assertion::soft::*;
    pub use super::assertion::*;
    pub use super::backoff::*;
    pub use super::config::*;
    pub use super::dispatcher::*;
    pub use super::engine::*;
    pub use super::locator::*;
    pub use super::logging::{init_tracing, LogFormat};
    pub use super::result::*;
    pub use super::retry::*;
    pub use super::target::*;
    pub use super::wait::*;

    #[cfg(feature = "cdp")]
    pub use super::cdp::{ChromiumTarget, LaunchOptions};
}
