//! Interaction dispatcher.
//!
//! Executes one action against an already-resolved [`ElementHandle`].
//! Mutating actions first wait for the element to become actionable:
//!
//! | Action                         | Visible | Enabled | Stable box | Not readonly |
//! |--------------------------------|---------|---------|------------|--------------|
//! | click, double, context, offset |    ✓    |    ✓    |     ✓      |              |
//! | fill                           |    ✓    |    ✓    |            |      ✓       |
//! | select_option                  |    ✓    |    ✓    |            |              |
//! | hover                          |    ✓    |         |     ✓      |              |
//! | probe_*                        |         |         |            |              |
//!
//! A box is stable when two consecutive samples are identical and have a
//! non-zero area.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::locator::LocatorSpec;
use crate::resolver::ElementHandle;
use crate::result::{TenazError, TenazResult};
use crate::target::{
    BoundingBox, DispatchKind, ElementState, MouseButton, Point, RemoteTarget, TargetError,
};
use crate::wait::{duration_ms, Check, Polled, Poller, WaitOptions, DEFAULT_POLL_INTERVAL};

// =============================================================================
// ACTIONS
// =============================================================================

/// Action to perform on a resolved element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Left click at the center
    Click,
    /// Left double-click at the center
    DoubleClick,
    /// Right click at the center
    ContextClick,
    /// Left click at an offset from the top-left corner of the element
    ClickAtOffset {
        /// Horizontal offset in CSS pixels
        x: f64,
        /// Vertical offset in CSS pixels
        y: f64,
    },
    /// Clear, then type `value`
    Fill {
        /// Text to enter
        value: String,
    },
    /// Choose an `<option>` by value or label
    SelectOption {
        /// Option value or label
        option: String,
    },
    /// Move the pointer over the element
    Hover,
    /// Read-only: the element resolved
    ProbeExists,
    /// Read-only: the element is visible
    ProbeVisible,
    /// Read-only: the element is enabled
    ProbeEnabled,
}

impl ActionSpec {
    /// Fill action
    pub fn fill(value: impl Into<String>) -> Self {
        Self::Fill {
            value: value.into(),
        }
    }

    /// Select action
    pub fn select(option: impl Into<String>) -> Self {
        Self::SelectOption {
            option: option.into(),
        }
    }

    /// Short name used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::DoubleClick => "double_click",
            Self::ContextClick => "context_click",
            Self::ClickAtOffset { .. } => "click_at_offset",
            Self::Fill { .. } => "fill",
            Self::SelectOption { .. } => "select_option",
            Self::Hover => "hover",
            Self::ProbeExists => "probe_exists",
            Self::ProbeVisible => "probe_visible",
            Self::ProbeEnabled => "probe_enabled",
        }
    }

    /// Whether the action only reads state
    #[must_use]
    pub const fn is_probe(&self) -> bool {
        matches!(
            self,
            Self::ProbeExists | Self::ProbeVisible | Self::ProbeEnabled
        )
    }

    /// Actionability the element must reach first
    #[must_use]
    pub const fn requirement(&self) -> Requirement {
        match self {
            Self::Click | Self::DoubleClick | Self::ContextClick | Self::ClickAtOffset { .. } => {
                Requirement::POINTER
            }
            Self::Fill { .. } => Requirement::EDITABLE,
            Self::SelectOption { .. } => Requirement::SELECTABLE,
            Self::Hover => Requirement::HOVERABLE,
            Self::ProbeExists | Self::ProbeVisible | Self::ProbeEnabled => Requirement::NONE,
        }
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClickAtOffset { x, y } => write!(f, "click_at_offset({x}, {y})"),
            Self::Fill { value } => write!(f, "fill({value:?})"),
            Self::SelectOption { option } => write!(f, "select_option({option:?})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Actionability precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Requirement {
    /// Must be visible
    pub visible: bool,
    /// Must be enabled
    pub enabled: bool,
    /// Bounding box must be unchanged across two samples
    pub stable: bool,
    /// Must not carry `readonly`
    pub editable: bool,
}

impl Requirement {
    /// No precondition
    pub const NONE: Self = Self {
        visible: false,
        enabled: false,
        stable: false,
        editable: false,
    };
    /// Click variants
    pub const POINTER: Self = Self {
        visible: true,
        enabled: true,
        stable: true,
        editable: false,
    };
    /// Fill
    pub const EDITABLE: Self = Self {
        visible: true,
        enabled: true,
        stable: false,
        editable: true,
    };
    /// Select
    pub const SELECTABLE: Self = Self {
        visible: true,
        enabled: true,
        stable: false,
        editable: false,
    };
    /// Hover
    pub const HOVERABLE: Self = Self {
        visible: true,
        enabled: false,
        stable: true,
        editable: false,
    };

    /// Whether anything must be checked
    #[must_use]
    pub const fn is_none(&self) -> bool {
        !(self.visible || self.enabled || self.stable || self.editable)
    }

    /// Check one sample; `previous` is the box from the sample before
    #[must_use]
    pub fn is_met(&self, state: &ElementState, previous: Option<&BoundingBox>) -> bool {
        if self.visible && !state.visible {
            return false;
        }
        if self.enabled && !state.enabled {
            return false;
        }
        if self.editable && state.attribute("readonly").is_some() {
            return false;
        }
        if self.stable {
            return match (state.bounding_box.as_ref(), previous) {
                (Some(now), Some(before)) => now.has_area() && now == before,
                _ => false,
            };
        }
        true
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.visible {
            parts.push("visible");
        }
        if self.enabled {
            parts.push("enabled");
        }
        if self.stable {
            parts.push("stable");
        }
        if self.editable {
            parts.push("editable");
        }
        if parts.is_empty() {
            return write!(f, "attached");
        }
        write!(f, "{}", parts.join(" + "))
    }
}

/// Per-call action options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionOptions {
    /// Per-attempt timeout; the engine default applies when unset
    pub timeout: Option<Duration>,
    /// Skip actionability checks
    pub force: bool,
}

impl ActionOptions {
    /// Default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set per-attempt timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Skip actionability checks
    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Successful action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// Action name
    pub action: &'static str,
    /// Locator of the element acted on
    pub locator: LocatorSpec,
    /// Answer of a probe; `None` for mutating actions
    pub probe: Option<bool>,
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Performs actions on resolved elements
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    poll_interval: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Dispatcher {
    /// Dispatcher sampling actionability every `poll_interval`
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Perform `action` on `handle`.
    ///
    /// `budget` is what remains of the attempt; actionability waits share it.
    ///
    /// # Errors
    ///
    /// - [`TenazError::InvalidAction`] for offsets outside the element
    /// - [`TenazError::ActionabilityTimeout`] if the element never became actionable
    /// - [`TenazError::Interaction`] for transient rejections, detachment, or a
    ///   fill whose value did not stick
    /// - [`TenazError::Target`] for connection or protocol failures
    pub async fn perform<T: RemoteTarget>(
        &self,
        target: &T,
        handle: &ElementHandle,
        action: &ActionSpec,
        budget: Duration,
        force: bool,
    ) -> TenazResult<ActionResult> {
        if let ActionSpec::ClickAtOffset { x, y } = action {
            if !(x.is_finite() && y.is_finite() && *x >= 0.0 && *y >= 0.0) {
                return Err(TenazError::InvalidAction {
                    message: format!("offset ({x}, {y}) must be finite and non-negative"),
                });
            }
        }

        if action.is_probe() {
            let probe = self.probe(target, handle, action).await?;
            return Ok(ActionResult {
                action: action.name(),
                locator: handle.spec().clone(),
                probe: Some(probe),
            });
        }

        let requirement = action.requirement();
        let state = if force {
            None
        } else {
            Some(
                self.await_actionable(target, handle, action, requirement, budget)
                    .await?,
            )
        };

        let fail = |e: TargetError| interaction_error(action, handle.spec(), e);
        let remote = handle.remote();
        match action {
            ActionSpec::Click => {
                target
                    .dispatch(remote, &click(MouseButton::Left, 1, None))
                    .await
                    .map_err(fail)?;
            }
            ActionSpec::DoubleClick => {
                target
                    .dispatch(remote, &click(MouseButton::Left, 2, None))
                    .await
                    .map_err(fail)?;
            }
            ActionSpec::ContextClick => {
                target
                    .dispatch(remote, &click(MouseButton::Right, 1, None))
                    .await
                    .map_err(fail)?;
            }
            ActionSpec::ClickAtOffset { x, y } => {
                let bbox = match state.and_then(|s| s.bounding_box) {
                    Some(b) => b,
                    None => target
                        .query_state(remote)
                        .await
                        .map_err(fail)?
                        .bounding_box
                        .ok_or_else(|| TenazError::InvalidAction {
                            message: format!("{} has no layout box", handle.spec()),
                        })?,
                };
                if *x > bbox.width || *y > bbox.height {
                    return Err(TenazError::InvalidAction {
                        message: format!(
                            "offset ({x}, {y}) is outside {} ({}x{})",
                            handle.spec(),
                            bbox.width,
                            bbox.height
                        ),
                    });
                }
                let at = bbox.offset(*x, *y);
                target
                    .dispatch(remote, &click(MouseButton::Left, 1, Some(at)))
                    .await
                    .map_err(fail)?;
            }
            ActionSpec::Fill { value } => {
                target
                    .dispatch(remote, &DispatchKind::Clear)
                    .await
                    .map_err(fail)?;
                target
                    .dispatch(remote, &DispatchKind::InsertText(value.clone()))
                    .await
                    .map_err(fail)?;
                let after = target.query_state(remote).await.map_err(fail)?;
                if let Some(actual) = after.attribute("value") {
                    if actual != value {
                        return Err(TenazError::Interaction {
                            action: action.name().to_string(),
                            locator: handle.spec().clone(),
                            message: format!(
                                "value is {actual:?} after fill, expected {value:?}"
                            ),
                        });
                    }
                }
            }
            ActionSpec::SelectOption { option } => {
                target
                    .dispatch(remote, &DispatchKind::SelectOption(option.clone()))
                    .await
                    .map_err(fail)?;
            }
            ActionSpec::Hover => {
                target
                    .dispatch(remote, &DispatchKind::Hover)
                    .await
                    .map_err(fail)?;
            }
            ActionSpec::ProbeExists | ActionSpec::ProbeVisible | ActionSpec::ProbeEnabled => {}
        }

        debug!(action = action.name(), locator = %handle.spec(), force, "dispatched");
        Ok(ActionResult {
            action: action.name(),
            locator: handle.spec().clone(),
            probe: None,
        })
    }

    async fn probe<T: RemoteTarget>(
        &self,
        target: &T,
        handle: &ElementHandle,
        action: &ActionSpec,
    ) -> TenazResult<bool> {
        if *action == ActionSpec::ProbeExists {
            return Ok(true);
        }
        let state = match target.query_state(handle.remote()).await {
            Ok(state) => state,
            Err(TargetError::Detached) => return Ok(false),
            Err(e) => return Err(TenazError::Target(e)),
        };
        Ok(match action {
            ActionSpec::ProbeVisible => state.visible,
            _ => state.enabled,
        })
    }

    async fn await_actionable<T: RemoteTarget>(
        &self,
        target: &T,
        handle: &ElementHandle,
        action: &ActionSpec,
        requirement: Requirement,
        budget: Duration,
    ) -> TenazResult<ElementState> {
        let previous: Mutex<Option<BoundingBox>> = Mutex::new(None);
        let poller = Poller::new(
            WaitOptions::new()
                .with_timeout(budget)
                .with_poll_interval(self.poll_interval),
        );

        let polled = poller
            .poll(|| async {
                let state = target
                    .query_state(handle.remote())
                    .await
                    .map_err(|e| interaction_error(action, handle.spec(), e))?;
                let mut prev = previous.lock().unwrap_or_else(PoisonError::into_inner);
                let met = requirement.is_met(&state, prev.as_ref());
                *prev = state.bounding_box;
                Ok(if met {
                    Check::Satisfied(state)
                } else {
                    Check::Pending(describe(&state))
                })
            })
            .await?;

        match polled {
            Polled::Ready { value, polls, .. } => {
                debug!(locator = %handle.spec(), %requirement, polls, "actionable");
                Ok(value)
            }
            Polled::TimedOut {
                last_observed,
                elapsed,
                ..
            } => Err(TenazError::ActionabilityTimeout {
                locator: handle.spec().clone(),
                requirement: requirement.to_string(),
                waited_ms: duration_ms(elapsed),
                last_observed,
            }),
        }
    }
}

const fn click(button: MouseButton, click_count: u8, position: Option<Point>) -> DispatchKind {
    DispatchKind::Click {
        button,
        click_count,
        position,
    }
}

fn describe(state: &ElementState) -> String {
    let mut text = state.describe();
    if state.attribute("readonly").is_some() {
        text.push_str(", readonly");
    }
    text
}

/// Transient collaborator failures become retryable interaction errors
fn interaction_error(action: &ActionSpec, locator: &LocatorSpec, err: TargetError) -> TenazError {
    if err.is_transient() {
        TenazError::Interaction {
            action: action.name().to_string(),
            locator: locator.clone(),
            message: err.to_string(),
        }
    } else {
        TenazError::Target(err)
    }
}
