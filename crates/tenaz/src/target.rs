//! RemoteTarget - the protocol collaborator the engine drives.
//!
//! The engine never talks to a browser directly. Everything goes through the
//! four primitives below (plus `count`), so the same resolution, polling and
//! retry logic runs against CDP, WebDriver, or the in-memory [`MockTarget`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Engine (resolver + dispatcher + poller + retry controller)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  RemoteTarget (async trait)                                  │
//! │  resolve · query_state · dispatch · count · current_address  │
//! ├───────────────────────┬──────────────────────┬───────────────┤
//! │  ChromiumTarget (cdp) │  MockTarget (tests)  │  your adapter │
//! └───────────────────────┴──────────────────────┴───────────────┘
//! ```
//!
//! [`MockTarget`]: crate::mock::MockTarget

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::locator::LocatorSpec;

/// Result type for collaborator calls
pub type TargetResult<T> = Result<T, TargetError>;

/// Failures reported by a [`RemoteTarget`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The node was removed from the document after it was resolved
    #[error("element is detached from the document")]
    Detached,

    /// Another element would receive the pointer event
    #[error("element is obscured by {by}")]
    Obscured {
        /// Description of the covering element
        by: String,
    },

    /// The target refused the action for a transient reason
    #[error("target rejected the action: {message}")]
    Rejected {
        /// Error message
        message: String,
    },

    /// The connection to the remote target failed
    #[error("connection failed: {message}")]
    Connection {
        /// Error message
        message: String,
    },

    /// Malformed request or response
    #[error("protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },
}

impl TargetError {
    /// Whether a fresh resolve + act might succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Detached | Self::Obscured { .. } | Self::Rejected { .. }
        )
    }
}

/// A point in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Bounding box for an element, in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the center point
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Translate an offset relative to the top-left corner into viewport coordinates
    #[must_use]
    pub fn offset(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }

    /// Check if a point is inside this bounding box
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    /// Whether the box has a non-zero area
    #[must_use]
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Opaque reference to a node in the remote document.
///
/// Only valid for the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle {
    id: String,
}

impl RemoteHandle {
    /// Wrap an id issued by the remote target
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Fresh random id, for adapters that must mint their own
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The remote id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Snapshot of an element's observable state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementState {
    /// Rendered and not hidden by style
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Layout box, if rendered
    pub bounding_box: Option<BoundingBox>,
    /// Attribute map; form controls report their current value under `value`
    pub attributes: BTreeMap<String, String>,
    /// Text content
    pub text_content: Option<String>,
}

impl ElementState {
    /// Look up an attribute
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Short human description used in error messages
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "visible={}, enabled={}, box={}",
            self.visible,
            self.enabled,
            self.bounding_box.map_or_else(
                || "none".to_string(),
                |b| format!("({:.1},{:.1} {:.1}x{:.1})", b.x, b.y, b.width, b.height)
            )
        )
    }
}

/// Mouse button for pointer actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    /// Primary button
    Left,
    /// Context-menu button
    Right,
    /// Wheel button
    Middle,
}

/// Low-level action sent to the remote target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchKind {
    /// Pointer click sequence
    Click {
        /// Button to press
        button: MouseButton,
        /// 1 for click, 2 for double-click
        click_count: u8,
        /// Viewport position; `None` means the element's center
        position: Option<Point>,
    },
    /// Move the pointer over the element
    Hover,
    /// Remove any existing value from an editable element
    Clear,
    /// Insert text at the caret
    InsertText(String),
    /// Select an `<option>` by value or label
    SelectOption(String),
}

impl DispatchKind {
    /// Short name used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Hover => "hover",
            Self::Clear => "clear",
            Self::InsertText(_) => "insert_text",
            Self::SelectOption(_) => "select_option",
        }
    }
}

/// Protocol collaborator driven by the engine
///
/// Implementations own their connection. The engine only holds a shared
/// reference and never caches handles across attempts.
#[async_trait]
pub trait RemoteTarget: Send + Sync {
    /// Resolve one locator, waiting up to `timeout` for the node to attach.
    /// `Ok(None)` means not found.
    async fn resolve(
        &self,
        spec: &LocatorSpec,
        timeout: Duration,
    ) -> TargetResult<Option<RemoteHandle>>;

    /// Read the current state of a resolved node
    async fn query_state(&self, handle: &RemoteHandle) -> TargetResult<ElementState>;

    /// Perform a low-level action on a resolved node
    async fn dispatch(&self, handle: &RemoteHandle, kind: &DispatchKind) -> TargetResult<()>;

    /// Number of nodes currently matching a locator
    async fn count(&self, spec: &LocatorSpec) -> TargetResult<usize>;

    /// Current document address, for diagnostics
    async fn current_address(&self) -> TargetResult<String>;
}

#[async_trait]
impl<T: RemoteTarget + ?Sized> RemoteTarget for Arc<T> {
    async fn resolve(
        &self,
        spec: &LocatorSpec,
        timeout: Duration,
    ) -> TargetResult<Option<RemoteHandle>> {
        (**self).resolve(spec, timeout).await
    }

    async fn query_state(&self, handle: &RemoteHandle) -> TargetResult<ElementState> {
        (**self).query_state(handle).await
    }

    async fn dispatch(&self, handle: &RemoteHandle, kind: &DispatchKind) -> TargetResult<()> {
        (**self).dispatch(handle, kind).await
    }

    async fn count(&self, spec: &LocatorSpec) -> TargetResult<usize> {
        (**self).count(spec).await
    }

    async fn current_address(&self) -> TargetResult<String> {
        (**self).current_address().await
    }
}
