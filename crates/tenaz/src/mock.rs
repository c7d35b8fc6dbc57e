//! In-memory scripted [`RemoteTarget`] for unit testing.
//!
//! Elements are registered under the exact [`LocatorSpec`] that finds them.
//! Each element can be scripted to attach late, become visible late, move for
//! a few samples, hang on resolution, or reject upcoming dispatches. Every
//! resolve and dispatch is recorded so tests can assert on call order.
//!
//! By default a missing element is reported at once. A target built with
//! [`MockTarget::waiting`] instead keeps looking for the whole timeout it is
//! given, like a real browser adapter does.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::locator::LocatorSpec;
use crate::target::{
    BoundingBox, DispatchKind, ElementState, RemoteHandle, RemoteTarget, TargetError,
    TargetResult,
};

/// Scripted element
#[derive(Debug, Clone)]
pub struct MockElement {
    state: ElementState,
    attach_after: u32,
    visible_after: u32,
    unstable_for: u32,
    resolve_delay: Option<Duration>,
    dispatch_failures: VecDeque<TargetError>,
}

impl Default for MockElement {
    fn default() -> Self {
        Self::new()
    }
}

impl MockElement {
    /// Visible, enabled element with a 100x30 box at the origin
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ElementState {
                visible: true,
                enabled: true,
                bounding_box: Some(BoundingBox::new(0.0, 0.0, 100.0, 30.0)),
                ..ElementState::default()
            },
            attach_after: 0,
            visible_after: 0,
            unstable_for: 0,
            resolve_delay: None,
            dispatch_failures: VecDeque::new(),
        }
    }

    /// Not rendered
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.state.visible = false;
        self
    }

    /// Disabled form control
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.state.enabled = false;
        self
    }

    /// Set text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.state.text_content = Some(text.into());
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.state.attributes.insert(name.into(), value.into());
        self
    }

    /// Editable control with an initial value
    #[must_use]
    pub fn with_value(self, value: impl Into<String>) -> Self {
        self.with_attribute("value", value)
    }

    /// Set the layout box
    #[must_use]
    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.state.bounding_box = Some(bbox);
        self
    }

    /// The first `n` resolutions report not-found
    #[must_use]
    pub fn attach_after(mut self, n: u32) -> Self {
        self.attach_after = n;
        self
    }

    /// The first `n` state queries report not visible
    #[must_use]
    pub fn visible_after(mut self, n: u32) -> Self {
        self.visible_after = n;
        self
    }

    /// The bounding box moves on each of the first `n` state queries
    #[must_use]
    pub fn unstable_for(mut self, n: u32) -> Self {
        self.unstable_for = n;
        self
    }

    /// Every resolution blocks for `delay` before answering, ignoring the
    /// caller's timeout
    #[must_use]
    pub fn hang_on_resolve(mut self, delay: Duration) -> Self {
        self.resolve_delay = Some(delay);
        self
    }

    /// The next dispatch fails with `error`; call repeatedly to queue more
    #[must_use]
    pub fn fail_next_dispatch(mut self, error: TargetError) -> Self {
        self.dispatch_failures.push_back(error);
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    elements: HashMap<LocatorSpec, MockElement>,
    counts: HashMap<LocatorSpec, usize>,
    handles: HashMap<LocatorSpec, RemoteHandle>,
    wait_for_absent: bool,
    resolve_log: Vec<LocatorSpec>,
    dispatch_log: Vec<(LocatorSpec, DispatchKind)>,
}

impl MockState {
    fn spec_of(&self, handle: &RemoteHandle) -> Option<LocatorSpec> {
        self.handles
            .iter()
            .find(|(_, h)| *h == handle)
            .map(|(spec, _)| spec.clone())
    }
}

/// Mock remote target
#[derive(Debug, Default)]
pub struct MockTarget {
    inner: Mutex<MockState>,
}

impl MockTarget {
    /// Empty document at `about:blank`
    #[must_use]
    pub fn new() -> Self {
        Self::at("about:blank")
    }

    /// Empty document at `url`
    #[must_use]
    pub fn at(url: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(MockState {
                url: url.into(),
                ..MockState::default()
            }),
        }
    }

    /// Absent elements take the full resolve timeout to report not-found
    #[must_use]
    pub fn waiting(self) -> Self {
        self.state().wait_for_absent = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) the element found by `spec`
    pub fn add(&self, spec: LocatorSpec, element: MockElement) {
        self.state().elements.insert(spec, element);
    }

    /// Builder form of [`MockTarget::add`]
    #[must_use]
    pub fn with(self, spec: LocatorSpec, element: MockElement) -> Self {
        self.add(spec, element);
        self
    }

    /// Remove an element; handles to it become detached
    pub fn detach(&self, spec: &LocatorSpec) {
        let mut state = self.state();
        state.elements.remove(spec);
        state.handles.remove(spec);
    }

    /// Number of live handles
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.state().handles.len()
    }

    /// Mutate a registered element's state in place
    pub fn update(&self, spec: &LocatorSpec, f: impl FnOnce(&mut ElementState)) {
        if let Some(element) = self.state().elements.get_mut(spec) {
            f(&mut element.state);
        }
    }

    /// Override the match count reported for `spec`
    pub fn set_count(&self, spec: LocatorSpec, count: usize) {
        self.state().counts.insert(spec, count);
    }

    /// Change the document address
    pub fn navigate(&self, url: impl Into<String>) {
        self.state().url = url.into();
    }

    /// Every locator sent to `resolve`, in call order
    #[must_use]
    pub fn resolve_log(&self) -> Vec<LocatorSpec> {
        self.state().resolve_log.clone()
    }

    /// Every dispatched action with the locator that produced its handle
    #[must_use]
    pub fn dispatch_log(&self) -> Vec<(LocatorSpec, DispatchKind)> {
        self.state().dispatch_log.clone()
    }

    /// How many times `spec` was sent to `resolve`
    #[must_use]
    pub fn resolve_count(&self, spec: &LocatorSpec) -> usize {
        self.state()
            .resolve_log
            .iter()
            .filter(|s| *s == spec)
            .count()
    }

    /// Current `value` attribute of an element
    #[must_use]
    pub fn value_of(&self, spec: &LocatorSpec) -> Option<String> {
        self.state()
            .elements
            .get(spec)
            .and_then(|e| e.state.attribute("value").map(str::to_string))
    }
}

#[async_trait]
impl RemoteTarget for MockTarget {
    async fn resolve(
        &self,
        spec: &LocatorSpec,
        timeout: Duration,
    ) -> TargetResult<Option<RemoteHandle>> {
        let delay = {
            let mut state = self.state();
            state.resolve_log.push(spec.clone());
            state.elements.get(spec).and_then(|e| e.resolve_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (found, wait) = {
            let mut state = self.state();
            let found = match state.elements.get_mut(spec) {
                Some(element) if element.attach_after > 0 => {
                    element.attach_after -= 1;
                    false
                }
                Some(_) => true,
                None => false,
            };
            (found, state.wait_for_absent)
        };

        if !found {
            if wait {
                tokio::time::sleep(timeout).await;
            }
            return Ok(None);
        }

        let mut state = self.state();
        let handle = state
            .handles
            .entry(spec.clone())
            .or_insert_with(RemoteHandle::generate)
            .clone();
        Ok(Some(handle))
    }

    async fn query_state(&self, handle: &RemoteHandle) -> TargetResult<ElementState> {
        let mut state = self.state();
        let spec = state.spec_of(handle).ok_or(TargetError::Detached)?;
        let element = state
            .elements
            .get_mut(&spec)
            .ok_or(TargetError::Detached)?;

        if element.unstable_for > 0 {
            element.unstable_for -= 1;
            if let Some(ref mut bbox) = element.state.bounding_box {
                bbox.y += 10.0;
            }
        }

        let mut snapshot = element.state.clone();
        if element.visible_after > 0 {
            element.visible_after -= 1;
            snapshot.visible = false;
        }
        Ok(snapshot)
    }

    async fn dispatch(&self, handle: &RemoteHandle, kind: &DispatchKind) -> TargetResult<()> {
        let mut state = self.state();
        let spec = state.spec_of(handle).ok_or(TargetError::Detached)?;
        let element = state
            .elements
            .get_mut(&spec)
            .ok_or(TargetError::Detached)?;

        if let Some(err) = element.dispatch_failures.pop_front() {
            state.dispatch_log.push((spec, kind.clone()));
            return Err(err);
        }

        match kind {
            DispatchKind::Clear => {
                element
                    .state
                    .attributes
                    .insert("value".to_string(), String::new());
            }
            DispatchKind::InsertText(text) => {
                element
                    .state
                    .attributes
                    .entry("value".to_string())
                    .or_default()
                    .push_str(text);
            }
            DispatchKind::SelectOption(option) => {
                element
                    .state
                    .attributes
                    .insert("value".to_string(), option.clone());
            }
            DispatchKind::Click { .. } | DispatchKind::Hover => {}
        }

        state.dispatch_log.push((spec, kind.clone()));
        Ok(())
    }

    async fn count(&self, spec: &LocatorSpec) -> TargetResult<usize> {
        let state = self.state();
        if let Some(count) = state.counts.get(spec) {
            return Ok(*count);
        }
        Ok(usize::from(state.elements.contains_key(spec)))
    }

    async fn current_address(&self) -> TargetResult<String> {
        Ok(self.state().url.clone())
    }
}
