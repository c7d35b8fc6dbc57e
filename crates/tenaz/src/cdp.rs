//! Chromium DevTools Protocol target (`cdp` feature).
//!
//! Nodes are located by in-page script and tagged with a
//! `data-tenaz-handle` attribute; the handle id is that attribute's value, so
//! a handle goes stale exactly when the node leaves the document. Pointer
//! input goes through `Input.dispatchMouseEvent` at viewport coordinates and
//! text through `Input.insertText`.

#![allow(clippy::significant_drop_tightening)]

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams,
    MouseButton as CdpMouseButton,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::locator::{LocatorSpec, Strategy};
use crate::result::{TenazError, TenazResult};
use crate::target::{
    BoundingBox, DispatchKind, ElementState, MouseButton, Point, RemoteHandle, RemoteTarget,
    TargetError, TargetResult,
};

const HANDLE_ATTR: &str = "data-tenaz-handle";
const RESOLVE_POLL: Duration = Duration::from_millis(100);

/// `(strategy, pattern) => Element[]`
const FIND_ALL: &str = r#"(strategy, pattern) => {
  const implicit = {
    button: 'button,input[type=button],input[type=submit]',
    link: 'a[href]',
    textbox: 'input:not([type]),input[type=text],input[type=email],input[type=password],textarea',
    checkbox: 'input[type=checkbox]',
    heading: 'h1,h2,h3,h4,h5,h6',
    combobox: 'select',
  };
  switch (strategy) {
    case 'css': return Array.from(document.querySelectorAll(pattern));
    case 'id': { const el = document.getElementById(pattern); return el ? [el] : []; }
    case 'xpath': {
      const snap = document.evaluate(pattern, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      const out = [];
      for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
      return out;
    }
    case 'role': {
      const sel = `[role="${pattern}"]` + (implicit[pattern] ? ',' + implicit[pattern] : '');
      return Array.from(document.querySelectorAll(sel));
    }
    case 'text': {
      const all = Array.from(document.body ? document.body.querySelectorAll('*') : []);
      return all.filter(el => (el.textContent || '').includes(pattern)
        && !Array.from(el.children).some(c => (c.textContent || '').includes(pattern)));
    }
    default: return [];
  }
}"#;

/// `(id) => Element | null`
const BY_HANDLE: &str = r#"(id) => document.querySelector(`[data-tenaz-handle="${id}"]`)"#;

#[derive(Debug, Deserialize)]
struct Boxed<T> {
    v: T,
}

/// Element snapshot as serialized by the page
#[derive(Debug, Deserialize)]
struct Snapshot {
    visible: bool,
    enabled: bool,
    #[serde(rename = "box")]
    bbox: Option<BoundingBox>,
    attributes: BTreeMap<String, String>,
    text: Option<String>,
}

impl From<Snapshot> for ElementState {
    fn from(s: Snapshot) -> Self {
        Self {
            visible: s.visible,
            enabled: s.enabled,
            bounding_box: s.bbox,
            attributes: s.attributes,
            text_content: s.text,
        }
    }
}

/// Launch settings
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Run without a window
    pub headless: bool,
    /// Chromium sandbox (disable in containers)
    pub sandbox: bool,
    /// Chromium binary; auto-detected when unset
    pub executable: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            executable: None,
        }
    }
}

/// [`RemoteTarget`] over one Chromium page
#[derive(Debug)]
pub struct ChromiumTarget {
    page: Page,
    browser: Option<Arc<Mutex<Browser>>>,
    handler: Option<JoinHandle<()>>,
}

impl ChromiumTarget {
    /// Drive an existing page; the caller keeps the browser alive
    #[must_use]
    pub const fn new(page: Page) -> Self {
        Self {
            page,
            browser: None,
            handler: None,
        }
    }

    /// Launch a browser and open a blank page
    ///
    /// # Errors
    ///
    /// Returns a connection error if the browser cannot be started.
    pub async fn launch(options: LaunchOptions) -> TenazResult<Self> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if !options.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(launch_error)?;

        let (browser, mut events) = Browser::launch(config).await.map_err(launch_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        let page = browser.new_page("about:blank").await.map_err(launch_error)?;
        debug!(headless = options.headless, "browser launched");

        Ok(Self {
            page,
            browser: Some(Arc::new(Mutex::new(browser))),
            handler: Some(handler),
        })
    }

    /// The underlying page
    #[must_use]
    pub const fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate and wait for the load event
    ///
    /// # Errors
    ///
    /// Returns a protocol error if navigation fails.
    pub async fn goto(&self, url: &str) -> TenazResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| TenazError::Target(protocol(e)))?;
        Ok(())
    }

    /// Close the browser if this target launched it
    ///
    /// # Errors
    ///
    /// Returns a connection error if the browser does not shut down cleanly.
    pub async fn close(mut self) -> TenazResult<()> {
        if let Some(browser) = self.browser.take() {
            browser.lock().await.close().await.map_err(launch_error)?;
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        Ok(())
    }

    /// Evaluate an expression; results are boxed so `null` survives the trip
    async fn eval<R: DeserializeOwned>(&self, script: String) -> TargetResult<R> {
        trace!(len = script.len(), "evaluate");
        let boxed: Boxed<R> = self
            .page
            .evaluate(format!("({{ v: {script} }})"))
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(protocol)?;
        Ok(boxed.v)
    }

    async fn snapshot(&self, handle: &RemoteHandle) -> TargetResult<ElementState> {
        let script = format!(
            r#"(() => {{
  const el = ({BY_HANDLE})({id});
  if (!el || !el.isConnected) return null;
  const r = el.getBoundingClientRect();
  const style = getComputedStyle(el);
  const attributes = {{}};
  for (const a of el.attributes) attributes[a.name] = a.value;
  delete attributes['{HANDLE_ATTR}'];
  if ('value' in el) attributes.value = String(el.value);
  return {{
    visible: r.width > 0 && r.height > 0 && style.visibility !== 'hidden' && style.display !== 'none',
    enabled: !el.disabled,
    box: (r.width || r.height) ? {{ x: r.x, y: r.y, width: r.width, height: r.height }} : null,
    attributes,
    text: el.textContent,
  }};
}})()"#,
            id = js_str(handle.id()),
        );
        let snapshot: Option<Snapshot> = self.eval(script).await?;
        snapshot.map(Into::into).ok_or(TargetError::Detached)
    }

    /// Run `body` with `el` bound to the handle's node; `false` means detached
    async fn with_node(&self, handle: &RemoteHandle, body: &str) -> TargetResult<bool> {
        let script = format!(
            "(() => {{ const el = ({BY_HANDLE})({id}); if (!el) return false; {body} }})()",
            id = js_str(handle.id()),
        );
        self.eval(script).await
    }

    async fn mouse(
        &self,
        kind: DispatchMouseEventType,
        at: Point,
        button: Option<MouseButton>,
        click_count: i64,
    ) -> TargetResult<()> {
        let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(at.x).y(at.y);
        if let Some(button) = button {
            builder = builder.button(cdp_button(button)).click_count(click_count);
        }
        let params = builder.build().map_err(protocol)?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn center(&self, handle: &RemoteHandle) -> TargetResult<Point> {
        self.snapshot(handle)
            .await?
            .bounding_box
            .map(|b| b.center())
            .ok_or_else(|| TargetError::Rejected {
                message: "element has no layout box".into(),
            })
    }
}

#[async_trait]
impl RemoteTarget for ChromiumTarget {
    async fn resolve(
        &self,
        spec: &LocatorSpec,
        timeout: Duration,
    ) -> TargetResult<Option<RemoteHandle>> {
        let fresh = RemoteHandle::generate();
        let script = format!(
            r#"(() => {{
  const el = ({FIND_ALL})({strategy}, {pattern})[0];
  if (!el) return null;
  let id = el.getAttribute('{HANDLE_ATTR}');
  if (!id) {{ id = {fresh}; el.setAttribute('{HANDLE_ATTR}', id); }}
  return id;
}})()"#,
            strategy = js_str(strategy_name(spec.strategy())),
            pattern = js_str(spec.pattern()),
            fresh = js_str(fresh.id()),
        );

        let deadline = Instant::now() + timeout;
        loop {
            let found: Option<String> = self.eval(script.clone()).await?;
            if let Some(id) = found {
                return Ok(Some(RemoteHandle::new(id)));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RESOLVE_POLL.min(deadline - now)).await;
        }
    }

    async fn query_state(&self, handle: &RemoteHandle) -> TargetResult<ElementState> {
        self.snapshot(handle).await
    }

    async fn dispatch(&self, handle: &RemoteHandle, kind: &DispatchKind) -> TargetResult<()> {
        match kind {
            DispatchKind::Click {
                button,
                click_count,
                position,
            } => {
                let at = match position {
                    Some(p) => *p,
                    None => self.center(handle).await?,
                };
                self.mouse(DispatchMouseEventType::MouseMoved, at, None, 0)
                    .await?;
                for n in 1..=i64::from(*click_count) {
                    self.mouse(DispatchMouseEventType::MousePressed, at, Some(*button), n)
                        .await?;
                    self.mouse(DispatchMouseEventType::MouseReleased, at, Some(*button), n)
                        .await?;
                }
            }
            DispatchKind::Hover => {
                let at = self.center(handle).await?;
                self.mouse(DispatchMouseEventType::MouseMoved, at, None, 0)
                    .await?;
            }
            DispatchKind::Clear => {
                let ok = self
                    .with_node(
                        handle,
                        "el.focus(); el.value = ''; \
                         el.dispatchEvent(new Event('input', { bubbles: true })); return true;",
                    )
                    .await?;
                if !ok {
                    return Err(TargetError::Detached);
                }
            }
            DispatchKind::InsertText(text) => {
                if !self.with_node(handle, "el.focus(); return true;").await? {
                    return Err(TargetError::Detached);
                }
                self.page
                    .execute(InsertTextParams::new(text.clone()))
                    .await
                    .map_err(protocol)?;
            }
            DispatchKind::SelectOption(option) => {
                let body = format!(
                    "const want = {opt}; \
                     const o = Array.from(el.options || []) \
                       .find(o => o.value === want || o.label === want || o.text === want); \
                     if (!o) return null; \
                     el.value = o.value; \
                     el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                     el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                     return true;",
                    opt = js_str(option),
                );
                let script = format!(
                    "(() => {{ const el = ({BY_HANDLE})({id}); if (!el) return false; {body} }})()",
                    id = js_str(handle.id()),
                );
                match self.eval::<Option<bool>>(script).await? {
                    Some(true) => {}
                    Some(false) => return Err(TargetError::Detached),
                    None => {
                        return Err(TargetError::Rejected {
                            message: format!("no option {option:?}"),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    async fn count(&self, spec: &LocatorSpec) -> TargetResult<usize> {
        let script = format!(
            "({FIND_ALL})({}, {}).length",
            js_str(strategy_name(spec.strategy())),
            js_str(spec.pattern()),
        );
        self.eval(script).await
    }

    async fn current_address(&self) -> TargetResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(protocol)?
            .unwrap_or_else(|| "about:blank".to_string()))
    }
}

const fn strategy_name(strategy: Strategy) -> &'static str {
    strategy.prefix()
}

const fn cdp_button(button: MouseButton) -> CdpMouseButton {
    match button {
        MouseButton::Left => CdpMouseButton::Left,
        MouseButton::Right => CdpMouseButton::Right,
        MouseButton::Middle => CdpMouseButton::Middle,
    }
}

/// JSON string literal, safe to splice into a script
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn protocol(e: impl Display) -> TargetError {
    TargetError::Protocol {
        message: e.to_string(),
    }
}

fn launch_error(e: impl Display) -> TenazError {
    TenazError::Target(TargetError::Connection {
        message: e.to_string(),
    })
}
