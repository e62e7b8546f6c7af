//! Scripted in-memory page.
//!
//! A `MockProbe` models the application under test as named screens of
//! elements. Navigation enters the start screen, clicks follow `leads_to`
//! transitions, and every capability call is recorded so tests can assert
//! exactly what the engine did to the page.

use super::traits::{ElementHandle, EventHub, ProbeAdapter, ProbeEvent, ProbeEventKind};
use crate::parser::types::Locator;
use crate::runner::error::{ProbeError, ProbeResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One element on a mock screen
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    pub text: String,
    /// Selectors this element matches (e.g. "canvas", "button", "#begin")
    pub tags: Vec<String>,
    pub role: Option<String>,
    /// Accessible name; falls back to `text`
    pub name: Option<String>,
    pub visible: bool,
    /// Element is absent until the screen has been observed this many times
    pub appears_after: usize,
    /// Element is removed once the screen has been observed this many times
    pub gone_after: Option<usize>,
    /// Screen entered when the element is clicked
    pub leads_to: Option<String>,
    /// Clicks that fail as detached before the element becomes clickable
    pub detach_clicks: usize,
}

impl MockElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn appears_after(mut self, observations: usize) -> Self {
        self.appears_after = observations;
        self
    }

    pub fn gone_after(mut self, observations: usize) -> Self {
        self.gone_after = Some(observations);
        self
    }

    pub fn leads_to(mut self, screen: impl Into<String>) -> Self {
        self.leads_to = Some(screen.into());
        self
    }

    pub fn detach_clicks(mut self, count: usize) -> Self {
        self.detach_clicks = count;
        self
    }

    fn present_at(&self, observations: usize) -> bool {
        observations > self.appears_after && self.gone_after.map_or(true, |g| observations <= g)
    }

    fn matches(&self, locator: &Locator) -> bool {
        match locator {
            Locator::ByText { text, exact: true } => self.text == *text,
            Locator::ByText { text, exact: false } => {
                self.text.to_lowercase().contains(&text.to_lowercase())
            }
            Locator::BySelector(css) => self.tags.iter().any(|t| t == css),
            Locator::ByRole { role, name } => {
                if self.role.as_deref() != Some(role.as_str()) {
                    return false;
                }
                match name {
                    Some(name) => self
                        .name
                        .as_deref()
                        .unwrap_or(&self.text)
                        .to_lowercase()
                        .contains(&name.to_lowercase()),
                    None => true,
                }
            }
        }
    }
}

/// A named screen with its elements and the console output emitted on entry
#[derive(Debug, Clone, Default)]
pub struct MockScreen {
    pub name: String,
    pub elements: Vec<MockElement>,
    pub console: Vec<String>,
    pub page_errors: Vec<String>,
}

impl MockScreen {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn console(mut self, line: impl Into<String>) -> Self {
        self.console.push(line.into());
        self
    }

    pub fn page_error(mut self, message: impl Into<String>) -> Self {
        self.page_errors.push(message.into());
        self
    }
}

#[derive(Debug, Default)]
struct MockPage {
    screens: HashMap<String, MockScreen>,
    start: String,
    current: Option<String>,
    /// Observations (resolve/count/text) since the current screen was entered
    observations: usize,
    /// Remaining detached clicks per (screen, element index)
    detach_left: HashMap<(String, usize), usize>,
    calls: Vec<String>,
    /// Keys currently pressed
    held_keys: Vec<String>,
    captures: Vec<PathBuf>,
    fail_navigation: Option<String>,
    fail_screenshots: bool,
    eval_results: HashMap<String, Result<serde_json::Value, String>>,
}

impl MockPage {
    fn enter(&mut self, screen: &str) -> Option<MockScreen> {
        self.current = Some(screen.to_string());
        self.observations = 0;
        self.detach_left.clear();
        let screen = self.screens.get(screen).cloned()?;
        for (index, el) in screen.elements.iter().enumerate() {
            if el.detach_clicks > 0 {
                self.detach_left
                    .insert((screen.name.clone(), index), el.detach_clicks);
            }
        }
        Some(screen)
    }

    fn screen(&self) -> Option<&MockScreen> {
        self.current.as_ref().and_then(|c| self.screens.get(c))
    }

    fn observe(&mut self) -> usize {
        self.observations += 1;
        self.observations
    }

    fn find(&self, locator: &Locator, observations: usize) -> Vec<(usize, &MockElement)> {
        match self.screen() {
            Some(screen) => screen
                .elements
                .iter()
                .enumerate()
                .filter(|(_, el)| el.present_at(observations) && el.matches(locator))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Re-resolve a handle selector of the form `screen#index`
    fn lookup(&self, selector: &str) -> Option<(String, usize, MockElement)> {
        let (screen_name, index) = selector.rsplit_once('#')?;
        let index: usize = index.parse().ok()?;
        if self.current.as_deref() != Some(screen_name) {
            return None;
        }
        let el = self.screen()?.elements.get(index)?;
        if !el.present_at(self.observations.max(1)) {
            return None;
        }
        Some((screen_name.to_string(), index, el.clone()))
    }
}

/// In-memory probe used by tests
#[derive(Debug)]
pub struct MockProbe {
    hub: EventHub,
    page: Mutex<MockPage>,
}

impl MockProbe {
    /// Create a probe whose navigation enters `start`
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            hub: EventHub::new(),
            page: Mutex::new(MockPage {
                start: start.into(),
                ..Default::default()
            }),
        }
    }

    pub fn with_screen(self, screen: MockScreen) -> Self {
        if let Ok(mut page) = self.page.lock() {
            page.screens.insert(screen.name.clone(), screen);
        }
        self
    }

    pub fn fail_navigation(self, reason: impl Into<String>) -> Self {
        if let Ok(mut page) = self.page.lock() {
            page.fail_navigation = Some(reason.into());
        }
        self
    }

    pub fn fail_screenshots(self) -> Self {
        if let Ok(mut page) = self.page.lock() {
            page.fail_screenshots = true;
        }
        self
    }

    /// Script the result of `evaluate(script)`; unscripted scripts yield null
    pub fn with_eval(
        self,
        script: impl Into<String>,
        result: Result<serde_json::Value, String>,
    ) -> Self {
        if let Ok(mut page) = self.page.lock() {
            page.eval_results.insert(script.into(), result);
        }
        self
    }

    /// Push an event as if the page emitted it
    pub fn emit(&self, kind: ProbeEventKind, message: impl Into<String>) -> ProbeEvent {
        self.hub.publish(kind, message)
    }

    /// Every capability call made so far, e.g. `click Begin`
    pub fn calls(&self) -> Vec<String> {
        self.page.lock().map(|p| p.calls.clone()).unwrap_or_default()
    }

    pub fn held_keys(&self) -> Vec<String> {
        self.page.lock().map(|p| p.held_keys.clone()).unwrap_or_default()
    }

    pub fn captures(&self) -> Vec<PathBuf> {
        self.page.lock().map(|p| p.captures.clone()).unwrap_or_default()
    }

    pub fn current_screen(&self) -> Option<String> {
        self.page.lock().ok().and_then(|p| p.current.clone())
    }

    fn record(&self, call: String) {
        log::debug!("mock probe: {}", call);
        if let Ok(mut page) = self.page.lock() {
            page.calls.push(call);
        }
    }

    fn enter(&self, screen: &str) {
        let entered = match self.page.lock() {
            Ok(mut page) => page.enter(screen),
            Err(_) => None,
        };
        if let Some(screen) = entered {
            for line in &screen.console {
                self.hub.publish(ProbeEventKind::ConsoleLog, line.clone());
            }
            for error in &screen.page_errors {
                self.hub.publish(ProbeEventKind::PageError, error.clone());
            }
        }
    }

    fn interact(&self, action: &str, handle: &ElementHandle) -> ProbeResult<Option<String>> {
        self.record(format!("{} {}", action, handle.description));
        let mut page = self
            .page
            .lock()
            .map_err(|_| ProbeError::interaction("mock page poisoned"))?;

        let (screen, index, el) = page.lookup(&handle.selector).ok_or_else(|| {
            ProbeError::detached(format!("{} is no longer attached", handle.description))
        })?;

        if !el.visible {
            return Err(ProbeError::interaction(format!(
                "{} is not visible",
                handle.description
            )));
        }

        if action == "click" {
            if let Some(left) = page.detach_left.get_mut(&(screen, index)) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ProbeError::detached(format!(
                        "{} was detached during click",
                        handle.description
                    )));
                }
            }
            return Ok(el.leads_to.clone());
        }
        Ok(None)
    }
}

#[async_trait]
impl ProbeAdapter for MockProbe {
    fn name(&self) -> &str {
        "mock"
    }

    async fn navigate(&self, url: &str) -> ProbeResult<()> {
        self.record(format!("navigate {}", url));
        let (failure, start) = match self.page.lock() {
            Ok(page) => (page.fail_navigation.clone(), page.start.clone()),
            Err(_) => return Err(ProbeError::Navigation("mock page poisoned".into())),
        };
        if let Some(reason) = failure {
            return Err(ProbeError::Navigation(format!("{}: {}", url, reason)));
        }
        self.enter(&start);
        Ok(())
    }

    async fn resolve(&self, locator: &Locator) -> Option<ElementHandle> {
        self.record(format!("resolve {}", locator));
        let mut page = self.page.lock().ok()?;
        let observations = page.observe();
        let screen = page.current.clone()?;
        let found = page.find(locator, observations);
        let nth = found.iter().position(|(_, el)| el.visible).unwrap_or(0);
        let (index, el) = found.get(nth)?;
        Some(ElementHandle {
            selector: format!("{}#{}", screen, index),
            nth,
            description: el.text.clone(),
            visible: el.visible,
        })
    }

    async fn count(&self, locator: &Locator) -> usize {
        self.record(format!("count {}", locator));
        match self.page.lock() {
            Ok(mut page) => {
                let observations = page.observe();
                page.find(locator, observations).len()
            }
            Err(_) => 0,
        }
    }

    async fn page_text(&self) -> ProbeResult<String> {
        self.record("pageText".to_string());
        let mut page = self
            .page
            .lock()
            .map_err(|_| ProbeError::Evaluation("mock page poisoned".into()))?;
        let observations = page.observe();
        let text = page
            .screen()
            .map(|screen| {
                screen
                    .elements
                    .iter()
                    .filter(|el| el.visible && el.present_at(observations))
                    .map(|el| el.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(text)
    }

    async fn click(&self, handle: &ElementHandle) -> ProbeResult<()> {
        if let Some(next) = self.interact("click", handle)? {
            self.enter(&next);
        }
        Ok(())
    }

    async fn hover(&self, handle: &ElementHandle) -> ProbeResult<()> {
        self.interact("hover", handle)?;
        Ok(())
    }

    async fn key_event(&self, key: &str, hold_ms: u64) -> ProbeResult<()> {
        self.record(format!("key {} {}ms", key, hold_ms));
        if let Ok(mut page) = self.page.lock() {
            page.held_keys.push(key.to_string());
        }
        if hold_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(hold_ms)).await;
        }
        if let Ok(mut page) = self.page.lock() {
            page.held_keys.retain(|k| k != key);
        }
        Ok(())
    }

    async fn key_up(&self, key: &str) -> ProbeResult<()> {
        self.record(format!("keyup {}", key));
        if let Ok(mut page) = self.page.lock() {
            page.held_keys.retain(|k| k != key);
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> ProbeResult<serde_json::Value> {
        self.record(format!("evaluate {}", script));
        let result = self
            .page
            .lock()
            .ok()
            .and_then(|p| p.eval_results.get(script).cloned());
        match result {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(ProbeError::Evaluation(message)),
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn screenshot(&self, path: &Path) -> ProbeResult<()> {
        self.record(format!("screenshot {}", path.display()));
        let mut page = self
            .page
            .lock()
            .map_err(|_| ProbeError::Capture("mock page poisoned".into()))?;
        if page.fail_screenshots {
            return Err(ProbeError::Capture(format!(
                "cannot write {}",
                path.display()
            )));
        }
        page.captures.push(path.to_path_buf());
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProbeEvent> {
        self.hub.subscribe()
    }
}

/// Landing -> region map -> 3D scene, the journey the bundled scenarios walk.
///
/// With `render_canvas = false` the scene never produces a `<canvas>`.
pub fn demo_journey(render_canvas: bool) -> MockProbe {
    let landing = MockScreen::new("landing")
        .element(MockElement::new("Explore the States").tag("h1"))
        .element(
            MockElement::new("Begin")
                .tag("button")
                .tag("#begin")
                .role("button")
                .leads_to("map"),
        )
        .console("landing ready");

    let map = MockScreen::new("map")
        .element(
            MockElement::new("Georgia")
                .tag("path")
                .role("button")
                .appears_after(1)
                .leads_to("scene"),
        )
        .element(
            MockElement::new("Maine")
                .tag("path")
                .role("button")
                .appears_after(1)
                .leads_to("scene"),
        )
        .console("map loaded: 50 regions");

    let mut scene = MockScreen::new("scene")
        .element(MockElement::new("Entering Georgia").tag(".loader").gone_after(2))
        .console("scene: loading terrain");
    if render_canvas {
        scene = scene.element(MockElement::new("").tag("canvas").appears_after(2));
    }

    MockProbe::new("landing")
        .with_screen(landing)
        .with_screen(map)
        .with_screen(scene)
}
