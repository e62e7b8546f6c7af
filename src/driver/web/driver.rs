//! Web probe implementation using Playwright
//!
//! Drives a single page of a Chromium, Firefox or WebKit browser. Console
//! messages are pumped from the page event stream into an [`EventHub`];
//! uncaught errors are forwarded through an init script as console lines
//! carrying [`PAGE_ERROR_PREFIX`] and re-classified as page errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use futures::StreamExt;
use playwright::api::page::Event as PageEvent;
use playwright::api::{Browser, BrowserContext, Page, Viewport};
use playwright::Playwright;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::driver::traits::{ElementHandle, EventHub, ProbeAdapter, ProbeEvent, ProbeEventKind};
use crate::parser::types::Locator;
use crate::runner::error::{ProbeError, ProbeResult};
use crate::utils::config::parse_flag;

/// Marker prepended to console lines produced by the page-error hook
pub const PAGE_ERROR_PREFIX: &str = "__lumi_pageerror__:";

/// Chromium flags that force software WebGL (swiftshader)
pub const SOFTWARE_GL_ARGS: [&str; 4] = [
    "--use-gl=swiftshader",
    "--enable-unsafe-swiftshader",
    "--enable-webgl",
    "--ignore-gpu-blocklist",
];

const PAGE_ERROR_HOOK: &str = r#"
(() => {
  const prefix = "__lumi_pageerror__:";
  window.addEventListener("error", (e) => {
    console.error(prefix + (e.error && e.error.stack ? e.error.stack : e.message));
  });
  window.addEventListener("unhandledrejection", (e) => {
    const r = e.reason;
    console.error(prefix + "Unhandled rejection: " + (r && r.stack ? r.stack : String(r)));
  });
})();
"#;

const PAGE_TEXT_JS: &str = "() => document.body ? document.body.innerText : ''";

/// Web browser type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrowserType {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserType::Chromium => "chromium",
            BrowserType::Firefox => "firefox",
            BrowserType::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserType::Chromium),
            "firefox" => Ok(BrowserType::Firefox),
            "webkit" | "safari" => Ok(BrowserType::Webkit),
            other => anyhow::bail!("Unknown browser: {}", other),
        }
    }
}

/// Web probe configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WebProbeConfig {
    pub browser_type: BrowserType,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Extra launch arguments
    pub args: Vec<String>,
    /// Force software WebGL (Chromium only)
    pub software_gl: bool,
    /// CDP endpoint of an already running browser (e.g. http://localhost:9222)
    pub cdp_endpoint: Option<String>,
    /// Explicit browser binary
    pub executable: Option<PathBuf>,
}

impl Default for WebProbeConfig {
    fn default() -> Self {
        Self {
            browser_type: BrowserType::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            args: Vec::new(),
            software_gl: false,
            cdp_endpoint: None,
            executable: None,
        }
    }
}

impl WebProbeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup("LUMI_HEADLESS") {
            match parse_flag(&value) {
                Some(flag) => config.headless = flag,
                None => log::warn!("Ignoring invalid LUMI_HEADLESS={}", value),
            }
        }
        if let Some(value) = lookup("LUMI_SOFTWARE_GL") {
            match parse_flag(&value) {
                Some(flag) => config.software_gl = flag,
                None => log::warn!("Ignoring invalid LUMI_SOFTWARE_GL={}", value),
            }
        }
        if let Some(value) = lookup("LUMI_BROWSER") {
            match value.parse() {
                Ok(browser) => config.browser_type = browser,
                Err(e) => log::warn!("Ignoring LUMI_BROWSER: {}", e),
            }
        }
        config.cdp_endpoint = lookup("LUMI_CDP_ENDPOINT").filter(|v| !v.trim().is_empty());
        config.executable = lookup("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH").map(PathBuf::from);
        config
    }

    /// Chromium launch arguments
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--disable-dev-shm-usage",
            "--ignore-certificate-errors",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if self.software_gl {
            args.extend(SOFTWARE_GL_ARGS.iter().map(|s| s.to_string()));
        } else if self.headless {
            args.push("--disable-gpu".to_string());
        }
        for arg in &self.args {
            if !args.contains(arg) {
                args.push(arg.clone());
            }
        }
        args
    }
}

/// Probe over one Playwright page
pub struct WebProbe {
    #[allow(dead_code)]
    playwright: Arc<Playwright>,
    #[allow(dead_code)]
    browser: Arc<Browser>,
    #[allow(dead_code)]
    context: Arc<BrowserContext>,
    page: Arc<Mutex<Page>>,
    config: WebProbeConfig,
    hub: Arc<EventHub>,
    pump: tokio::task::JoinHandle<()>,
}

impl WebProbe {
    /// Launch (or attach to) a browser and open the page the engine drives
    pub async fn new(config: WebProbeConfig) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;

        let browser = match config.browser_type {
            BrowserType::Chromium => {
                let chromium = playwright.chromium();
                match config.cdp_endpoint {
                    Some(ref endpoint) => {
                        log::info!("Connecting to browser at {}", endpoint);
                        chromium
                            .connect_over_cdp_builder(endpoint)
                            .connect_over_cdp()
                            .await
                            .with_context(|| format!("Could not connect to {}", endpoint))?
                    }
                    None => launch_chromium_browser(&chromium, &config).await?,
                }
            }
            BrowserType::Firefox => {
                playwright
                    .firefox()
                    .launcher()
                    .headless(config.headless)
                    .launch()
                    .await?
            }
            BrowserType::Webkit => {
                playwright
                    .webkit()
                    .launcher()
                    .headless(config.headless)
                    .launch()
                    .await?
            }
        };

        let context = browser.context_builder().build().await?;
        context
            .add_init_script(PAGE_ERROR_HOOK)
            .await
            .context("Failed to install page error hook")?;
        let page = context.new_page().await?;

        page.set_viewport_size(Viewport {
            width: config.viewport_width as i32,
            height: config.viewport_height as i32,
        })
        .await?;

        let hub = Arc::new(EventHub::new());
        let pump = spawn_event_pump(&page, hub.clone())?;

        Ok(Self {
            playwright: Arc::new(playwright),
            browser: Arc::new(browser),
            context: Arc::new(context),
            page: Arc::new(Mutex::new(page)),
            config,
            hub,
            pump,
        })
    }

    /// Re-resolve the element a handle points at
    async fn query(&self, handle: &ElementHandle) -> ProbeResult<playwright::api::ElementHandle> {
        let page = self.page.lock().await;
        match page.query_selector_all(&handle.selector).await {
            Ok(elements) => elements.into_iter().nth(handle.nth).ok_or_else(|| {
                ProbeError::detached(format!(
                    "element {} is no longer attached",
                    handle.description
                ))
            }),
            Err(e) => Err(interaction_error(&e.to_string())),
        }
    }
}

impl Drop for WebProbe {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn spawn_event_pump(page: &Page, hub: Arc<EventHub>) -> Result<tokio::task::JoinHandle<()>> {
    let mut events = Box::pin(
        page.subscribe_event()
            .context("Failed to subscribe to page events")?,
    );

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Ok(PageEvent::Console(message)) = event else {
                continue;
            };
            let text = message.text().unwrap_or_default();
            let (kind, text) = classify_console(&text);
            hub.publish(kind, text);
        }
    }))
}

/// Index of the first visible match, else the first match
pub fn pick_match(visibility: &[bool]) -> Option<(usize, bool)> {
    match visibility.iter().position(|v| *v) {
        Some(nth) => Some((nth, true)),
        None if visibility.is_empty() => None,
        None => Some((0, false)),
    }
}

/// Split the page-error marker off a console line
pub fn classify_console(text: &str) -> (ProbeEventKind, String) {
    match text.strip_prefix(PAGE_ERROR_PREFIX) {
        Some(rest) => (ProbeEventKind::PageError, rest.to_string()),
        None => (ProbeEventKind::ConsoleLog, text.to_string()),
    }
}

fn interaction_error(message: &str) -> ProbeError {
    let lower = message.to_lowercase();
    if lower.contains("not attached") || lower.contains("detached") {
        ProbeError::detached(message)
    } else {
        ProbeError::interaction(message)
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        format!("\"{}\"", value)
    } else if !value.contains('\'') {
        format!("'{}'", value)
    } else {
        let parts: Vec<String> = value.split('"').map(|p| format!("\"{}\"", p)).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

/// XPath condition for elements that carry `role`, explicitly or implicitly
fn role_condition(role: &str) -> String {
    let explicit = format!("@role={}", xpath_literal(role));
    let implicit = match role.to_lowercase().as_str() {
        "button" => "self::button or (self::input and (@type='button' or @type='submit' or @type='reset'))",
        "link" => "(self::a or self::area) and @href",
        "heading" => "self::h1 or self::h2 or self::h3 or self::h4 or self::h5 or self::h6",
        "img" => "self::img",
        "textbox" => "self::textarea or (self::input and (not(@type) or @type='text' or @type='email' or @type='search'))",
        "checkbox" => "self::input and @type='checkbox'",
        "list" => "self::ul or self::ol",
        "listitem" => "self::li",
        _ => "",
    };
    if implicit.is_empty() {
        explicit
    } else {
        format!("{} or ({})", explicit, implicit)
    }
}

/// Map a locator to a Playwright selector string
pub fn locator_to_playwright(locator: &Locator) -> String {
    match locator {
        Locator::ByText { text, exact: true } => format!("text={}", quote(text)),
        Locator::ByText { text, exact: false } => format!("text={}", text),
        Locator::BySelector(css) => css.clone(),
        Locator::ByRole { role, name } => {
            let mut xpath = format!("//*[{}]", role_condition(role));
            if let Some(name) = name {
                let name = xpath_literal(name);
                xpath.push_str(&format!(
                    "[@aria-label={n} or contains(normalize-space(.), {n})]",
                    n = name
                ));
            }
            format!("xpath={}", xpath)
        }
    }
}

#[async_trait]
impl ProbeAdapter for WebProbe {
    fn name(&self) -> &str {
        self.config.browser_type.as_str()
    }

    async fn navigate(&self, url: &str) -> ProbeResult<()> {
        let page = self.page.lock().await;
        page.goto_builder(url)
            .goto()
            .await
            .map_err(|e| ProbeError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    async fn resolve(&self, locator: &Locator) -> Option<ElementHandle> {
        let selector = locator_to_playwright(locator);
        let page = self.page.lock().await;
        let elements = page.query_selector_all(&selector).await.ok()?;
        let mut visibility = Vec::with_capacity(elements.len());
        for element in &elements {
            visibility.push(element.is_visible().await.unwrap_or(false));
        }
        let (nth, visible) = pick_match(&visibility)?;
        Some(ElementHandle {
            selector,
            nth,
            description: locator.to_string(),
            visible,
        })
    }

    async fn count(&self, locator: &Locator) -> usize {
        let selector = locator_to_playwright(locator);
        let page = self.page.lock().await;
        page.query_selector_all(&selector)
            .await
            .map(|elements| elements.len())
            .unwrap_or(0)
    }

    async fn page_text(&self) -> ProbeResult<String> {
        let page = self.page.lock().await;
        page.evaluate::<(), String>(PAGE_TEXT_JS, ())
            .await
            .map_err(|e| ProbeError::Evaluation(e.to_string()))
    }

    async fn click(&self, handle: &ElementHandle) -> ProbeResult<()> {
        let element = self.query(handle).await?;
        element
            .click_builder()
            .click()
            .await
            .map_err(|e| interaction_error(&format!("click {}: {}", handle.description, e)))
    }

    async fn hover(&self, handle: &ElementHandle) -> ProbeResult<()> {
        let element = self.query(handle).await?;
        let bounds = element
            .bounding_box()
            .await
            .map_err(|e| interaction_error(&e.to_string()))?
            .ok_or_else(|| {
                ProbeError::interaction(format!("{} has no bounding box", handle.description))
            })?;

        let page = self.page.lock().await;
        page.mouse
            .r#move(
                bounds.x + bounds.width / 2.0,
                bounds.y + bounds.height / 2.0,
                None,
            )
            .await
            .map_err(|e| interaction_error(&format!("hover {}: {}", handle.description, e)))
    }

    async fn key_event(&self, key: &str, hold_ms: u64) -> ProbeResult<()> {
        let page = self.page.lock().await;
        page.keyboard
            .down(key)
            .await
            .map_err(|e| ProbeError::interaction(format!("key {}: {}", key, e)))?;
        if hold_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(hold_ms)).await;
        }
        page.keyboard
            .up(key)
            .await
            .map_err(|e| ProbeError::interaction(format!("key {}: {}", key, e)))
    }

    async fn key_up(&self, key: &str) -> ProbeResult<()> {
        let page = self.page.lock().await;
        page.keyboard
            .up(key)
            .await
            .map_err(|e| ProbeError::interaction(format!("key {}: {}", key, e)))
    }

    async fn evaluate(&self, script: &str) -> ProbeResult<serde_json::Value> {
        let page = self.page.lock().await;
        page.evaluate::<(), serde_json::Value>(script, ())
            .await
            .map_err(|e| ProbeError::Evaluation(e.to_string()))
    }

    async fn screenshot(&self, path: &Path) -> ProbeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProbeError::Capture(e.to_string()))?;
        }
        let page = self.page.lock().await;
        page.screenshot_builder()
            .path(path.to_path_buf())
            .screenshot()
            .await
            .map_err(|e| ProbeError::Capture(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProbeEvent> {
        self.hub.subscribe()
    }
}

/// Launch a new Chromium browser
async fn launch_chromium_browser(
    chromium: &playwright::api::BrowserType,
    config: &WebProbeConfig,
) -> Result<Browser> {
    let mut launcher = chromium.launcher();
    launcher = launcher.headless(config.headless);

    let executable = config.executable.clone().or_else(find_system_browser);
    match executable {
        Some(ref path) => {
            println!("{} Using browser: {}", "🌐".blue(), path.display());
            launcher = launcher.executable(path);
        }
        None => log::info!("No browser executable found, using the Playwright default"),
    }

    let args = config.launch_args();
    if config.software_gl {
        println!("{} Software WebGL enabled (swiftshader)", "🧊".cyan());
    }
    launcher = launcher.args(&args);

    Ok(launcher.launch().await?)
}

fn find_system_browser() -> Option<PathBuf> {
    let common_paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    common_paths
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_locator_mapping() {
        assert_eq!(
            locator_to_playwright(&Locator::exact_text("Begin")),
            "text=\"Begin\""
        );
        assert_eq!(locator_to_playwright(&Locator::text("Georgia")), "text=Georgia");
        assert_eq!(locator_to_playwright(&Locator::css("canvas")), "canvas");

        let role = locator_to_playwright(&Locator::role("button", Some("Begin")));
        assert!(role.starts_with("xpath=//*[@role=\"button\" or (self::button"));
        assert!(role.ends_with("[@aria-label=\"Begin\" or contains(normalize-space(.), \"Begin\")]"));

        let custom = locator_to_playwright(&Locator::role("region", None));
        assert_eq!(custom, "xpath=//*[@role=\"region\"]");
    }

    #[test]
    fn test_xpath_literal_quotes() {
        assert_eq!(xpath_literal("plain"), "\"plain\"");
        assert_eq!(xpath_literal("say \"hi\""), "'say \"hi\"'");
        assert_eq!(
            xpath_literal("it's \"x\""),
            "concat(\"it's \", '\"', \"x\", '\"', \"\")"
        );
    }

    #[test]
    fn test_pick_match_prefers_visible() {
        assert_eq!(pick_match(&[false, true, true]), Some((1, true)));
        assert_eq!(pick_match(&[true, false]), Some((0, true)));
        assert_eq!(pick_match(&[false, false]), Some((0, false)));
        assert_eq!(pick_match(&[]), None);
    }

    #[test]
    fn test_classify_console() {
        assert_eq!(
            classify_console("map loaded: 50 regions"),
            (ProbeEventKind::ConsoleLog, "map loaded: 50 regions".to_string())
        );
        assert_eq!(
            classify_console("__lumi_pageerror__:TypeError: scene is null"),
            (ProbeEventKind::PageError, "TypeError: scene is null".to_string())
        );
    }

    #[test]
    fn test_interaction_error_detects_detached() {
        assert!(interaction_error("Element is not attached to the DOM").is_transient());
        assert!(!interaction_error("Element is outside of the viewport").is_transient());
    }

    #[test]
    fn test_config_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("LUMI_HEADLESS", "false"),
            ("LUMI_SOFTWARE_GL", "1"),
            ("LUMI_BROWSER", "firefox"),
            ("LUMI_CDP_ENDPOINT", "http://localhost:9222"),
        ]
        .into_iter()
        .collect();
        let config = WebProbeConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(!config.headless);
        assert!(config.software_gl);
        assert_eq!(config.browser_type, BrowserType::Firefox);
        assert_eq!(config.cdp_endpoint.as_deref(), Some("http://localhost:9222"));
    }

    #[test]
    fn test_launch_args_software_gl() {
        let config = WebProbeConfig {
            software_gl: true,
            args: vec!["--mute-audio".into(), "--no-sandbox".into()],
            ..Default::default()
        };
        let args = config.launch_args();
        for flag in SOFTWARE_GL_ARGS {
            assert!(args.iter().any(|a| a == flag));
        }
        assert!(!args.iter().any(|a| a == "--disable-gpu"));
        assert_eq!(args.iter().filter(|a| *a == "--no-sandbox").count(), 1);
        assert_eq!(args.last().map(String::as_str), Some("--mute-audio"));

        let plain = WebProbeConfig::default().launch_args();
        assert!(plain.iter().any(|a| a == "--disable-gpu"));
    }
}
