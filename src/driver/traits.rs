use crate::parser::types::Locator;
use crate::runner::error::ProbeResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A live element the probe resolved a locator to.
///
/// Handles are snapshots: interactions re-resolve `selector` and fail with a
/// detached `InteractionError` when the element no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    /// Adapter-native selector the element was resolved from
    pub selector: String,
    /// Position of the element among the selector's matches
    pub nth: usize,
    /// Human readable description for logs and errors
    pub description: String,
    /// Visibility at resolution time
    pub visible: bool,
}

/// Kind of event pushed by the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeEventKind {
    ConsoleLog,
    PageError,
}

/// Console line or page error observed on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ProbeEventKind,
    pub message: String,
}

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Next value of the process-wide event sequence.
///
/// The state machine takes a marker from the same counter on every state
/// entry so events can be attributed to the state active when they arrived.
pub fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

/// Fan-out of probe events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProbeEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProbeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Stamp and deliver an event; closed subscribers are pruned
    pub fn publish(&self, kind: ProbeEventKind, message: impl Into<String>) -> ProbeEvent {
        let event = ProbeEvent {
            sequence: next_sequence(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
        };
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
        event
    }
}

/// Capability surface the engine consumes to observe and act on one page.
///
/// Implementations operate on exactly one live page owned by the caller and
/// never create or destroy browser sessions. Observation calls (`resolve`,
/// `count`) never fail: absence is a valid answer.
#[async_trait]
pub trait ProbeAdapter: Send + Sync {
    /// Adapter name for logs (e.g. "chromium", "mock")
    fn name(&self) -> &str;

    /// Load a URL in the page
    async fn navigate(&self, url: &str) -> ProbeResult<()>;

    /// Resolve a locator to zero-or-one element, preferring a visible match
    async fn resolve(&self, locator: &Locator) -> Option<ElementHandle>;

    /// Count elements matching a locator
    async fn count(&self, locator: &Locator) -> usize;

    /// Visible text of the whole page
    async fn page_text(&self) -> ProbeResult<String>;

    async fn click(&self, handle: &ElementHandle) -> ProbeResult<()>;

    async fn hover(&self, handle: &ElementHandle) -> ProbeResult<()>;

    /// Press a key, holding it for `hold_ms` before release (0 = tap)
    async fn key_event(&self, key: &str, hold_ms: u64) -> ProbeResult<()>;

    /// Release a key left down by an interrupted `key_event`
    async fn key_up(&self, key: &str) -> ProbeResult<()>;

    /// Evaluate a script expression and return its JSON value
    async fn evaluate(&self, script: &str) -> ProbeResult<serde_json::Value>;

    /// Capture the page to a PNG file
    async fn screenshot(&self, path: &Path) -> ProbeResult<()>;

    /// Subscribe to console and page-error events (push model)
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProbeEvent>;
}
