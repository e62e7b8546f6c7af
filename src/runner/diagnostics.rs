//! Diagnostics collector: console lines, page errors and engine errors of one run

use crate::driver::traits::{next_sequence, ProbeAdapter, ProbeEvent, ProbeEventKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// State tag for events that arrive before the first state is entered
pub const PRE_RUN: &str = "pre-run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    ConsoleLog,
    PageError,
    EngineError,
}

impl From<ProbeEventKind> for DiagnosticKind {
    fn from(kind: ProbeEventKind) -> Self {
        match kind {
            ProbeEventKind::ConsoleLog => DiagnosticKind::ConsoleLog,
            ProbeEventKind::PageError => DiagnosticKind::PageError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: DiagnosticKind,
    pub message: String,
    /// State active when the event arrived
    pub state: String,
}

impl DiagnosticsEvent {
    pub fn is_error(&self) -> bool {
        self.kind != DiagnosticKind::ConsoleLog
    }
}

#[derive(Debug, Default)]
struct Buffer {
    /// (sequence at entry, state name), ascending
    markers: Vec<(u64, String)>,
    events: Vec<DiagnosticsEvent>,
}

impl Buffer {
    fn state_at(&self, sequence: u64) -> String {
        self.markers
            .iter()
            .rev()
            .find(|(marker, _)| *marker < sequence)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| PRE_RUN.to_string())
    }

    fn push_probe_event(&mut self, event: ProbeEvent) {
        let state = self.state_at(event.sequence);
        self.events.push(DiagnosticsEvent {
            sequence: event.sequence,
            timestamp: event.timestamp,
            kind: event.kind.into(),
            message: event.message,
            state,
        });
    }
}

/// Append-only log fed by a background drain task.
///
/// The subscription is taken in `start`, before the first state, and the
/// drain task runs independently of step execution until `finish`.
pub struct DiagnosticsCollector {
    buffer: Arc<Mutex<Buffer>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DiagnosticsCollector {
    pub fn start(probe: &dyn ProbeAdapter) -> Self {
        let buffer = Arc::new(Mutex::new(Buffer::default()));
        let rx = probe.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(drain(rx, stop_rx, buffer.clone()));

        Self {
            buffer,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Mark the entry of a state; later events are attributed to it
    pub fn enter_state(&self, state: &str) {
        let marker = next_sequence();
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.markers.push((marker, state.to_string()));
        }
    }

    /// Record an engine error (failed attempt, capture failure, ...)
    pub fn record_error(&self, state: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[{}] {}", state, message);
        let event = DiagnosticsEvent {
            sequence: next_sequence(),
            timestamp: Utc::now(),
            kind: DiagnosticKind::EngineError,
            message,
            state: state.to_string(),
        };
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.events.push(event);
        }
    }

    /// Events collected so far, in sequence order
    pub fn snapshot(&self) -> Vec<DiagnosticsEvent> {
        let mut events = self
            .buffer
            .lock()
            .map(|b| b.events.clone())
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence);
        events
    }

    /// Stop the drain task after it has drained everything pending
    pub async fn finish(mut self) -> Vec<DiagnosticsEvent> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("diagnostics drain task failed: {}", e);
            }
        }
        self.snapshot()
    }
}

impl Drop for DiagnosticsCollector {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<ProbeEvent>,
    mut stop: oneshot::Receiver<()>,
    buffer: Arc<Mutex<Buffer>>,
) {
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => {
                    if let Ok(mut buffer) = buffer.lock() {
                        buffer.push_probe_event(event);
                    }
                }
                None => break,
            },
            _ = &mut stop => break,
        }
    }

    while let Ok(event) = rx.try_recv() {
        if let Ok(mut buffer) = buffer.lock() {
            buffer.push_probe_event(event);
        }
    }
}
