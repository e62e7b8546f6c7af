//! Readiness predicates and the poll loop that waits on them

use super::cancel::CancelToken;
use super::error::{ProbeError, ProbeResult};
use crate::driver::traits::ProbeAdapter;
use crate::parser::types::Predicate;
use std::time::Duration;
use tokio::time::Instant;

/// Default poll cadence for every wait
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Default timeout for a waitFor step that does not set one
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Timeout and cadence for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl WaitOptions {
    pub fn new(timeout_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            // a zero interval would spin
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
        }
    }
}

/// JavaScript truthiness of an evaluated value
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

/// Observe the page once. Probe failures count as "not yet".
pub async fn check(probe: &dyn ProbeAdapter, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::ElementVisible(locator) => probe
            .resolve(locator)
            .await
            .map_or(false, |handle| handle.visible),
        Predicate::ElementAbsentOrHidden(locator) => probe
            .resolve(locator)
            .await
            .map_or(true, |handle| !handle.visible),
        Predicate::TextPresent(text) => match probe.page_text().await {
            Ok(page) => page.contains(text.as_str()),
            Err(e) => {
                log::debug!("page text unavailable: {}", e);
                false
            }
        },
        Predicate::CountAtLeast { locator, n } => probe.count(locator).await >= *n,
        Predicate::CustomScriptTruthy(script) => match probe.evaluate(script).await {
            Ok(value) => is_truthy(&value),
            Err(e) => {
                log::debug!("predicate script failed: {}", e);
                false
            }
        },
    }
}

/// Poll `predicate` until it holds, the timeout elapses, or the run is cancelled.
///
/// Checks run at t=0, then every poll interval, with a final check at the
/// deadline. Each call starts a fresh loop; nothing is cached between calls.
pub async fn wait_until(
    probe: &dyn ProbeAdapter,
    predicate: &Predicate,
    options: WaitOptions,
    cancel: &CancelToken,
) -> ProbeResult<()> {
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut checks = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        checks += 1;
        if check(probe, predicate).await {
            log::debug!(
                "{} satisfied after {} checks ({}ms)",
                predicate,
                checks,
                started.elapsed().as_millis()
            );
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ProbeError::WaitTimeout {
                predicate: predicate.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let next = (now + options.poll_interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            _ = tokio::time::sleep_until(next) => {}
        }
    }
}
