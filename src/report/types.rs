use crate::runner::diagnostics::DiagnosticsEvent;
use crate::runner::error::ErrorRecord;
use crate::runner::state::{StateOutcome, StateStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall result of one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "camelCase")]
pub enum RunResult {
    Passed,
    /// First state that failed
    FailedAt(String),
    /// State interrupted by cancellation
    Aborted(String),
}

impl RunResult {
    pub fn is_passed(&self) -> bool {
        matches!(self, RunResult::Passed)
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunResult::Passed => write!(f, "Passed"),
            RunResult::FailedAt(state) => write!(f, "FailedAt({})", state),
            RunResult::Aborted(state) => write!(f, "Aborted({})", state),
        }
    }
}

/// Where a run stopped passing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePoint {
    pub state: String,
    pub step_index: Option<usize>,
    pub step: Option<String>,
    pub error: Option<ErrorRecord>,
    /// Last artifact captured before the report was built
    pub artifact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_states: usize,
    pub passed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub skipped: usize,
    pub total_steps: usize,
    pub failed_steps: usize,
    pub console_events: usize,
    pub error_events: usize,
}

/// Consumer-facing result of one run; built once at run end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub scenario: String,
    pub target_url: Option<String>,
    pub result: RunResult,
    /// Attempted states, in order
    pub states: Vec<StateOutcome>,
    /// States never entered because the run stopped first
    pub skipped_states: Vec<String>,
    pub artifacts: Vec<String>,
    pub diagnostics: Vec<DiagnosticsEvent>,
    pub failure: Option<FailurePoint>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.result.is_passed()
    }

    pub fn state(&self, name: &str) -> Option<&StateOutcome> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn summarize(
        states: &[StateOutcome],
        skipped: usize,
        diagnostics: &[DiagnosticsEvent],
    ) -> RunSummary {
        let count = |status: StateStatus| states.iter().filter(|s| s.status == status).count();
        let steps = states.iter().flat_map(|s| s.steps.iter());
        RunSummary {
            total_states: states.len() + skipped,
            passed: count(StateStatus::Passed),
            failed: count(StateStatus::Failed),
            aborted: count(StateStatus::Aborted),
            skipped,
            total_steps: steps.clone().count(),
            failed_steps: steps.filter(|s| !s.passed()).count(),
            console_events: diagnostics.iter().filter(|e| !e.is_error()).count(),
            error_events: diagnostics.iter().filter(|e| e.is_error()).count(),
        }
    }
}

/// Reports of every scenario in one CLI invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub session_id: String,
    pub runs: Vec<RunReport>,
    pub generated_at: String,
}

impl TestResults {
    pub fn new(session_id: &str, runs: Vec<RunReport>) -> Self {
        Self {
            session_id: session_id.to_string(),
            runs,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.runs.iter().all(|r| r.passed())
    }
}
