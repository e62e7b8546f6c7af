use super::error::ErrorRecord;
use serde::{Deserialize, Serialize};

/// Terminal status of one step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// Result of executing one step, recorded once the step finishes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub state: String,
    pub index: usize,
    pub description: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Non-fatal problems, e.g. a screenshot that could not be written
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

/// Terminal status of one state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateStatus {
    Passed,
    Failed,
    /// Interrupted by cancellation
    Aborted,
}

impl StateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateStatus::Passed => "passed",
            StateStatus::Failed => "failed",
            StateStatus::Aborted => "aborted",
        }
    }
}

/// Result of one attempted state, built from its step outcomes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateOutcome {
    pub name: String,
    pub status: StateStatus,
    pub steps: Vec<StepOutcome>,
    /// Index of the step that failed the state, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Offset of state entry from run start
    pub entered_at_ms: u64,
    pub duration_ms: u64,
}

impl StateOutcome {
    pub fn passed(&self) -> bool {
        self.status == StateStatus::Passed
    }

    pub fn failed_step(&self) -> Option<&StepOutcome> {
        self.failed_step
            .and_then(|index| self.steps.iter().find(|s| s.index == index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::error::ProbeError;

    fn step(index: usize, status: StepStatus) -> StepOutcome {
        StepOutcome {
            state: "Map".into(),
            index,
            description: format!("step {}", index),
            status,
            attempts: 1,
            error: None,
            warnings: vec![],
            duration_ms: 10,
        }
    }

    #[test]
    fn test_failed_step_lookup() {
        let mut failing = step(1, StepStatus::Failed);
        failing.error = Some(ProbeError::interaction("no element matches text~\"Georgia\"").to_record());

        let outcome = StateOutcome {
            name: "Map".into(),
            status: StateStatus::Failed,
            steps: vec![step(0, StepStatus::Passed), failing],
            failed_step: Some(1),
            error: None,
            artifacts: vec![],
            entered_at_ms: 0,
            duration_ms: 20,
        };
        assert!(!outcome.passed());
        assert_eq!(outcome.failed_step().unwrap().description, "step 1");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_value(StateStatus::Aborted).unwrap(), "aborted");
        let json = serde_json::to_value(step(0, StepStatus::Passed)).unwrap();
        assert_eq!(json["status"], "passed");
        assert!(json.get("error").is_none());
        assert!(json.get("warnings").is_none());
    }
}
