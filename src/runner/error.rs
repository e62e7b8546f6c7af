//! Error taxonomy for probe calls and step execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timed out after {elapsed_ms}ms waiting for {predicate}")]
    WaitTimeout { predicate: String, elapsed_ms: u64 },

    #[error("Interaction failed: {message}")]
    Interaction { message: String, detached: bool },

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("State '{state}' exceeded its {budget_ms}ms entry budget")]
    DeadlineExceeded { state: String, budget_ms: u64 },

    #[error("Run cancelled")]
    Cancelled,
}

pub type ProbeResult<T> = Result<T, ProbeError>;

impl ProbeError {
    pub fn interaction(message: impl Into<String>) -> Self {
        ProbeError::Interaction {
            message: message.into(),
            detached: false,
        }
    }

    pub fn detached(message: impl Into<String>) -> Self {
        ProbeError::Interaction {
            message: message.into(),
            detached: true,
        }
    }

    /// Transient errors are the only ones a step retry policy applies to
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProbeError::WaitTimeout { .. } | ProbeError::Interaction { detached: true, .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Navigation(_) => ErrorKind::Navigation,
            ProbeError::WaitTimeout { .. } => ErrorKind::WaitTimeout,
            ProbeError::Interaction { .. } => ErrorKind::Interaction,
            ProbeError::Evaluation(_) => ErrorKind::Evaluation,
            ProbeError::Capture(_) => ErrorKind::Capture,
            ProbeError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            ProbeError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Navigation,
    WaitTimeout,
    Interaction,
    Evaluation,
    Capture,
    DeadlineExceeded,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Navigation => "NavigationError",
            ErrorKind::WaitTimeout => "WaitTimeoutError",
            ErrorKind::Interaction => "InteractionError",
            ErrorKind::Evaluation => "EvaluationError",
            ErrorKind::Capture => "CaptureError",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

/// Serializable form of a ProbeError, as stored in outcomes and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}
