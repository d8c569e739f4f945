//! Job statuses and the outcome an instruction hands back to the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of one node's job within one execution.
///
/// Persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Resolved,
    Failed,
    Error,
    Aborted,
    Canceled,
    Rejected,
}

impl JobStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Resolved => 1,
            Self::Failed => -1,
            Self::Error => -2,
            Self::Aborted => -3,
            Self::Canceled => -4,
            Self::Rejected => -5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Pending,
            1 => Self::Resolved,
            -1 => Self::Failed,
            -2 => Self::Error,
            -3 => Self::Aborted,
            -4 => Self::Canceled,
            -5 => Self::Rejected,
            _ => return None,
        })
    }

    /// Anything but `Pending`. A job is immutable once terminal.
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Resolved => "RESOLVED",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// What an instruction produced for its node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub result: Value,
}

impl JobOutcome {
    pub fn resolved(result: Value) -> Self {
        Self { status: JobStatus::Resolved, result }
    }

    /// Error-status job whose result is the error's text.
    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            status: JobStatus::Error,
            result: Value::String(message.to_string()),
        }
    }
}
