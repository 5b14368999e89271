//! Saga lifecycle status.

use serde::{Deserialize, Serialize};

/// The status of a saga instance.
///
/// State transitions:
/// ```text
/// Running ──┬──► Completed
///           └──► Faulted ──► Running (re-trigger or operator resume)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    /// Waiting for the next triggering event.
    #[default]
    Running,

    /// All steps finished (terminal state).
    Completed,

    /// A step failed. Waits for a re-trigger or an operator resume.
    Faulted,
}

impl SagaStatus {
    /// Returns true if the saga reacts to events in this status.
    pub fn accepts_events(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed)
    }

    /// Returns the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "running",
            SagaStatus::Completed => "completed",
            SagaStatus::Faulted => "faulted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(SagaStatus::Running),
            "completed" => Some(SagaStatus::Completed),
            "faulted" => Some(SagaStatus::Faulted),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
