//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► InProgress ──► Completed
///    │            │
///    └────────────┴──► Failed ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Saga exists but no step has been reported yet.
    #[default]
    Created,

    /// At least one step executed and more remain.
    InProgress,

    /// Every step executed (terminal state).
    Completed,

    /// A step failed; forward progress is over.
    Failed,

    /// The caller finished running compensations (terminal state).
    Compensated,
}

impl SagaStatus {
    /// Returns true if a step may still be executed or failed.
    pub fn can_advance(&self) -> bool {
        matches!(self, SagaStatus::Created | SagaStatus::InProgress)
    }

    /// Returns true if a compensation plan may be requested.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Failed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Created => "CREATED",
            SagaStatus::InProgress => "IN_PROGRESS",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Not run yet.
    #[default]
    Pending,
    /// Ran successfully; its result is in the result tree.
    Executed,
    /// The remote action failed or timed out.
    Failed,
    /// Its compensation was attempted.
    Compensated,
}

impl StepStatus {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Executed => "EXECUTED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
