use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::states::{RunState, SubtaskState};

/// Events that can trigger run state transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    /// Accept the run for processing
    Enqueue,
    /// Begin decomposition
    StartPlanning,
    /// Decomposition produced a subtask graph; begin executing it
    ActivateExecution,
    /// Every subtask succeeded
    Complete,
    /// Fail the run with an error description
    Fail(String),
    /// Honor a cancellation request
    Cancel,
}

impl RunEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::StartPlanning => "start_planning",
            Self::ActivateExecution => "activate_execution",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }

    /// State this event drives the run into
    pub fn target_state(&self) -> RunState {
        match self {
            Self::Enqueue => RunState::Queued,
            Self::StartPlanning => RunState::Planning,
            Self::ActivateExecution => RunState::Executing,
            Self::Complete => RunState::Completed,
            Self::Fail(_) => RunState::Failed,
            Self::Cancel => RunState::Cancelled,
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        self.target_state().is_terminal()
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

/// Events that can trigger subtask state transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SubtaskEvent {
    /// Dependencies satisfied; surface the subtask as waiting for capacity
    MarkReady,
    /// Claim the subtask for dispatch, consuming one execution attempt
    Claim,
    /// Worker reported success with a result payload
    Succeed(Value),
    /// Worker reported failure with an error message
    Fail(String),
    /// Return a failed subtask to the pool for another attempt
    Retry,
    /// Remove the subtask from consideration with a reason
    Skip(String),
}

impl SubtaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MarkReady => "mark_ready",
            Self::Claim => "claim",
            Self::Succeed(_) => "succeed",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::Skip(_) => "skip",
        }
    }

    /// State this event drives the subtask into
    pub fn target_state(&self) -> SubtaskState {
        match self {
            Self::MarkReady => SubtaskState::Ready,
            Self::Claim => SubtaskState::Running,
            Self::Succeed(_) => SubtaskState::Succeeded,
            Self::Fail(_) => SubtaskState::Failed,
            Self::Retry => SubtaskState::Pending,
            Self::Skip(_) => SubtaskState::Skipped,
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Extract the skip reason if this is a skip event
    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Self::Skip(reason) => Some(reason),
            _ => None,
        }
    }

    /// Extract results if this is a success event
    pub fn results(&self) -> Option<&Value> {
        match self {
            Self::Succeed(results) => Some(results),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        self.target_state().is_terminal()
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
