//! Orchestration error types shared across the coordinator, outcome
//! processor, and finalizer.

use thiserror::Error;

use crate::decomposer::DecompositionError;
use crate::error::ValidationError;
use crate::messaging::QueueError;
use crate::models::RunId;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

/// Errors raised while driving runs
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Run {run_id} not found")]
    RunNotFound { run_id: RunId },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Decomposition failed: {0}")]
    Decomposition(#[from] DecompositionError),

    /// No subtask was claimed, none were running, and no outcomes arrived
    /// for this many consecutive passes while unsettled subtasks remained.
    /// The remaining dependency graph cannot make progress.
    #[error(
        "Scheduling deadlock in run {run_id}: no progress after {passes} consecutive passes"
    )]
    SchedulingDeadlock { run_id: RunId, passes: u32 },

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlock_message_names_run_and_passes() {
        let run_id = RunId::new();
        let err = OrchestrationError::SchedulingDeadlock { run_id, passes: 3 };
        let message = err.to_string();
        assert!(message.contains("Scheduling deadlock"));
        assert!(message.contains(&run_id.to_string()));
        assert!(message.contains("3 consecutive passes"));
    }

    #[test]
    fn test_state_machine_errors_convert() {
        let inner = StateMachineError::InvalidTransition {
            from: "completed".to_string(),
            to: "executing".to_string(),
        };
        let err: OrchestrationError = inner.into();
        assert!(matches!(err, OrchestrationError::StateMachine(_)));
    }
}
