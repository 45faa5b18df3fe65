//! Top-level error types shared across the orchestration core.
//!
//! Component-specific errors live next to their components (state machine,
//! decomposer, scheduler, store, queue); this module provides the crate-wide
//! umbrella plus the validation errors raised at API boundaries.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::decomposer::DecompositionError;
use crate::events::PublishError;
use crate::llm::LlmError;
use crate::messaging::QueueError;
use crate::orchestration::OrchestrationError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

/// Input validation failures surfaced before any state is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("subtask count {count} is outside the allowed range 1..={max}")]
    SubtaskCount { count: usize, max: usize },

    #[error("subtask {subtask} dependency index {index} is out of range for {count} subtasks")]
    DependencyIndex {
        subtask: usize,
        index: usize,
        count: usize,
    },

    #[error("subtask {index} depends on itself")]
    SelfDependency { index: usize },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("prompt must not be empty")]
    EmptyPrompt,
}

/// Crate-wide error umbrella. Each component keeps its own error enum; this
/// type exists for callers that drive the whole engine through one surface.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Decomposition error: {0}")]
    Decomposition(#[from] DecompositionError),

    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Event error: {0}")]
    Event(#[from] PublishError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),
}

pub type Result<T> = std::result::Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::SubtaskCount { count: 0, max: 16 };
        assert_eq!(
            err.to_string(),
            "subtask count 0 is outside the allowed range 1..=16"
        );

        let err = ValidationError::SelfDependency { index: 3 };
        assert_eq!(err.to_string(), "subtask 3 depends on itself");
    }

    #[test]
    fn test_umbrella_wraps_validation() {
        let err: ConductorError = ValidationError::EmptyPrompt.into();
        assert!(err.to_string().starts_with("Validation error:"));
    }
}
