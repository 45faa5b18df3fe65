//! # System Constants
//!
//! Event names, status groupings, and operational limits shared across the
//! conductor orchestration core.

pub use crate::state_machine::{RunState, SubtaskState};

/// Lifecycle events published on the run event stream.
pub mod events {
    // Run lifecycle events
    pub const RUN_CREATED: &str = "run.created";
    pub const RUN_QUEUED: &str = "run.queued";
    pub const RUN_PLANNING: &str = "run.planning";
    pub const RUN_EXECUTING: &str = "run.executing";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_FAILED: &str = "run.failed";
    pub const RUN_CANCELLED: &str = "run.cancelled";
    pub const RUN_CANCEL_REQUESTED: &str = "run.cancel_requested";
    pub const RUN_PROGRESS: &str = "run.progress";

    // Subtask lifecycle events
    pub const SUBTASK_READY: &str = "subtask.ready";
    pub const SUBTASK_CLAIMED: &str = "subtask.claimed";
    pub const SUBTASK_SUCCEEDED: &str = "subtask.succeeded";
    pub const SUBTASK_FAILED: &str = "subtask.failed";
    pub const SUBTASK_RETRYING: &str = "subtask.retrying";
    pub const SUBTASK_SKIPPED: &str = "subtask.skipped";
}

/// System-wide constants
pub mod system {
    /// Version compatibility marker
    pub const CONDUCTOR_CORE_VERSION: &str = "0.1.0";

    /// Hard ceiling on subtasks per run regardless of run configuration
    pub const MAX_SUBTASKS_HARD_CAP: usize = 128;

    /// Logical queue name for subtask dispatch
    pub const SUBTASK_QUEUE_NAME: &str = "conductor_subtasks";

    /// Worker identifier used for orchestrator-synthesized outcomes
    pub const TIMEOUT_SWEEP_WORKER_ID: &str = "orchestrator.timeout_sweep";
}

/// Status groupings for scheduling and completion logic
pub mod status_groups {
    use super::{RunState, SubtaskState};

    /// Subtask states the scheduler may select from
    pub const SCHEDULABLE_SUBTASK_STATES: &[SubtaskState] =
        &[SubtaskState::Pending, SubtaskState::Ready];

    /// Subtask states that satisfy a downstream dependency
    pub const DEPENDENCY_SATISFYING_STATES: &[SubtaskState] = &[SubtaskState::Succeeded];

    /// Run states in which scheduling passes are meaningful
    pub const RUN_SCHEDULABLE_STATES: &[RunState] = &[RunState::Executing];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedulable_states_exclude_running() {
        assert!(!status_groups::SCHEDULABLE_SUBTASK_STATES.contains(&SubtaskState::Running));
        assert!(status_groups::SCHEDULABLE_SUBTASK_STATES.contains(&SubtaskState::Pending));
    }

    #[test]
    fn test_only_success_satisfies_dependencies() {
        assert_eq!(
            status_groups::DEPENDENCY_SATISFYING_STATES,
            &[SubtaskState::Succeeded]
        );
    }
}
