//! Static transition tables for the run and subtask state machines.
//!
//! Both machines validate transitions against these adjacency sets before
//! touching the store, so the legal graph lives in one place and tests can
//! enumerate it exhaustively.

use super::states::{RunState, SubtaskState};

/// Legal run transitions as (from, allowed targets) pairs.
pub const RUN_TRANSITIONS: &[(RunState, &[RunState])] = &[
    (RunState::Created, &[RunState::Queued, RunState::Cancelled]),
    (RunState::Queued, &[RunState::Planning, RunState::Cancelled]),
    (
        RunState::Planning,
        &[RunState::Executing, RunState::Failed, RunState::Cancelled],
    ),
    (
        RunState::Executing,
        &[RunState::Completed, RunState::Failed, RunState::Cancelled],
    ),
    (RunState::Completed, &[]),
    (RunState::Failed, &[]),
    (RunState::Cancelled, &[]),
];

/// Legal subtask transitions as (from, allowed targets) pairs.
///
/// `failed -> pending` is additionally guarded by the retry budget; the
/// table only describes shape, not budget.
pub const SUBTASK_TRANSITIONS: &[(SubtaskState, &[SubtaskState])] = &[
    (
        SubtaskState::Pending,
        &[
            SubtaskState::Ready,
            SubtaskState::Running,
            SubtaskState::Skipped,
        ],
    ),
    (
        SubtaskState::Ready,
        &[SubtaskState::Running, SubtaskState::Skipped],
    ),
    (
        SubtaskState::Running,
        &[SubtaskState::Succeeded, SubtaskState::Failed],
    ),
    (SubtaskState::Failed, &[SubtaskState::Pending]),
    (SubtaskState::Succeeded, &[]),
    (SubtaskState::Skipped, &[]),
];

/// Whether the run transition `from -> to` is legal.
pub fn run_transition_allowed(from: RunState, to: RunState) -> bool {
    RUN_TRANSITIONS
        .iter()
        .find(|(state, _)| *state == from)
        .map(|(_, targets)| targets.contains(&to))
        .unwrap_or(false)
}

/// Whether the subtask transition `from -> to` is legal.
pub fn subtask_transition_allowed(from: SubtaskState, to: SubtaskState) -> bool {
    SUBTASK_TRANSITIONS
        .iter()
        .find(|(state, _)| *state == from)
        .map(|(_, targets)| targets.contains(&to))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_happy_path_is_legal() {
        assert!(run_transition_allowed(RunState::Created, RunState::Queued));
        assert!(run_transition_allowed(RunState::Queued, RunState::Planning));
        assert!(run_transition_allowed(
            RunState::Planning,
            RunState::Executing
        ));
        assert!(run_transition_allowed(
            RunState::Executing,
            RunState::Completed
        ));
    }

    #[test]
    fn test_run_cannot_skip_phases() {
        assert!(!run_transition_allowed(
            RunState::Created,
            RunState::Planning
        ));
        assert!(!run_transition_allowed(
            RunState::Created,
            RunState::Completed
        ));
        assert!(!run_transition_allowed(
            RunState::Queued,
            RunState::Executing
        ));
        // Only planning and executing may fail
        assert!(!run_transition_allowed(RunState::Created, RunState::Failed));
        assert!(!run_transition_allowed(RunState::Queued, RunState::Failed));
    }

    #[test]
    fn test_every_active_run_state_can_cancel() {
        for state in [
            RunState::Created,
            RunState::Queued,
            RunState::Planning,
            RunState::Executing,
        ] {
            assert!(
                run_transition_allowed(state, RunState::Cancelled),
                "{state} should allow cancellation"
            );
        }
    }

    #[test]
    fn test_terminal_run_states_allow_nothing() {
        for terminal in [RunState::Completed, RunState::Failed, RunState::Cancelled] {
            for target in [
                RunState::Created,
                RunState::Queued,
                RunState::Planning,
                RunState::Executing,
                RunState::Completed,
                RunState::Failed,
                RunState::Cancelled,
            ] {
                assert!(!run_transition_allowed(terminal, target));
            }
        }
    }

    #[test]
    fn test_subtask_retry_loop_shape() {
        assert!(subtask_transition_allowed(
            SubtaskState::Running,
            SubtaskState::Failed
        ));
        assert!(subtask_transition_allowed(
            SubtaskState::Failed,
            SubtaskState::Pending
        ));
        assert!(subtask_transition_allowed(
            SubtaskState::Pending,
            SubtaskState::Running
        ));
        // Failed cannot jump straight back to running
        assert!(!subtask_transition_allowed(
            SubtaskState::Failed,
            SubtaskState::Running
        ));
    }

    #[test]
    fn test_succeeded_and_skipped_are_dead_ends() {
        for terminal in [SubtaskState::Succeeded, SubtaskState::Skipped] {
            for target in [
                SubtaskState::Pending,
                SubtaskState::Ready,
                SubtaskState::Running,
                SubtaskState::Succeeded,
                SubtaskState::Failed,
                SubtaskState::Skipped,
            ] {
                assert!(!subtask_transition_allowed(terminal, target));
            }
        }
    }

    #[test]
    fn test_running_cannot_be_skipped() {
        // In-flight work always drains to an outcome, even under cancellation
        assert!(!subtask_transition_allowed(
            SubtaskState::Running,
            SubtaskState::Skipped
        ));
    }
}
