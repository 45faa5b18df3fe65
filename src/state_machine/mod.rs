// State machine module for run orchestration
//
// Both machines validate against static transition tables, write through the
// store's fenced compare-and-set, and publish lifecycle events after a write
// is accepted. They are the only components that mutate run or subtask state.

pub mod errors;
pub mod events;
pub mod run_state_machine;
pub mod states;
pub mod subtask_state_machine;
pub mod transitions;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::{RunEvent, SubtaskEvent};
pub use run_state_machine::RunStateMachine;
pub use states::{RunState, SubtaskState};
pub use subtask_state_machine::SubtaskStateMachine;
pub use transitions::{
    run_transition_allowed, subtask_transition_allowed, RUN_TRANSITIONS, SUBTASK_TRANSITIONS,
};
