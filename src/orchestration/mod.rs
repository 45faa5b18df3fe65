//! # Orchestration Engine
//!
//! Coordination core for asynchronous runs: planning, dependency-aware
//! dispatch, outcome reconciliation, and finalization.
//!
//! ## Core Components
//!
//! - **Orchestrator**: Owns the drive loop that moves a run from `created`
//!   to a terminal state, one pass at a time
//! - **OutcomeProcessor**: Reconciles worker reports against subtask
//!   records, dropping late and duplicate reports
//! - **RunFinalizer**: Skips dead branches, honors cancellation, and settles
//!   runs once every subtask has a final state
//!
//! All writes flow through the state machines' fenced compare-and-set, so
//! any number of concurrent passes converge on the same result.

pub mod coordinator;
pub mod errors;
pub mod finalizer;
pub mod outcome_processor;
pub mod types;

pub use coordinator::Orchestrator;
pub use errors::{OrchestrationError, OrchestrationResult};
pub use finalizer::{FinalizationAction, FinalizationResult, RunFinalizer};
pub use outcome_processor::{AppliedOutcome, OutcomeProcessor};
pub use types::{PassReport, RunProgressReport, RunStatusSnapshot};
