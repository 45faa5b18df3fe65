//! # Data Models
//!
//! Core record types for runs and subtasks plus derived progress reporting.
//! These are plain serializable records; state transitions are owned by the
//! state machines and persistence by the [`crate::store`] layer.

pub mod progress;
pub mod run;
pub mod subtask;

// Re-export core models for easy access
pub use progress::RunProgress;
pub use run::{RunConfig, RunId, RunRecord};
pub use subtask::{DepthHint, SubtaskDefinition, SubtaskId, SubtaskRecord, ToolKind};
