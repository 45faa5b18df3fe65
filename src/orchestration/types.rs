//! # Orchestration Types
//!
//! Core types and data structures shared across the orchestration
//! components: pass reports, progress reports, and status snapshots.

use serde::{Deserialize, Serialize};

use crate::fencing::FencingToken;
use crate::models::{RunId, RunProgress, RunRecord, SubtaskRecord};
use crate::state_machine::RunState;

/// Summary of one scheduling pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub run_id: RunId,
    /// Token issued when the pass snapshot was taken
    pub pass_token: FencingToken,
    /// Subtasks claimed and dispatched to the queue
    pub dispatched: usize,
    /// Subtasks promoted from `pending` to `ready`
    pub promoted: usize,
    /// Proposed claims dropped because another actor moved the subtask first
    pub lost_races: usize,
}

impl PassReport {
    pub fn idle(run_id: RunId, pass_token: FencingToken) -> Self {
        Self {
            run_id,
            pass_token,
            dispatched: 0,
            promoted: 0,
            lost_races: 0,
        }
    }

    /// Whether the pass changed anything
    pub fn made_progress(&self) -> bool {
        self.dispatched > 0 || self.promoted > 0
    }
}

/// Current state plus a point-in-time progress snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProgressReport {
    pub run_id: RunId,
    pub state: RunState,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub progress: RunProgress,
}

impl RunProgressReport {
    pub fn new(run: &RunRecord, progress: RunProgress) -> Self {
        Self {
            run_id: run.id,
            state: run.state,
            cancel_requested: run.cancel_requested,
            error: run.error.clone(),
            progress,
        }
    }
}

/// Full snapshot of a run and its subtasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusSnapshot {
    pub run: RunRecord,
    pub progress: RunProgress,
    pub subtasks: Vec<SubtaskRecord>,
}
