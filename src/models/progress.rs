//! Derived progress reporting for a run's subtask set.

use serde::{Deserialize, Serialize};

use crate::models::SubtaskRecord;
use crate::state_machine::SubtaskState;

/// Point-in-time progress summary, recomputed from the subtask records on
/// demand rather than maintained incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RunProgress {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Percentage of subtasks that are settled (terminal or out of retries)
    pub percent_complete: f64,
}

impl RunProgress {
    pub fn from_subtasks(subtasks: &[SubtaskRecord]) -> Self {
        let mut progress = Self {
            total: subtasks.len(),
            ..Self::default()
        };

        let mut settled = 0usize;
        for subtask in subtasks {
            match subtask.state {
                SubtaskState::Pending => progress.pending += 1,
                SubtaskState::Ready => progress.ready += 1,
                SubtaskState::Running => progress.running += 1,
                SubtaskState::Succeeded => progress.succeeded += 1,
                SubtaskState::Failed => progress.failed += 1,
                SubtaskState::Skipped => progress.skipped += 1,
            }
            if subtask.is_settled() {
                settled += 1;
            }
        }

        if progress.total > 0 {
            progress.percent_complete = (settled as f64 / progress.total as f64) * 100.0;
        }
        progress
    }

    /// True when every subtask is settled.
    pub fn is_fully_settled(&self) -> bool {
        self.total > 0 && (self.percent_complete - 100.0).abs() < f64::EPSILON
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.skipped > 0
    }
}
