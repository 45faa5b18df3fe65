//! # Subtask Scheduler
//!
//! Dependency-aware selection of the next subtasks to dispatch for a run.
//!
//! ## Architecture: Pure Decision, Fenced Application
//!
//! The scheduler never writes state. Each scheduling pass hands it a
//! snapshot of the run and its subtasks plus a pass token, and it returns a
//! `SchedulingDecision` describing which subtasks to claim now and which to
//! promote to `ready`. The coordinator applies the decision through the
//! state machine's compare-and-set writes; a claim that loses the race to a
//! concurrent pass is dropped from the batch, never retried within it.
//!
//! ## Selection Rules
//!
//! A subtask is a candidate when it is `pending` or `ready` and every
//! dependency has succeeded. Candidates are ordered by priority (higher
//! first), then by how many unsettled subtasks are waiting on them (more
//! first, so completing one unblocks the most downstream work), then by
//! creation index. Claims are capped by the run's remaining concurrency
//! budget; candidates past the cap are only promoted.

use std::collections::HashSet;

use tracing::debug;

use crate::constants::status_groups::{
    DEPENDENCY_SATISFYING_STATES, RUN_SCHEDULABLE_STATES, SCHEDULABLE_SUBTASK_STATES,
};
use crate::fencing::FencingToken;
use crate::models::{RunId, RunRecord, SubtaskId, SubtaskRecord};
use crate::state_machine::SubtaskState;

/// One subtask proposed by a scheduling pass, with the state and token
/// observed in the snapshot the decision was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSubtask {
    pub subtask_id: SubtaskId,
    pub index: usize,
    pub priority: i32,
    pub observed_state: SubtaskState,
    pub observed_token: FencingToken,
}

/// Ephemeral output of one scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingDecision {
    pub run_id: RunId,
    /// Token issued for this pass, stamped on logs to correlate the
    /// decision with the writes that apply it
    pub pass_token: FencingToken,
    /// Subtasks to claim now, in dispatch order
    pub selections: Vec<ScheduledSubtask>,
    /// Dependency-satisfied subtasks past the concurrency budget; promoted
    /// from `pending` to `ready` for visibility
    pub promotions: Vec<ScheduledSubtask>,
    /// Subtasks observed `running` in the snapshot
    pub running: usize,
    /// Remaining concurrency budget at snapshot time
    pub capacity: usize,
}

impl SchedulingDecision {
    fn idle(run_id: RunId, pass_token: FencingToken, running: usize, capacity: usize) -> Self {
        Self {
            run_id,
            pass_token,
            selections: Vec::new(),
            promotions: Vec::new(),
            running,
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty() && self.promotions.is_empty()
    }
}

/// Stateless scheduling engine. Safe to call repeatedly and concurrently
/// against the same run; conflicting decisions are resolved by the fenced
/// writes that apply them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubtaskScheduler;

impl SubtaskScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Compute the next batch of dispatchable subtasks from a snapshot.
    pub fn next_eligible(
        &self,
        run: &RunRecord,
        subtasks: &[SubtaskRecord],
        pass_token: FencingToken,
    ) -> SchedulingDecision {
        let running = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Running)
            .count();
        let capacity = run.config.concurrency_limit.saturating_sub(running);

        if !RUN_SCHEDULABLE_STATES.contains(&run.state) || run.cancel_requested {
            return SchedulingDecision::idle(run.id, pass_token, running, capacity);
        }

        let satisfied: HashSet<SubtaskId> = subtasks
            .iter()
            .filter(|s| DEPENDENCY_SATISFYING_STATES.contains(&s.state))
            .map(|s| s.id)
            .collect();

        let mut candidates: Vec<&SubtaskRecord> = subtasks
            .iter()
            .filter(|s| {
                SCHEDULABLE_SUBTASK_STATES.contains(&s.state)
                    && s.depends_on.iter().all(|dep| satisfied.contains(dep))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| {
                    unsettled_dependents(b.id, subtasks)
                        .cmp(&unsettled_dependents(a.id, subtasks))
                })
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut selections = Vec::new();
        let mut promotions = Vec::new();
        for candidate in candidates {
            let scheduled = ScheduledSubtask {
                subtask_id: candidate.id,
                index: candidate.index,
                priority: candidate.priority,
                observed_state: candidate.state,
                observed_token: candidate.fencing_token,
            };
            if selections.len() < capacity {
                selections.push(scheduled);
            } else if candidate.state == SubtaskState::Pending {
                promotions.push(scheduled);
            }
        }

        debug!(
            run_id = %run.id,
            selected = selections.len(),
            promoted = promotions.len(),
            running = running,
            capacity = capacity,
            "Scheduling pass computed"
        );

        SchedulingDecision {
            run_id: run.id,
            pass_token,
            selections,
            promotions,
            running,
            capacity,
        }
    }
}

/// Count subtasks that still need `id` to succeed before they can settle.
fn unsettled_dependents(id: SubtaskId, subtasks: &[SubtaskRecord]) -> usize {
    subtasks
        .iter()
        .filter(|s| !s.is_settled() && s.depends_on.contains(&id))
        .count()
}
