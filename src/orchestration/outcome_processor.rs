//! # Outcome Processor
//!
//! Reconciles worker reports against subtask records. Every report is
//! checked against the record's current state and attempt counter before
//! anything is written, so late, duplicate, and superseded reports are
//! dropped instead of corrupting settled work.
//!
//! ## Overview
//!
//! Workers push [`SubtaskOutcome`] messages into the store's outcome inbox;
//! the orchestrator drains that inbox and feeds each message through
//! [`OutcomeProcessor::apply`]. Synthetic timeout outcomes travel the same
//! path as real worker reports, which keeps the reconciliation rules in one
//! place.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::errors::OrchestrationResult;
use crate::messaging::{OutcomeDisposition, SubtaskOutcome};
use crate::state_machine::{
    StateMachineError, SubtaskEvent, SubtaskState, SubtaskStateMachine,
};
use crate::store::RunStore;

/// What applying a worker report did to the subtask record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedOutcome {
    /// The subtask settled successfully
    Succeeded,
    /// The attempt failed and the subtask went back to pending
    RetryScheduled {
        /// Attempts consumed so far, including the one that just failed
        attempts_used: u32,
    },
    /// The attempt failed with no retry budget left
    FailedTerminal,
    /// The report did not change anything
    Ignored { reason: String },
}

impl AppliedOutcome {
    /// Whether the report moved a subtask record forward.
    pub fn advanced(&self) -> bool {
        !matches!(self, Self::Ignored { .. })
    }
}

/// Applies worker outcome reports to subtask records
pub struct OutcomeProcessor {
    store: Arc<dyn RunStore>,
    subtask_machine: SubtaskStateMachine,
}

impl OutcomeProcessor {
    pub fn new(store: Arc<dyn RunStore>, subtask_machine: SubtaskStateMachine) -> Self {
        Self {
            store,
            subtask_machine,
        }
    }

    /// Apply one worker report. Returns what happened; only store and
    /// machine failures surface as errors.
    pub async fn apply(&self, outcome: &SubtaskOutcome) -> OrchestrationResult<AppliedOutcome> {
        let Some(record) = self.store.fetch_subtask(outcome.subtask_id).await? else {
            warn!(
                subtask_id = %outcome.subtask_id,
                worker_id = %outcome.worker_id,
                "Outcome references an unknown subtask"
            );
            return Ok(AppliedOutcome::Ignored {
                reason: "unknown subtask".to_string(),
            });
        };

        if record.state != SubtaskState::Running {
            debug!(
                subtask_id = %outcome.subtask_id,
                state = %record.state,
                "Dropping late or duplicate outcome report"
            );
            return Ok(AppliedOutcome::Ignored {
                reason: format!("subtask is {}; late or duplicate report", record.state),
            });
        }

        if outcome.attempt != record.attempts {
            debug!(
                subtask_id = %outcome.subtask_id,
                reported_attempt = outcome.attempt,
                current_attempt = record.attempts,
                "Dropping outcome for a superseded attempt"
            );
            return Ok(AppliedOutcome::Ignored {
                reason: format!(
                    "attempt {} superseded by attempt {}",
                    outcome.attempt, record.attempts
                ),
            });
        }

        match &outcome.disposition {
            OutcomeDisposition::Success { result } => {
                self.apply_success(outcome, result.clone()).await
            }
            OutcomeDisposition::Failure { error } => self.apply_failure(outcome, error).await,
        }
    }

    async fn apply_success(
        &self,
        outcome: &SubtaskOutcome,
        result: serde_json::Value,
    ) -> OrchestrationResult<AppliedOutcome> {
        match self
            .subtask_machine
            .transition_reported(
                outcome.subtask_id,
                SubtaskEvent::Succeed(result),
                &outcome.worker_id,
            )
            .await
        {
            Ok(_) => {
                info!(
                    subtask_id = %outcome.subtask_id,
                    worker_id = %outcome.worker_id,
                    execution_time_ms = outcome.execution_time_ms,
                    "✅ Subtask succeeded"
                );
                Ok(AppliedOutcome::Succeeded)
            }
            Err(e) if e.is_lost_race() => Ok(AppliedOutcome::Ignored {
                reason: "lost a settlement race".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_failure(
        &self,
        outcome: &SubtaskOutcome,
        error: &str,
    ) -> OrchestrationResult<AppliedOutcome> {
        let updated = match self
            .subtask_machine
            .transition_reported(
                outcome.subtask_id,
                SubtaskEvent::fail_with_error(error),
                &outcome.worker_id,
            )
            .await
        {
            Ok(record) => record,
            Err(e) if e.is_lost_race() => {
                return Ok(AppliedOutcome::Ignored {
                    reason: "lost a settlement race".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !updated.can_retry() {
            warn!(
                subtask_id = %outcome.subtask_id,
                attempts = updated.attempts,
                max_retries = updated.max_retries,
                error = %error,
                "❌ Subtask failed terminally"
            );
            return Ok(AppliedOutcome::FailedTerminal);
        }

        match self
            .subtask_machine
            .transition(outcome.subtask_id, SubtaskEvent::Retry)
            .await
        {
            Ok(_) => {
                info!(
                    subtask_id = %outcome.subtask_id,
                    attempts_used = updated.attempts,
                    max_retries = updated.max_retries,
                    error = %error,
                    "🔄 Subtask failed; retry scheduled"
                );
                Ok(AppliedOutcome::RetryScheduled {
                    attempts_used: updated.attempts,
                })
            }
            Err(StateMachineError::RetryBudgetExhausted { .. }) => {
                Ok(AppliedOutcome::FailedTerminal)
            }
            Err(e) if e.is_lost_race() => Ok(AppliedOutcome::Ignored {
                reason: "lost a retry race".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
