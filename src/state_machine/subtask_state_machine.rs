//! # Subtask State Machine
//!
//! Fenced transition writer for subtask records. Claims consume an
//! execution attempt, failure outcomes record the worker's error, and the
//! `failed -> pending` retry edge is guarded by the record's retry budget.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::SubtaskEvent;
use super::states::SubtaskState;
use super::transitions::subtask_transition_allowed;
use crate::constants::events;
use crate::events::{EventPublisher, RunLifecycleEvent};
use crate::fencing::FencingTokenStore;
use crate::models::{SubtaskId, SubtaskRecord};
use crate::store::{CasOutcome, RunStore, SubtaskWrite};

/// Fenced transition writer for subtask records
#[derive(Clone)]
pub struct SubtaskStateMachine {
    store: Arc<dyn RunStore>,
    tokens: Arc<FencingTokenStore>,
    event_publisher: EventPublisher,
}

impl SubtaskStateMachine {
    pub fn new(
        store: Arc<dyn RunStore>,
        tokens: Arc<FencingTokenStore>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            store,
            tokens,
            event_publisher,
        }
    }

    /// Attempt to transition the subtask.
    pub async fn transition(
        &self,
        subtask_id: SubtaskId,
        event: SubtaskEvent,
    ) -> StateMachineResult<SubtaskRecord> {
        self.apply(subtask_id, event, None).await
    }

    /// Attempt a transition reported by a worker, recording which worker
    /// produced the outcome.
    pub async fn transition_reported(
        &self,
        subtask_id: SubtaskId,
        event: SubtaskEvent,
        worker_id: &str,
    ) -> StateMachineResult<SubtaskRecord> {
        self.apply(subtask_id, event, Some(worker_id)).await
    }

    async fn apply(
        &self,
        subtask_id: SubtaskId,
        event: SubtaskEvent,
        worker_id: Option<&str>,
    ) -> StateMachineResult<SubtaskRecord> {
        let record = self
            .store
            .fetch_subtask(subtask_id)
            .await?
            .ok_or_else(|| StateMachineError::NotFound {
                entity: format!("Subtask {subtask_id}"),
            })?;
        let target = event.target_state();

        if !subtask_transition_allowed(record.state, target) {
            return Err(StateMachineError::InvalidTransition {
                from: record.state.to_string(),
                to: target.to_string(),
            });
        }
        if matches!(event, SubtaskEvent::Retry) && !record.can_retry() {
            return Err(StateMachineError::RetryBudgetExhausted {
                attempts: record.attempts,
                max_retries: record.max_retries,
            });
        }

        let payload = json!({
            "from": record.state.to_string(),
            "to": target.to_string(),
            "attempt": record.attempts,
            "error": event.error_message(),
            "reason": event.skip_reason(),
        });
        let event_type = event.event_type();
        let name = event_name(&event);
        let mut write = build_write(event, &record);
        if let Some(worker) = worker_id {
            write.worker_id = Some(worker.to_string());
        }

        let token = self.tokens.issue(record.run_id);
        let updated = match self
            .store
            .cas_subtask(subtask_id, record.state, token, write)
            .await?
        {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::StaleToken { current_token } => {
                return Err(StateMachineError::StaleFencingToken {
                    entity: format!("subtask {subtask_id}"),
                    presented: token,
                    current: current_token,
                })
            }
            CasOutcome::StateConflict { current } => {
                return Err(StateMachineError::InvalidTransition {
                    from: current.state.to_string(),
                    to: target.to_string(),
                })
            }
        };

        debug!(
            run_id = %record.run_id,
            subtask_id = %subtask_id,
            from = %record.state,
            to = %target,
            event = event_type,
            fencing_token = token,
            "Subtask transition applied"
        );

        self.publish(
            RunLifecycleEvent::new(name, record.run_id)
                .with_subtask(subtask_id)
                .with_payload(payload),
        )
        .await;

        Ok(updated)
    }

    async fn publish(&self, event: RunLifecycleEvent) {
        if let Err(e) = self.event_publisher.publish(event).await {
            warn!(error = %e, "Failed to publish subtask lifecycle event");
        }
    }
}

/// Translate an accepted event into the record patch it implies.
fn build_write(event: SubtaskEvent, record: &SubtaskRecord) -> SubtaskWrite {
    match event {
        SubtaskEvent::MarkReady => SubtaskWrite::state_only(SubtaskState::Ready),
        SubtaskEvent::Claim => SubtaskWrite {
            attempts: Some(record.attempts + 1),
            dispatched_at: Some(Utc::now()),
            ..SubtaskWrite::state_only(SubtaskState::Running)
        },
        SubtaskEvent::Succeed(result) => SubtaskWrite {
            result: Some(result),
            finished_at: Some(Utc::now()),
            ..SubtaskWrite::state_only(SubtaskState::Succeeded)
        },
        SubtaskEvent::Fail(error) => SubtaskWrite {
            last_error: Some(error),
            finished_at: Some(Utc::now()),
            ..SubtaskWrite::state_only(SubtaskState::Failed)
        },
        SubtaskEvent::Retry => SubtaskWrite::state_only(SubtaskState::Pending),
        SubtaskEvent::Skip(reason) => SubtaskWrite {
            last_error: Some(reason),
            finished_at: Some(Utc::now()),
            ..SubtaskWrite::state_only(SubtaskState::Skipped)
        },
    }
}

fn event_name(event: &SubtaskEvent) -> &'static str {
    match event {
        SubtaskEvent::MarkReady => events::SUBTASK_READY,
        SubtaskEvent::Claim => events::SUBTASK_CLAIMED,
        SubtaskEvent::Succeed(_) => events::SUBTASK_SUCCEEDED,
        SubtaskEvent::Fail(_) => events::SUBTASK_FAILED,
        SubtaskEvent::Retry => events::SUBTASK_RETRYING,
        SubtaskEvent::Skip(_) => events::SUBTASK_SKIPPED,
    }
}
