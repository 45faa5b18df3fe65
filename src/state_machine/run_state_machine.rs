//! # Run State Machine
//!
//! Applies run lifecycle transitions through the store's fenced
//! compare-and-set. Every write presents a freshly issued fencing token and
//! the state the caller observed; the store rejects writes from stale actors
//! and from actors whose snapshot has been overtaken.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::RunEvent;
use super::states::RunState;
use super::transitions::run_transition_allowed;
use crate::constants::events;
use crate::decomposer::DecompositionStrategy;
use crate::events::{EventPublisher, RunLifecycleEvent};
use crate::fencing::{FencingToken, FencingTokenStore};
use crate::models::{RunId, RunRecord};
use crate::store::{CasOutcome, RunStore, RunWrite};

/// Fenced transition writer for run records
#[derive(Clone)]
pub struct RunStateMachine {
    store: Arc<dyn RunStore>,
    tokens: Arc<FencingTokenStore>,
    event_publisher: EventPublisher,
}

impl RunStateMachine {
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

    /// Attempt to transition the run. Returns the updated record, or an
    /// error describing why the transition was refused.
    pub async fn transition(
        &self,
        run_id: RunId,
        event: RunEvent,
    ) -> StateMachineResult<RunRecord> {
        let run = self.fetch(run_id).await?;
        let target = event.target_state();

        if !run_transition_allowed(run.state, target) {
            return Err(StateMachineError::InvalidTransition {
                from: run.state.to_string(),
                to: target.to_string(),
            });
        }

        let mut write = RunWrite::state_only(target);
        if let Some(message) = event.error_message() {
            write.error = Some(message.to_string());
        }
        if target.is_terminal() {
            write.completed_at = Some(Utc::now());
        }

        let token = self.tokens.issue(run_id);
        let updated = self.apply_write(run_id, run.state, target, token, write).await?;

        debug!(
            run_id = %run_id,
            from = %run.state,
            to = %target,
            event = event.event_type(),
            fencing_token = token,
            "Run transition applied"
        );

        let mut lifecycle = RunLifecycleEvent::new(event_name(target), run_id).with_payload(json!({
            "from": run.state.to_string(),
            "to": target.to_string(),
            "error": event.error_message(),
        }));
        if target.is_terminal() {
            lifecycle = lifecycle.terminal();
        }
        self.publish(lifecycle).await;

        Ok(updated)
    }

    /// Request cancellation. Runs that have not started planning cancel
    /// immediately; active runs only get the flag set and drain at the next
    /// scheduling boundary. Terminal runs are left untouched.
    pub async fn request_cancel(&self, run_id: RunId) -> StateMachineResult<RunRecord> {
        let run = self.fetch(run_id).await?;
        match run.state {
            RunState::Created | RunState::Queued => self.transition(run_id, RunEvent::Cancel).await,
            RunState::Planning | RunState::Executing => {
                if run.cancel_requested {
                    return Ok(run);
                }
                let write = RunWrite {
                    cancel_requested: Some(true),
                    ..RunWrite::state_only(run.state)
                };
                let token = self.tokens.issue(run_id);
                let updated = self
                    .apply_write(run_id, run.state, run.state, token, write)
                    .await?;

                debug!(run_id = %run_id, state = %run.state, "Cancellation flagged");
                self.publish(
                    RunLifecycleEvent::new(events::RUN_CANCEL_REQUESTED, run_id)
                        .with_payload(json!({"state": run.state.to_string()})),
                )
                .await;
                Ok(updated)
            }
            // Already settled; nothing to cancel
            _ => Ok(run),
        }
    }

    /// Record which decomposition strategy planning settled on. This is a
    /// fenced annotation, not a transition; the run must still be planning.
    pub async fn record_strategy(
        &self,
        run_id: RunId,
        strategy: DecompositionStrategy,
    ) -> StateMachineResult<RunRecord> {
        let run = self.fetch(run_id).await?;
        let write = RunWrite {
            strategy_used: Some(strategy),
            ..RunWrite::state_only(run.state)
        };
        let token = self.tokens.issue(run_id);
        self.apply_write(run_id, run.state, run.state, token, write)
            .await
    }

    async fn fetch(&self, run_id: RunId) -> StateMachineResult<RunRecord> {
        self.store
            .fetch_run(run_id)
            .await?
            .ok_or_else(|| StateMachineError::NotFound {
                entity: format!("Run {run_id}"),
            })
    }

    async fn apply_write(
        &self,
        run_id: RunId,
        expected: RunState,
        target: RunState,
        token: FencingToken,
        write: RunWrite,
    ) -> StateMachineResult<RunRecord> {
        match self.store.cas_run(run_id, expected, token, write).await? {
            CasOutcome::Applied(record) => Ok(record),
            CasOutcome::StaleToken { current_token } => {
                Err(StateMachineError::StaleFencingToken {
                    entity: format!("run {run_id}"),
                    presented: token,
                    current: current_token,
                })
            }
            CasOutcome::StateConflict { current } => Err(StateMachineError::InvalidTransition {
                from: current.state.to_string(),
                to: target.to_string(),
            }),
        }
    }

    async fn publish(&self, event: RunLifecycleEvent) {
        if let Err(e) = self.event_publisher.publish(event).await {
            warn!(error = %e, "Failed to publish run lifecycle event");
        }
    }
}

fn event_name(target: RunState) -> &'static str {
    match target {
        RunState::Created => events::RUN_CREATED,
        RunState::Queued => events::RUN_QUEUED,
        RunState::Planning => events::RUN_PLANNING,
        RunState::Executing => events::RUN_EXECUTING,
        RunState::Completed => events::RUN_COMPLETED,
        RunState::Failed => events::RUN_FAILED,
        RunState::Cancelled => events::RUN_CANCELLED,
    }
}
