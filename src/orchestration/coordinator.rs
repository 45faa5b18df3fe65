//! # Orchestrator
//!
//! Entry point for creating, driving, and observing runs. Wires the
//! decomposer, scheduler, outcome processor, and finalizer around one store
//! and one dispatch queue, and owns the drive loop that moves a run from
//! `created` to a terminal state.
//!
//! ## Architecture: Passes Over a Shared Store
//!
//! The orchestrator holds no run state of its own. Every pass re-reads the
//! store, computes a decision from the snapshot, and applies it through
//! fenced compare-and-set writes. Two orchestrators driving the same run
//! settle every conflict at the store; the loser of a race observes the
//! winner's write on its next pass and moves on.
//!
//! ## The Drive Loop
//!
//! One iteration while a run is executing:
//!
//! 1. Drain reported outcomes and apply them to subtask records
//! 2. Sweep for dispatches that exceeded their execution timeout
//! 3. Run a scheduling pass: claim and dispatch eligible subtasks
//! 4. Finalize: skip dead branches, honor cancellation, settle the run
//!
//! A pass that changes nothing while work remains counts toward the stall
//! limit; hitting the limit fails the run as deadlocked. Passes that are
//! merely waiting on in-flight subtasks never count, since the timeout
//! sweep bounds that wait.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::errors::{OrchestrationError, OrchestrationResult};
use super::finalizer::{FinalizationAction, RunFinalizer};
use super::outcome_processor::OutcomeProcessor;
use super::types::{PassReport, RunProgressReport, RunStatusSnapshot};
use crate::config::ConductorConfig;
use crate::constants::events::RUN_CREATED;
use crate::constants::system::TIMEOUT_SWEEP_WORKER_ID;
use crate::decomposer::RunDecomposer;
use crate::error::ValidationError;
use crate::events::{EventPublisher, RunLifecycleEvent};
use crate::fencing::FencingTokenStore;
use crate::llm::LanguageModel;
use crate::logging::log_run_operation;
use crate::messaging::{
    DispatchMessage, DispatchMetadata, JobQueue, OutcomeDisposition, SubtaskOutcome,
};
use crate::models::{RunConfig, RunId, RunProgress, RunRecord, SubtaskId, SubtaskRecord};
use crate::scheduler::SubtaskScheduler;
use crate::state_machine::{
    RunEvent, RunState, RunStateMachine, SubtaskEvent, SubtaskState, SubtaskStateMachine,
};
use crate::store::RunStore;

/// Coordinates runs end to end: creation, planning, dispatch, reconciliation,
/// and finalization.
pub struct Orchestrator {
    config: ConductorConfig,
    store: Arc<dyn RunStore>,
    queue: Arc<dyn JobQueue>,
    tokens: Arc<FencingTokenStore>,
    event_publisher: EventPublisher,
    run_machine: RunStateMachine,
    subtask_machine: SubtaskStateMachine,
    scheduler: SubtaskScheduler,
    decomposer: RunDecomposer,
    processor: OutcomeProcessor,
    finalizer: RunFinalizer,
}

impl Orchestrator {
    pub fn new(
        config: ConductorConfig,
        store: Arc<dyn RunStore>,
        queue: Arc<dyn JobQueue>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let tokens = Arc::new(FencingTokenStore::new());
        let event_publisher = EventPublisher::new(config.event_channel_capacity);
        let run_machine =
            RunStateMachine::new(store.clone(), tokens.clone(), event_publisher.clone());
        let subtask_machine =
            SubtaskStateMachine::new(store.clone(), tokens.clone(), event_publisher.clone());
        let processor = OutcomeProcessor::new(store.clone(), subtask_machine.clone());
        let finalizer = RunFinalizer::new(
            store.clone(),
            run_machine.clone(),
            subtask_machine.clone(),
        );

        Self {
            config,
            store,
            queue,
            tokens,
            event_publisher,
            run_machine,
            subtask_machine,
            scheduler: SubtaskScheduler::new(),
            decomposer: RunDecomposer::new(model),
            processor,
            finalizer,
        }
    }

    /// Publisher carrying lifecycle and progress events for every run this
    /// orchestrator touches.
    pub fn event_publisher(&self) -> &EventPublisher {
        &self.event_publisher
    }

    /// Create a run with the engine's default configuration.
    pub async fn create_run(&self, prompt: impl Into<String>) -> OrchestrationResult<RunRecord> {
        self.create_run_with_config(prompt, self.config.run_config())
            .await
    }

    /// Create a run with explicit per-run configuration. The record is
    /// persisted in `created`; nothing executes until the run is driven.
    pub async fn create_run_with_config(
        &self,
        prompt: impl Into<String>,
        config: RunConfig,
    ) -> OrchestrationResult<RunRecord> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt.into());
        }
        config.validate()?;

        let run = RunRecord::new(prompt, config);
        self.store.insert_run(run.clone()).await?;

        if let Err(e) = self
            .event_publisher
            .publish(RunLifecycleEvent::new(RUN_CREATED, run.id))
            .await
        {
            warn!(run_id = %run.id, error = %e, "Created event dropped");
        }
        log_run_operation("create_run", Some(&run.id.to_string()), "success", None);
        info!(run_id = %run.id, "🚀 Run created");
        Ok(run)
    }

    /// Plan a freshly created run: enqueue it, decompose the prompt into a
    /// subtask graph, persist the graph, and activate execution. A
    /// decomposition failure marks the run failed before the error is
    /// returned.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn start_run(&self, run_id: RunId) -> OrchestrationResult<RunRecord> {
        self.run_machine.transition(run_id, RunEvent::Enqueue).await?;
        self.run_machine
            .transition(run_id, RunEvent::StartPlanning)
            .await?;

        let run = self.fetch_run(run_id).await?;
        let decomposition = match self.decomposer.decompose(&run).await {
            Ok(decomposition) => decomposition,
            Err(e) => {
                let message = format!("Decomposition failed: {e}");
                match self
                    .run_machine
                    .transition(run_id, RunEvent::fail_with_error(message.clone()))
                    .await
                {
                    Ok(_) => {}
                    Err(fail_err) if fail_err.is_lost_race() => {}
                    Err(fail_err) => return Err(fail_err.into()),
                }
                log_run_operation(
                    "start_run",
                    Some(&run_id.to_string()),
                    "failure",
                    Some(&message),
                );
                return Err(e.into());
            }
        };

        self.run_machine
            .record_strategy(run_id, decomposition.strategy)
            .await?;

        // Records are created first so dependency indices can be resolved
        // to the generated ids
        let mut records: Vec<SubtaskRecord> = decomposition
            .definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                SubtaskRecord::new(
                    run_id,
                    index,
                    definition,
                    Vec::new(),
                    run.config.worker_max_retries,
                )
            })
            .collect();
        let ids: Vec<SubtaskId> = records.iter().map(|r| r.id).collect();
        for (record, definition) in records.iter_mut().zip(&decomposition.definitions) {
            record.depends_on = definition.depends_on.iter().map(|&i| ids[i]).collect();
        }
        self.store.insert_subtasks(records).await?;

        let run = self
            .run_machine
            .transition(run_id, RunEvent::ActivateExecution)
            .await?;
        info!(
            run_id = %run_id,
            subtasks = ids.len(),
            strategy = %decomposition.strategy,
            strategy_inferred = decomposition.strategy_inferred,
            "📋 Run planned; execution activated"
        );
        log_run_operation(
            "start_run",
            Some(&run_id.to_string()),
            "success",
            Some(&format!(
                "{} subtasks via {} strategy",
                ids.len(),
                decomposition.strategy
            )),
        );
        Ok(run)
    }

    /// Request cancellation. Runs that have not started planning cancel
    /// immediately; active runs drain their in-flight subtasks first.
    pub async fn cancel_run(&self, run_id: RunId) -> OrchestrationResult<RunRecord> {
        let _ = self.fetch_run(run_id).await?;
        let run = self.run_machine.request_cancel(run_id).await?;
        log_run_operation(
            "cancel_run",
            Some(&run_id.to_string()),
            "success",
            Some(&format!("state {}", run.state)),
        );
        Ok(run)
    }

    /// Point-in-time progress for a run.
    pub async fn get_progress(&self, run_id: RunId) -> OrchestrationResult<RunProgressReport> {
        let run = self.fetch_run(run_id).await?;
        let subtasks = self.store.fetch_subtasks(run_id).await?;
        Ok(RunProgressReport::new(
            &run,
            RunProgress::from_subtasks(&subtasks),
        ))
    }

    /// Full status: the run record, its progress, and every subtask record.
    pub async fn get_status(&self, run_id: RunId) -> OrchestrationResult<RunStatusSnapshot> {
        let run = self.fetch_run(run_id).await?;
        let subtasks = self.store.fetch_subtasks(run_id).await?;
        let progress = RunProgress::from_subtasks(&subtasks);
        Ok(RunStatusSnapshot {
            run,
            progress,
            subtasks,
        })
    }

    /// One scheduling pass: compute the eligible batch from a snapshot, then
    /// claim and dispatch through the state machine. Claims that lose races
    /// to concurrent passes are dropped, not retried.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn run_scheduling_pass(&self, run_id: RunId) -> OrchestrationResult<PassReport> {
        let run = self.fetch_run(run_id).await?;
        let subtasks = self.store.fetch_subtasks(run_id).await?;
        let pass_token = self.tokens.issue(run_id);
        let decision = self.scheduler.next_eligible(&run, &subtasks, pass_token);

        let mut report = PassReport::idle(run_id, pass_token);
        if decision.is_empty() {
            return Ok(report);
        }

        for promotion in &decision.promotions {
            match self
                .subtask_machine
                .transition(promotion.subtask_id, SubtaskEvent::MarkReady)
                .await
            {
                Ok(_) => report.promoted += 1,
                Err(e) if e.is_lost_race() => report.lost_races += 1,
                Err(e) => return Err(e.into()),
            }
        }

        for selection in &decision.selections {
            let claimed = match self
                .subtask_machine
                .transition(selection.subtask_id, SubtaskEvent::Claim)
                .await
            {
                Ok(record) => record,
                Err(e) if e.is_lost_race() => {
                    report.lost_races += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let message = DispatchMessage::new(
                run_id,
                claimed.id,
                claimed.aspect.clone(),
                claimed.query.clone(),
                claimed.tool,
            )
            .with_depth(claimed.depth)
            .with_metadata(DispatchMetadata {
                created_at: Utc::now(),
                attempt: claimed.attempts,
                max_retries: claimed.max_retries,
                timeout_ms: run.config.subtask_timeout_ms,
                correlation_id: Some(format!("pass-{pass_token}")),
                priority: claimed.priority,
            });

            if let Err(e) = self.queue.enqueue(message).await {
                // The claim stands; the timeout sweep re-drives a subtask
                // whose dispatch was lost
                warn!(
                    subtask_id = %claimed.id,
                    attempt = claimed.attempts,
                    error = %e,
                    "Dispatch enqueue failed"
                );
                continue;
            }
            report.dispatched += 1;
            debug!(
                subtask_id = %claimed.id,
                aspect = %claimed.aspect,
                attempt = claimed.attempts,
                "Subtask dispatched"
            );
        }

        debug!(
            run_id = %run_id,
            pass_token = pass_token,
            dispatched = report.dispatched,
            promoted = report.promoted,
            lost_races = report.lost_races,
            "Scheduling pass applied"
        );
        Ok(report)
    }

    /// Synthesize failure outcomes for running subtasks whose dispatch
    /// exceeded the run's execution timeout. The synthetic outcomes travel
    /// the normal inbox so reconciliation stays in one place.
    pub async fn sweep_timeouts(&self, run_id: RunId) -> OrchestrationResult<usize> {
        let run = self.fetch_run(run_id).await?;
        let subtasks = self.store.fetch_subtasks(run_id).await?;
        let timeout_ms = run.config.subtask_timeout_ms;
        let now = Utc::now();

        let mut swept = 0;
        for record in &subtasks {
            if record.state != SubtaskState::Running {
                continue;
            }
            let Some(dispatched_at) = record.dispatched_at else {
                continue;
            };
            let elapsed_ms = now.signed_duration_since(dispatched_at).num_milliseconds();
            if elapsed_ms < i64::try_from(timeout_ms).unwrap_or(i64::MAX) {
                continue;
            }

            let outcome = SubtaskOutcome {
                run_id,
                subtask_id: record.id,
                worker_id: TIMEOUT_SWEEP_WORKER_ID.to_string(),
                attempt: record.attempts,
                disposition: OutcomeDisposition::Failure {
                    error: format!("no outcome within {timeout_ms}ms of dispatch"),
                },
                execution_time_ms: elapsed_ms.max(0) as u64,
                reported_at: now,
            };
            self.store.push_outcome(outcome).await?;
            swept += 1;
            warn!(
                subtask_id = %record.id,
                attempt = record.attempts,
                elapsed_ms = elapsed_ms,
                "⏰ Subtask timed out; synthetic failure queued"
            );
        }
        Ok(swept)
    }

    /// Drive a run to a terminal state and return the terminal record.
    ///
    /// Safe to call from multiple processes for the same run; every write
    /// races through the store's fenced compare-and-set, so redundant
    /// drivers reinforce each other instead of corrupting state.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn drive(&self, run_id: RunId) -> OrchestrationResult<RunRecord> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut stalled_passes: u32 = 0;

        info!(run_id = %run_id, "🚀 Driving run");
        loop {
            let run = self.fetch_run(run_id).await?;

            match run.state {
                RunState::Completed | RunState::Failed | RunState::Cancelled => {
                    self.tokens.forget(run_id);
                    info!(run_id = %run_id, state = %run.state, "🏁 Run reached terminal state");
                    log_run_operation(
                        "drive",
                        Some(&run_id.to_string()),
                        &run.state.to_string(),
                        run.error.as_deref(),
                    );
                    return Ok(run);
                }
                RunState::Created => {
                    match self.start_run(run_id).await {
                        Ok(_) => {}
                        Err(OrchestrationError::Decomposition(e)) => {
                            // start_run already drove the run to failed; the
                            // next iteration observes the terminal record
                            warn!(run_id = %run_id, error = %e, "Planning failed");
                        }
                        Err(OrchestrationError::StateMachine(e)) if e.is_lost_race() => {}
                        Err(e) => return Err(e),
                    }
                    continue;
                }
                RunState::Queued | RunState::Planning => {
                    // Another driver owns the planning phase; wait for it
                    self.store.await_activity(run_id, poll_interval).await?;
                    continue;
                }
                RunState::Executing => {}
            }

            let mut advanced = false;

            for outcome in self.store.drain_outcomes(run_id).await? {
                if self.processor.apply(&outcome).await?.advanced() {
                    advanced = true;
                }
            }

            if self.sweep_timeouts(run_id).await? > 0 {
                advanced = true;
            }

            if self.run_scheduling_pass(run_id).await?.made_progress() {
                advanced = true;
            }

            let finalization = self.finalizer.finalize_run(run_id).await?;
            self.publish_progress(run_id, &finalization.progress).await;

            match finalization.action {
                FinalizationAction::Completed
                | FinalizationAction::Failed
                | FinalizationAction::Cancelled => {
                    continue;
                }
                FinalizationAction::AwaitingOutcomes => {
                    stalled_passes = 0;
                }
                FinalizationAction::WorkRemaining => {
                    if advanced {
                        stalled_passes = 0;
                    } else {
                        stalled_passes += 1;
                        debug!(
                            run_id = %run_id,
                            stalled_passes = stalled_passes,
                            "Pass made no progress"
                        );
                        if stalled_passes >= self.config.stall_pass_limit {
                            let error = OrchestrationError::SchedulingDeadlock {
                                run_id,
                                passes: stalled_passes,
                            }
                            .to_string();
                            warn!(
                                run_id = %run_id,
                                passes = stalled_passes,
                                "Deadlock detected; failing run"
                            );
                            self.finalizer.fail_run(run_id, error).await?;
                            continue;
                        }
                    }
                }
            }

            if !advanced {
                self.store.await_activity(run_id, poll_interval).await?;
            }
        }
    }

    async fn publish_progress(&self, run_id: RunId, progress: &RunProgress) {
        if let Err(e) = self.event_publisher.publish_progress(run_id, progress).await {
            warn!(run_id = %run_id, error = %e, "Progress event dropped");
        }
    }

    async fn fetch_run(&self, run_id: RunId) -> OrchestrationResult<RunRecord> {
        self.store
            .fetch_run(run_id)
            .await?
            .ok_or(OrchestrationError::RunNotFound { run_id })
    }
}
