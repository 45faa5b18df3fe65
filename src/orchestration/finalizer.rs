//! # Run Finalizer
//!
//! Decides what a run's subtask set implies for the run itself: skip
//! branches whose dependencies can no longer succeed, drain cancellations,
//! and drive the run to its terminal state once every subtask has settled.
//!
//! ## Overview
//!
//! The finalizer inspects a run after each scheduling pass and applies
//! whichever action the subtask states imply. All writes go through the
//! state machines, so concurrent finalizers race safely; a lost race means
//! another actor already applied the same conclusion.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::errors::{OrchestrationError, OrchestrationResult};
use crate::models::{RunId, RunProgress, RunRecord, SubtaskId, SubtaskRecord};
use crate::state_machine::{
    RunEvent, RunState, RunStateMachine, SubtaskEvent, SubtaskState, SubtaskStateMachine,
};
use crate::store::RunStore;

/// Result of a finalization check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizationResult {
    pub run_id: RunId,
    pub action: FinalizationAction,
    pub progress: RunProgress,
    /// Reason for the action (if applicable)
    pub reason: Option<String>,
}

/// Action taken by a finalization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizationAction {
    /// Every subtask settled and none failed; the run completed
    Completed,
    /// The run was driven to failed
    Failed,
    /// The run was cancelled after in-flight subtasks drained
    Cancelled,
    /// Running subtasks exist; their outcomes decide what happens next
    AwaitingOutcomes,
    /// Unsettled subtasks remain and none are running
    WorkRemaining,
}

impl FinalizationAction {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Drives runs to their terminal states based on subtask outcomes
pub struct RunFinalizer {
    store: Arc<dyn RunStore>,
    run_machine: RunStateMachine,
    subtask_machine: SubtaskStateMachine,
}

impl RunFinalizer {
    pub fn new(
        store: Arc<dyn RunStore>,
        run_machine: RunStateMachine,
        subtask_machine: SubtaskStateMachine,
    ) -> Self {
        Self {
            store,
            run_machine,
            subtask_machine,
        }
    }

    /// Inspect the run and apply whatever finalization its subtasks imply.
    pub async fn finalize_run(&self, run_id: RunId) -> OrchestrationResult<FinalizationResult> {
        let run = self.fetch_run(run_id).await?;
        if let Some(action) = terminal_action(&run) {
            let progress = self.current_progress(run_id).await?;
            return Ok(FinalizationResult {
                run_id,
                action,
                progress,
                reason: run.error,
            });
        }

        let subtasks = self.skip_dead_branches(run_id).await?;

        if run.cancel_requested {
            return self.drain_cancellation(run_id, &subtasks).await;
        }

        if subtasks.iter().all(|s| s.is_settled()) {
            return self.settle_run(run_id, &subtasks).await;
        }

        let running = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Running)
            .count();
        let action = if running > 0 {
            FinalizationAction::AwaitingOutcomes
        } else {
            FinalizationAction::WorkRemaining
        };
        Ok(FinalizationResult {
            run_id,
            action,
            progress: RunProgress::from_subtasks(&subtasks),
            reason: None,
        })
    }

    /// Abort the run: skip everything that has not started and record the
    /// error on the run itself.
    pub async fn fail_run(
        &self,
        run_id: RunId,
        error: impl Into<String>,
    ) -> OrchestrationResult<FinalizationResult> {
        let error = error.into();
        let run = self.fetch_run(run_id).await?;
        if let Some(action) = terminal_action(&run) {
            let progress = self.current_progress(run_id).await?;
            return Ok(FinalizationResult {
                run_id,
                action,
                progress,
                reason: run.error,
            });
        }

        let subtasks = self.store.fetch_subtasks(run_id).await?;
        self.skip_unstarted(&subtasks, "run aborted before this subtask could execute")
            .await?;

        match self
            .run_machine
            .transition(run_id, RunEvent::fail_with_error(error.clone()))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_lost_race() => {
                debug!(run_id = %run_id, "Run already finalized by another actor");
            }
            Err(e) => return Err(e.into()),
        }

        info!(run_id = %run_id, error = %error, "Run failed");
        let progress = self.current_progress(run_id).await?;
        Ok(FinalizationResult {
            run_id,
            action: FinalizationAction::Failed,
            progress,
            reason: Some(error),
        })
    }

    /// Skip every pending or ready subtask whose dependencies can no longer
    /// all succeed, cascading until a fixpoint is reached.
    async fn skip_dead_branches(&self, run_id: RunId) -> OrchestrationResult<Vec<SubtaskRecord>> {
        loop {
            let subtasks = self.store.fetch_subtasks(run_id).await?;
            let by_id: HashMap<SubtaskId, &SubtaskRecord> =
                subtasks.iter().map(|s| (s.id, s)).collect();

            let mut changed = false;
            for subtask in &subtasks {
                if !matches!(subtask.state, SubtaskState::Pending | SubtaskState::Ready) {
                    continue;
                }
                let dead_dependency = subtask.depends_on.iter().find_map(|dep| {
                    by_id
                        .get(dep)
                        .filter(|d| d.is_settled() && d.state != SubtaskState::Succeeded)
                });
                let Some(dead) = dead_dependency else {
                    continue;
                };

                let reason = match dead.state {
                    SubtaskState::Failed => format!("dependency '{}' failed", dead.aspect),
                    SubtaskState::Skipped => format!("dependency '{}' was skipped", dead.aspect),
                    _ => format!("dependency '{}' did not succeed", dead.aspect),
                };
                match self
                    .subtask_machine
                    .transition(subtask.id, SubtaskEvent::Skip(reason))
                    .await
                {
                    Ok(_) => changed = true,
                    Err(e) if e.is_lost_race() => changed = true,
                    Err(e) => return Err(e.into()),
                }
            }

            if !changed {
                return Ok(subtasks);
            }
        }
    }

    async fn drain_cancellation(
        &self,
        run_id: RunId,
        subtasks: &[SubtaskRecord],
    ) -> OrchestrationResult<FinalizationResult> {
        let running = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Running)
            .count();
        if running > 0 {
            debug!(
                run_id = %run_id,
                running = running,
                "Cancellation waiting for in-flight subtasks to drain"
            );
            return Ok(FinalizationResult {
                run_id,
                action: FinalizationAction::AwaitingOutcomes,
                progress: RunProgress::from_subtasks(subtasks),
                reason: Some(format!("draining {running} running subtasks")),
            });
        }

        self.skip_unstarted(subtasks, "run cancelled").await?;
        match self.run_machine.transition(run_id, RunEvent::Cancel).await {
            Ok(_) => {}
            Err(e) if e.is_lost_race() => {
                debug!(run_id = %run_id, "Run already cancelled by another actor");
            }
            Err(e) => return Err(e.into()),
        }

        info!(run_id = %run_id, "Run cancelled");
        let progress = self.current_progress(run_id).await?;
        Ok(FinalizationResult {
            run_id,
            action: FinalizationAction::Cancelled,
            progress,
            reason: Some("cancellation requested".to_string()),
        })
    }

    /// Every subtask has settled; conclude the run.
    async fn settle_run(
        &self,
        run_id: RunId,
        subtasks: &[SubtaskRecord],
    ) -> OrchestrationResult<FinalizationResult> {
        let failed = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Failed)
            .count();

        if failed > 0 {
            let reason = format!("{failed} of {} subtasks failed", subtasks.len());
            match self
                .run_machine
                .transition(run_id, RunEvent::fail_with_error(reason.clone()))
                .await
            {
                Ok(_) => info!(run_id = %run_id, failed = failed, "Run failed"),
                Err(e) if e.is_lost_race() => {}
                Err(e) => return Err(e.into()),
            }
            let progress = self.current_progress(run_id).await?;
            return Ok(FinalizationResult {
                run_id,
                action: FinalizationAction::Failed,
                progress,
                reason: Some(reason),
            });
        }

        match self.run_machine.transition(run_id, RunEvent::Complete).await {
            Ok(_) => info!(run_id = %run_id, subtasks = subtasks.len(), "Run completed"),
            Err(e) if e.is_lost_race() => {}
            Err(e) => return Err(e.into()),
        }
        let progress = self.current_progress(run_id).await?;
        Ok(FinalizationResult {
            run_id,
            action: FinalizationAction::Completed,
            progress,
            reason: None,
        })
    }

    /// Skip subtasks that have not started. Running subtasks are never
    /// touched; failed subtasks keep their state.
    async fn skip_unstarted(
        &self,
        subtasks: &[SubtaskRecord],
        reason: &str,
    ) -> OrchestrationResult<()> {
        for subtask in subtasks {
            if !matches!(subtask.state, SubtaskState::Pending | SubtaskState::Ready) {
                continue;
            }
            match self
                .subtask_machine
                .transition(subtask.id, SubtaskEvent::Skip(reason.to_string()))
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_lost_race() => {
                    warn!(subtask_id = %subtask.id, "Skip lost a race; leaving as-is");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn fetch_run(&self, run_id: RunId) -> OrchestrationResult<RunRecord> {
        self.store
            .fetch_run(run_id)
            .await?
            .ok_or(OrchestrationError::RunNotFound { run_id })
    }

    async fn current_progress(&self, run_id: RunId) -> OrchestrationResult<RunProgress> {
        let subtasks = self.store.fetch_subtasks(run_id).await?;
        Ok(RunProgress::from_subtasks(&subtasks))
    }
}

/// Map an already-terminal run to the action that produced it.
fn terminal_action(run: &RunRecord) -> Option<FinalizationAction> {
    match run.state {
        RunState::Completed => Some(FinalizationAction::Completed),
        RunState::Failed => Some(FinalizationAction::Failed),
        RunState::Cancelled => Some(FinalizationAction::Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;
    use crate::fencing::FencingTokenStore;
    use crate::models::{RunConfig, SubtaskDefinition, ToolKind};
    use crate::store::InMemoryRunStore;

    struct Fixture {
        finalizer: RunFinalizer,
        run_machine: RunStateMachine,
        subtask_machine: SubtaskStateMachine,
        store: Arc<InMemoryRunStore>,
        run_id: RunId,
    }

    impl Fixture {
        async fn claim(&self, id: SubtaskId) {
            self.subtask_machine
                .transition(id, SubtaskEvent::Claim)
                .await
                .unwrap();
        }

        async fn succeed(&self, id: SubtaskId) {
            self.claim(id).await;
            self.subtask_machine
                .transition(id, SubtaskEvent::Succeed(serde_json::json!({"ok": true})))
                .await
                .unwrap();
        }

        async fn fail_once(&self, id: SubtaskId) {
            self.claim(id).await;
            self.subtask_machine
                .transition(id, SubtaskEvent::fail_with_error("collector crashed"))
                .await
                .unwrap();
        }

        async fn subtask_state(&self, id: SubtaskId) -> SubtaskState {
            self.store.fetch_subtask(id).await.unwrap().unwrap().state
        }
    }

    /// Seed an executing run; `deps` wires each subtask to the listed
    /// indices within the same slice.
    async fn fixture(max_retries: u32, deps: &[&[usize]]) -> (Fixture, Vec<SubtaskId>) {
        let store = Arc::new(InMemoryRunStore::new());
        let tokens = Arc::new(FencingTokenStore::new());
        let publisher = EventPublisher::new(64);
        let run_machine = RunStateMachine::new(store.clone(), tokens.clone(), publisher.clone());
        let subtask_machine =
            SubtaskStateMachine::new(store.clone(), tokens.clone(), publisher.clone());
        let finalizer = RunFinalizer::new(
            store.clone(),
            run_machine.clone(),
            subtask_machine.clone(),
        );

        let mut run = RunRecord::new("survey the registry", RunConfig::default());
        run.state = RunState::Executing;
        let run_id = run.id;

        let mut records = Vec::new();
        for (index, _) in deps.iter().enumerate() {
            let definition = SubtaskDefinition {
                aspect: format!("aspect-{index}"),
                query: format!("query-{index}"),
                depth: None,
                tool: ToolKind::Shell,
                priority: 0,
                depends_on: vec![],
            };
            records.push(SubtaskRecord::new(
                run_id,
                index,
                &definition,
                vec![],
                max_retries,
            ));
        }
        let ids: Vec<SubtaskId> = records.iter().map(|r| r.id).collect();
        for (record, dep_indices) in records.iter_mut().zip(deps) {
            record.depends_on = dep_indices.iter().map(|&i| ids[i]).collect();
        }

        store.insert_run(run).await.unwrap();
        store.insert_subtasks(records).await.unwrap();

        (
            Fixture {
                finalizer,
                run_machine,
                subtask_machine,
                store,
                run_id,
            },
            ids,
        )
    }

    #[tokio::test]
    async fn test_all_succeeded_completes_the_run() {
        let (f, ids) = fixture(2, &[&[], &[]]).await;
        for id in &ids {
            f.succeed(*id).await;
        }

        let result = f.finalizer.finalize_run(f.run_id).await.unwrap();
        assert_eq!(result.action, FinalizationAction::Completed);
        assert!(result.progress.is_fully_settled());

        let run = f.store.fetch_run(f.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_terminal_failure_fails_the_run_and_records_reason() {
        let (f, ids) = fixture(0, &[&[], &[]]).await;
        f.succeed(ids[0]).await;
        f.fail_once(ids[1]).await;

        let result = f.finalizer.finalize_run(f.run_id).await.unwrap();
        assert_eq!(result.action, FinalizationAction::Failed);
        assert_eq!(result.reason.as_deref(), Some("1 of 2 subtasks failed"));

        let run = f.store.fetch_run(f.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error.as_deref(), Some("1 of 2 subtasks failed"));
    }

    #[tokio::test]
    async fn test_dead_branch_cascades_to_fixpoint() {
        // 0 failed terminally; 1 depends on 0; 2 depends on 1
        let (f, ids) = fixture(0, &[&[], &[0], &[1]]).await;
        f.fail_once(ids[0]).await;

        let result = f.finalizer.finalize_run(f.run_id).await.unwrap();
        assert_eq!(result.action, FinalizationAction::Failed);

        let middle = f.store.fetch_subtask(ids[1]).await.unwrap().unwrap();
        assert_eq!(middle.state, SubtaskState::Skipped);
        assert!(middle.last_error.as_deref().unwrap().contains("aspect-0"));

        let leaf = f.store.fetch_subtask(ids[2]).await.unwrap().unwrap();
        assert_eq!(leaf.state, SubtaskState::Skipped);
        assert!(leaf.last_error.as_deref().unwrap().contains("aspect-1"));
    }

    #[tokio::test]
    async fn test_retryable_failure_keeps_dependents_alive() {
        let (f, ids) = fixture(2, &[&[], &[0]]).await;
        f.fail_once(ids[0]).await;

        let result = f.finalizer.finalize_run(f.run_id).await.unwrap();
        // The failed subtask still has budget, so nothing is skipped
        assert_eq!(result.action, FinalizationAction::WorkRemaining);

        let dependent = f.store.fetch_subtask(ids[1]).await.unwrap().unwrap();
        assert_eq!(dependent.state, SubtaskState::Pending);
    }

    #[tokio::test]
    async fn test_running_subtasks_defer_finalization() {
        let (f, ids) = fixture(2, &[&[], &[]]).await;
        f.claim(ids[0]).await;
        f.succeed(ids[1]).await;

        let result = f.finalizer.finalize_run(f.run_id).await.unwrap();
        assert_eq!(result.action, FinalizationAction::AwaitingOutcomes);
    }

    #[tokio::test]
    async fn test_cancellation_waits_for_running_then_drains() {
        let (f, ids) = fixture(2, &[&[], &[]]).await;
        f.claim(ids[0]).await;
        f.run_machine.request_cancel(f.run_id).await.unwrap();

        let waiting = f.finalizer.finalize_run(f.run_id).await.unwrap();
        assert_eq!(waiting.action, FinalizationAction::AwaitingOutcomes);

        // The in-flight subtask reports; the next check drains the rest
        f.subtask_machine
            .transition_reported(
                ids[0],
                SubtaskEvent::Succeed(serde_json::json!({"ok": true})),
                "worker-1",
            )
            .await
            .unwrap();

        let drained = f.finalizer.finalize_run(f.run_id).await.unwrap();
        assert_eq!(drained.action, FinalizationAction::Cancelled);

        let run = f.store.fetch_run(f.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Cancelled);
        assert_eq!(f.subtask_state(ids[0]).await, SubtaskState::Succeeded);
        assert_eq!(f.subtask_state(ids[1]).await, SubtaskState::Skipped);
    }

    #[tokio::test]
    async fn test_fail_run_skips_unstarted_and_records_error() {
        let (f, ids) = fixture(2, &[&[], &[0]]).await;

        let result = f
            .finalizer
            .fail_run(f.run_id, "no progress after 3 passes")
            .await
            .unwrap();
        assert_eq!(result.action, FinalizationAction::Failed);

        let run = f.store.fetch_run(f.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error.as_deref(), Some("no progress after 3 passes"));
        for id in ids {
            assert_eq!(f.subtask_state(id).await, SubtaskState::Skipped);
        }
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent_on_terminal_runs() {
        let (f, ids) = fixture(2, &[&[]]).await;
        f.succeed(ids[0]).await;

        let first = f.finalizer.finalize_run(f.run_id).await.unwrap();
        let second = f.finalizer.finalize_run(f.run_id).await.unwrap();
        assert_eq!(first.action, FinalizationAction::Completed);
        assert_eq!(second.action, FinalizationAction::Completed);
    }
}
