//! In-process reference implementation of [`RunStore`].
//!
//! Backs tests, the demo binary, and single-process deployments. Per-record
//! atomicity comes from the map's per-key locking; the token comparison,
//! state check, and write happen under one key lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use super::{CasOutcome, RunStore, RunWrite, StoreError, StoreResult, SubtaskWrite};
use crate::fencing::FencingToken;
use crate::messaging::SubtaskOutcome;
use crate::models::{RunId, RunRecord, SubtaskId, SubtaskRecord};
use crate::state_machine::{RunState, SubtaskState};

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: DashMap<RunId, RunRecord>,
    subtasks: DashMap<SubtaskId, SubtaskRecord>,
    /// Subtask ids per run in creation order
    run_subtasks: DashMap<RunId, Vec<SubtaskId>>,
    outcomes: Mutex<HashMap<RunId, VecDeque<SubtaskOutcome>>>,
    signals: DashMap<RunId, Arc<Notify>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn signal(&self, run_id: RunId) -> Arc<Notify> {
        self.signals
            .entry(run_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_run(&self, run: RunRecord) -> StoreResult<()> {
        let run_id = run.id;
        if self.runs.contains_key(&run_id) {
            return Err(StoreError::AlreadyExists {
                entity: format!("run {run_id}"),
            });
        }
        self.runs.insert(run_id, run);
        self.run_subtasks.entry(run_id).or_default();
        Ok(())
    }

    async fn insert_subtasks(&self, subtasks: Vec<SubtaskRecord>) -> StoreResult<()> {
        for subtask in subtasks {
            if self.subtasks.contains_key(&subtask.id) {
                return Err(StoreError::AlreadyExists {
                    entity: format!("subtask {}", subtask.id),
                });
            }
            self.run_subtasks
                .entry(subtask.run_id)
                .or_default()
                .push(subtask.id);
            self.subtasks.insert(subtask.id, subtask);
        }
        Ok(())
    }

    async fn fetch_run(&self, run_id: RunId) -> StoreResult<Option<RunRecord>> {
        Ok(self.runs.get(&run_id).map(|entry| entry.clone()))
    }

    async fn fetch_subtask(&self, subtask_id: SubtaskId) -> StoreResult<Option<SubtaskRecord>> {
        Ok(self.subtasks.get(&subtask_id).map(|entry| entry.clone()))
    }

    async fn fetch_subtasks(&self, run_id: RunId) -> StoreResult<Vec<SubtaskRecord>> {
        let ids = match self.run_subtasks.get(&run_id) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.subtasks.get(&id) {
                records.push(record.clone());
            }
        }
        Ok(records)
    }

    async fn cas_run(
        &self,
        run_id: RunId,
        expected_state: RunState,
        presented_token: FencingToken,
        write: RunWrite,
    ) -> StoreResult<CasOutcome<RunRecord>> {
        let mut entry = self.runs.get_mut(&run_id).ok_or_else(|| StoreError::NotFound {
            entity: format!("run {run_id}"),
        })?;
        let record = entry.value_mut();

        if presented_token < record.fencing_token {
            return Ok(CasOutcome::StaleToken {
                current_token: record.fencing_token,
            });
        }
        if record.state != expected_state {
            return Ok(CasOutcome::StateConflict {
                current: record.clone(),
            });
        }

        trace!(
            run_id = %run_id,
            from = %record.state,
            to = %write.next_state,
            token = presented_token,
            "Applying run write"
        );
        record.state = write.next_state;
        record.fencing_token = record.fencing_token.max(presented_token) + 1;
        if let Some(flag) = write.cancel_requested {
            record.cancel_requested = flag;
        }
        if let Some(error) = write.error {
            record.error = Some(error);
        }
        if let Some(strategy) = write.strategy_used {
            record.strategy_used = Some(strategy);
        }
        if let Some(completed_at) = write.completed_at {
            record.completed_at = Some(completed_at);
        }
        record.updated_at = Utc::now();
        Ok(CasOutcome::Applied(record.clone()))
    }

    async fn cas_subtask(
        &self,
        subtask_id: SubtaskId,
        expected_state: SubtaskState,
        presented_token: FencingToken,
        write: SubtaskWrite,
    ) -> StoreResult<CasOutcome<SubtaskRecord>> {
        let mut entry =
            self.subtasks
                .get_mut(&subtask_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: format!("subtask {subtask_id}"),
                })?;
        let record = entry.value_mut();

        if presented_token < record.fencing_token {
            return Ok(CasOutcome::StaleToken {
                current_token: record.fencing_token,
            });
        }
        if record.state != expected_state {
            return Ok(CasOutcome::StateConflict {
                current: record.clone(),
            });
        }

        trace!(
            subtask_id = %subtask_id,
            from = %record.state,
            to = %write.next_state,
            token = presented_token,
            "Applying subtask write"
        );
        record.state = write.next_state;
        record.fencing_token = record.fencing_token.max(presented_token) + 1;
        if let Some(attempts) = write.attempts {
            record.attempts = attempts;
        }
        if let Some(worker_id) = write.worker_id {
            record.worker_id = Some(worker_id);
        }
        if let Some(last_error) = write.last_error {
            record.last_error = Some(last_error);
        }
        if let Some(result) = write.result {
            record.result = Some(result);
        }
        if let Some(dispatched_at) = write.dispatched_at {
            record.dispatched_at = Some(dispatched_at);
        }
        if let Some(finished_at) = write.finished_at {
            record.finished_at = Some(finished_at);
        }
        record.updated_at = Utc::now();
        Ok(CasOutcome::Applied(record.clone()))
    }

    async fn push_outcome(&self, outcome: SubtaskOutcome) -> StoreResult<()> {
        let run_id = outcome.run_id;
        {
            let mut outcomes = self.outcomes.lock();
            outcomes.entry(run_id).or_default().push_back(outcome);
        }
        // notify_one leaves a permit behind when nobody is parked yet
        self.signal(run_id).notify_one();
        Ok(())
    }

    async fn drain_outcomes(&self, run_id: RunId) -> StoreResult<Vec<SubtaskOutcome>> {
        let mut outcomes = self.outcomes.lock();
        Ok(outcomes
            .get_mut(&run_id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    async fn await_activity(&self, run_id: RunId, timeout: Duration) -> StoreResult<bool> {
        let signal = self.signal(run_id);
        Ok(tokio::time::timeout(timeout, signal.notified())
            .await
            .is_ok())
    }
}
