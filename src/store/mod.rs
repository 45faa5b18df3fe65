//! # Run Store
//!
//! Persistence boundary for runs, subtasks, and the worker outcome inbox.
//!
//! ## Overview
//!
//! Every state-bearing write goes through a compare-and-swap keyed on the
//! record's fencing token: the store applies a write only when the presented
//! token is admissible (not below the stored token) and the record is still
//! in the state the writer observed. On acceptance the stored token becomes
//! `max(stored, presented) + 1` in the same atomic step, so no token value
//! is ever accepted twice.
//!
//! Workers never write record state. They push [`SubtaskOutcome`] reports
//! into the outcome inbox; the orchestrator drains the inbox and applies the
//! matching transitions, keeping reconciliation in one writer.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::decomposer::DecompositionStrategy;
use crate::fencing::FencingToken;
use crate::messaging::SubtaskOutcome;
use crate::models::{RunId, RunRecord, SubtaskId, SubtaskRecord};
use crate::state_machine::{RunState, SubtaskState};

pub use memory::InMemoryRunStore;

/// Store operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("{entity} already exists")]
    AlreadyExists { entity: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a compare-and-swap write
#[derive(Debug, Clone)]
pub enum CasOutcome<T> {
    /// Write accepted; carries the updated record
    Applied(T),
    /// Presented token is below the stored token
    StaleToken { current_token: FencingToken },
    /// Token was admissible but the record left the expected state; carries
    /// the current record so the caller can diagnose the conflict
    StateConflict { current: T },
}

impl<T> CasOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Fields a run transition may set alongside the state change. `None` leaves
/// the field untouched.
#[derive(Debug, Clone)]
pub struct RunWrite {
    pub next_state: RunState,
    pub cancel_requested: Option<bool>,
    pub error: Option<String>,
    pub strategy_used: Option<DecompositionStrategy>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunWrite {
    pub fn state_only(next_state: RunState) -> Self {
        Self {
            next_state,
            cancel_requested: None,
            error: None,
            strategy_used: None,
            completed_at: None,
        }
    }
}

/// Fields a subtask transition may set alongside the state change. `None`
/// leaves the field untouched.
#[derive(Debug, Clone)]
pub struct SubtaskWrite {
    pub next_state: SubtaskState,
    pub attempts: Option<u32>,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubtaskWrite {
    pub fn state_only(next_state: SubtaskState) -> Self {
        Self {
            next_state,
            attempts: None,
            worker_id: None,
            last_error: None,
            result: None,
            dispatched_at: None,
            finished_at: None,
        }
    }
}

/// Persistence boundary for the orchestration engine
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    async fn insert_run(&self, run: RunRecord) -> StoreResult<()>;

    async fn insert_subtasks(&self, subtasks: Vec<SubtaskRecord>) -> StoreResult<()>;

    async fn fetch_run(&self, run_id: RunId) -> StoreResult<Option<RunRecord>>;

    async fn fetch_subtask(&self, subtask_id: SubtaskId) -> StoreResult<Option<SubtaskRecord>>;

    /// All subtasks of a run in creation order
    async fn fetch_subtasks(&self, run_id: RunId) -> StoreResult<Vec<SubtaskRecord>>;

    /// Fenced write against a run record. The expected state is the state
    /// the writer observed when it built the write.
    async fn cas_run(
        &self,
        run_id: RunId,
        expected_state: RunState,
        presented_token: FencingToken,
        write: RunWrite,
    ) -> StoreResult<CasOutcome<RunRecord>>;

    /// Fenced write against a subtask record
    async fn cas_subtask(
        &self,
        subtask_id: SubtaskId,
        expected_state: SubtaskState,
        presented_token: FencingToken,
        write: SubtaskWrite,
    ) -> StoreResult<CasOutcome<SubtaskRecord>>;

    /// Append a worker outcome report to the run's inbox
    async fn push_outcome(&self, outcome: SubtaskOutcome) -> StoreResult<()>;

    /// Take all queued outcome reports for a run, arrival ordered
    async fn drain_outcomes(&self, run_id: RunId) -> StoreResult<Vec<SubtaskOutcome>>;

    /// Park until new outcomes may be available for the run or the timeout
    /// elapses. Returns true when activity was signaled.
    async fn await_activity(&self, run_id: RunId, timeout: std::time::Duration)
        -> StoreResult<bool>;
}
