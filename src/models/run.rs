//! # Run Model
//!
//! A run is the top-level orchestration unit: one user prompt decomposed into
//! a dependency graph of subtasks and driven to a terminal state.
//!
//! ## Overview
//!
//! `RunRecord` carries the prompt, the per-run configuration, the lifecycle
//! state, and the fencing token that serializes concurrent writers. State is
//! never mutated directly; the run state machine applies transitions through
//! compare-and-swap writes against the store.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::system::MAX_SUBTASKS_HARD_CAP;
use crate::decomposer::DecompositionStrategy;
use crate::error::ValidationError;
use crate::fencing::FencingToken;
use crate::state_machine::RunState;

/// Opaque run identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Per-run execution knobs. Seeded from engine defaults, overridable per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Ceiling on subtasks produced by decomposition
    pub max_subtasks: usize,
    /// Maximum subtasks in the `running` state at once
    pub concurrency_limit: usize,
    /// Per-subtask execution timeout in milliseconds
    pub subtask_timeout_ms: u64,
    /// Cap on execution attempts per subtask before a failure is terminal
    pub worker_max_retries: u32,
    /// Decomposition strategy; `None` lets the language model infer one
    pub strategy: Option<DecompositionStrategy>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_subtasks: 16,
            concurrency_limit: 4,
            subtask_timeout_ms: 300_000, // 5 minutes
            worker_max_retries: 2,
            strategy: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_subtasks == 0 {
            return Err(ValidationError::ZeroValue {
                field: "max_subtasks",
            });
        }
        if self.max_subtasks > MAX_SUBTASKS_HARD_CAP {
            return Err(ValidationError::SubtaskCount {
                count: self.max_subtasks,
                max: MAX_SUBTASKS_HARD_CAP,
            });
        }
        if self.concurrency_limit == 0 {
            return Err(ValidationError::ZeroValue {
                field: "concurrency_limit",
            });
        }
        if self.subtask_timeout_ms == 0 {
            return Err(ValidationError::ZeroValue {
                field: "subtask_timeout_ms",
            });
        }
        Ok(())
    }

    pub fn subtask_timeout(&self) -> Duration {
        Duration::from_millis(self.subtask_timeout_ms)
    }
}

/// A run instance as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub prompt: String,
    pub config: RunConfig,
    pub state: RunState,
    /// Monotonic token guarding every write to this record
    pub fencing_token: FencingToken,
    /// Set by cancellation requests; honored at scheduling pass boundaries
    pub cancel_requested: bool,
    /// Strategy actually used for decomposition, recorded once planning ends
    pub strategy_used: Option<DecompositionStrategy>,
    /// Terminal error description for failed runs
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(prompt: impl Into<String>, config: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            prompt: prompt.into(),
            config,
            state: RunState::Created,
            fencing_token: 0,
            cancel_requested: false,
            strategy_used: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
