//! # Subtask Model
//!
//! Subtasks are the unit of schedulable work inside a run. Each one names an
//! aspect of the decomposed prompt, the query a worker should execute, the
//! tool surface it needs, and the upstream subtasks it depends on.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fencing::FencingToken;
use crate::models::RunId;
use crate::state_machine::SubtaskState;

/// Opaque subtask identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubtaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Tool surface a subtask executes against. Closed set; routing is an
/// exhaustive match so a new capability is a compile-time change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Shell,
    Code,
    Browser,
}

impl Default for ToolKind {
    fn default() -> Self {
        ToolKind::Shell
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolKind::Shell => "shell",
            ToolKind::Code => "code",
            ToolKind::Browser => "browser",
        };
        write!(f, "{s}")
    }
}

/// How deeply a worker should pursue the subtask's query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthHint {
    Shallow,
    Moderate,
    Deep,
}

impl fmt::Display for DepthHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepthHint::Shallow => "shallow",
            DepthHint::Moderate => "moderate",
            DepthHint::Deep => "deep",
        };
        write!(f, "{s}")
    }
}

/// Decomposer output: one planned subtask before persistence. Dependencies
/// are indices into the definition sequence; they are resolved to ids when
/// the records are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskDefinition {
    /// Short label for the aspect of the prompt this subtask covers
    pub aspect: String,
    /// The concrete query or instruction a worker executes
    pub query: String,
    #[serde(default)]
    pub depth: Option<DepthHint>,
    #[serde(default)]
    pub tool: ToolKind,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// A subtask instance as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskRecord {
    pub id: SubtaskId,
    pub run_id: RunId,
    /// Position in the decomposition output; stable scheduling tie-break
    pub index: usize,
    pub aspect: String,
    pub query: String,
    pub depth: Option<DepthHint>,
    pub tool: ToolKind,
    pub priority: i32,
    pub depends_on: Vec<SubtaskId>,
    pub state: SubtaskState,
    /// Monotonic token guarding every write to this record
    pub fencing_token: FencingToken,
    /// Execution attempts consumed (incremented when the subtask is claimed)
    pub attempts: u32,
    /// Upper bound on total execution attempts, copied from the run config
    pub max_retries: u32,
    /// Identifier of the worker that reported the latest outcome
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubtaskRecord {
    /// Build a record from a resolved definition. `depends_on` must already
    /// be mapped from definition indices to subtask ids.
    pub fn new(
        run_id: RunId,
        index: usize,
        definition: &SubtaskDefinition,
        depends_on: Vec<SubtaskId>,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubtaskId::new(),
            run_id,
            index,
            aspect: definition.aspect.clone(),
            query: definition.query.clone(),
            depth: definition.depth,
            tool: definition.tool,
            priority: definition.priority,
            depends_on,
            state: SubtaskState::Pending,
            fencing_token: 0,
            attempts: 0,
            max_retries,
            worker_id: None,
            last_error: None,
            result: None,
            created_at: now,
            updated_at: now,
            dispatched_at: None,
            finished_at: None,
        }
    }

    /// Whether another execution attempt is permitted after a failure.
    /// `attempts` counts executions already consumed, so a retry is admitted
    /// only while that count is still below the attempt budget.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Settled means no further state changes are possible: terminal state,
    /// or failed with the retry budget exhausted.
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() || (self.state == SubtaskState::Failed && !self.can_retry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(aspect: &str) -> SubtaskDefinition {
        SubtaskDefinition {
            aspect: aspect.to_string(),
            query: format!("investigate {aspect}"),
            depth: None,
            tool: ToolKind::default(),
            priority: 0,
            depends_on: vec![],
        }
    }

    #[test]
    fn test_new_record_is_pending_with_zero_token() {
        let record = SubtaskRecord::new(RunId::new(), 0, &definition("pricing"), vec![], 2);
        assert_eq!(record.state, SubtaskState::Pending);
        assert_eq!(record.fencing_token, 0);
        assert_eq!(record.attempts, 0);
        assert!(record.can_retry());
        assert!(!record.is_settled());
    }

    #[test]
    fn test_retry_budget_counts_total_attempts() {
        let mut record = SubtaskRecord::new(RunId::new(), 0, &definition("history"), vec![], 3);
        // A budget of three admits exactly three executions
        record.attempts = 1;
        assert!(record.can_retry());
        record.attempts = 2;
        assert!(record.can_retry());
        record.attempts = 3;
        assert!(!record.can_retry());
    }

    #[test]
    fn test_failed_with_exhausted_budget_is_settled() {
        let mut record = SubtaskRecord::new(RunId::new(), 0, &definition("sources"), vec![], 0);
        record.state = SubtaskState::Failed;
        record.attempts = 1;
        assert!(record.is_settled());
    }

    #[test]
    fn test_tool_kind_defaults_to_shell() {
        assert_eq!(ToolKind::default(), ToolKind::Shell);
        assert_eq!(ToolKind::Browser.to_string(), "browser");
    }
}
