use serde::{Deserialize, Serialize};
use std::fmt;

/// Run lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Initial state when the run record is persisted
    Created,
    /// Accepted for processing, waiting for the planning phase
    Queued,
    /// Decomposition in progress
    Planning,
    /// Subtasks are being scheduled and executed
    Executing,
    /// Every subtask succeeded
    Completed,
    /// Decomposition failed, a subtask exhausted its retries, or scheduling
    /// deadlocked
    Failed,
    /// Cancellation honored
    Cancelled,
}

impl RunState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if this is an active state (work is in flight for the run)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Planning | Self::Executing)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Queued => write!(f, "queued"),
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "planning" => Ok(Self::Planning),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}

/// Subtask lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    /// Created, dependencies not yet verified
    Pending,
    /// Dependencies satisfied, waiting for scheduling capacity
    Ready,
    /// Claimed and dispatched to a worker
    Running,
    /// Worker reported success
    Succeeded,
    /// Worker reported failure; retryable until the budget is exhausted
    Failed,
    /// Never executed because an upstream dependency failed or the run was
    /// cancelled
    Skipped,
}

impl SubtaskState {
    /// Check if this is a terminal state (no further transitions allowed).
    /// `Failed` is not table-terminal; it becomes settled once the retry
    /// budget is exhausted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Check if this is an active state (a worker owns the subtask)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if this state satisfies downstream dependencies
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for SubtaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for SubtaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid subtask state: {s}")),
        }
    }
}

/// Default state for new runs
impl Default for RunState {
    fn default() -> Self {
        Self::Created
    }
}

/// Default state for new subtasks
impl Default for SubtaskState {
    fn default() -> Self {
        Self::Pending
    }
}
