//! # Message Structures for Subtask Dispatch
//!
//! Wire formats exchanged between the orchestrator and workers: dispatch
//! messages flowing out through the job queue and outcome reports flowing
//! back through the store's outcome inbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DepthHint, RunId, SubtaskId, ToolKind};

/// Message dispatching one claimed subtask to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    /// Unique message identifier
    pub message_id: Uuid,
    pub run_id: RunId,
    pub subtask_id: SubtaskId,
    /// Aspect label for logging and worker-side routing
    pub aspect: String,
    /// The query the worker executes
    pub query: String,
    pub tool: ToolKind,
    pub depth: Option<DepthHint>,
    /// Message metadata
    pub metadata: DispatchMetadata,
}

/// Metadata for dispatch messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMetadata {
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// Execution attempt this dispatch represents (1-based)
    pub attempt: u32,
    /// Upper bound on total execution attempts for the subtask
    pub max_retries: u32,
    /// Execution timeout in milliseconds
    pub timeout_ms: u64,
    /// Correlation ID for tracking
    pub correlation_id: Option<String>,
    /// Priority level (higher number = higher priority)
    pub priority: i32,
}

impl Default for DispatchMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            attempt: 1,
            max_retries: 2,
            timeout_ms: 300_000, // 5 minutes
            correlation_id: Some(Uuid::new_v4().to_string()),
            priority: 0,
        }
    }
}

impl DispatchMessage {
    /// Create a new dispatch message
    pub fn new(
        run_id: RunId,
        subtask_id: SubtaskId,
        aspect: impl Into<String>,
        query: impl Into<String>,
        tool: ToolKind,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            run_id,
            subtask_id,
            aspect: aspect.into(),
            query: query.into(),
            tool,
            depth: None,
            metadata: DispatchMetadata::default(),
        }
    }

    /// Create a dispatch message with custom metadata
    pub fn with_metadata(mut self, metadata: DispatchMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_depth(mut self, depth: Option<DepthHint>) -> Self {
        self.depth = depth;
        self
    }

    /// Convert to JSON for queue storage
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Create from JSON from queue
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }

    /// Check if this dispatch is the last permitted attempt
    pub fn is_final_attempt(&self) -> bool {
        self.metadata.attempt >= self.metadata.max_retries
    }
}

/// What a worker reports back about one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutcomeDisposition {
    Success { result: serde_json::Value },
    Failure { error: String },
}

impl OutcomeDisposition {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Outcome report for one subtask execution attempt. Pushed by workers into
/// the store's outcome inbox and drained by the orchestrator, which applies
/// the matching state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutcome {
    pub run_id: RunId,
    pub subtask_id: SubtaskId,
    /// Identifier of the reporting worker
    pub worker_id: String,
    /// Execution attempt this outcome belongs to, echoed from the dispatch
    pub attempt: u32,
    pub disposition: OutcomeDisposition,
    /// Wall-clock execution time observed by the worker
    pub execution_time_ms: u64,
    pub reported_at: DateTime<Utc>,
}

impl SubtaskOutcome {
    /// Create a successful outcome report
    pub fn success(
        message: &DispatchMessage,
        worker_id: impl Into<String>,
        result: serde_json::Value,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            run_id: message.run_id,
            subtask_id: message.subtask_id,
            worker_id: worker_id.into(),
            attempt: message.metadata.attempt,
            disposition: OutcomeDisposition::Success { result },
            execution_time_ms,
            reported_at: Utc::now(),
        }
    }

    /// Create a failure outcome report
    pub fn failure(
        message: &DispatchMessage,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            run_id: message.run_id,
            subtask_id: message.subtask_id,
            worker_id: worker_id.into(),
            attempt: message.metadata.attempt,
            disposition: OutcomeDisposition::Failure {
                error: error.into(),
            },
            execution_time_ms,
            reported_at: Utc::now(),
        }
    }
}
