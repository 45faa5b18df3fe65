//! # Subtask Worker
//!
//! Queue consumer that executes dispatched subtasks against a sandbox
//! backend and reports outcomes to the store's inbox.
//!
//! ## Key Features
//!
//! - **Tool routing**: each dispatch names a tool surface; routing is an
//!   exhaustive match over the closed tool set
//! - **Per-message timeout**: the dispatch metadata's timeout bounds the
//!   backend call on the worker side, independent of the orchestrator's
//!   authoritative sweep
//! - **Outcome reporting**: workers never write run or subtask state; they
//!   only append outcome reports for the orchestrator to reconcile

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::logging::log_subtask_operation;
use crate::messaging::{Delivery, DispatchMessage, JobQueue, SubtaskOutcome};
use crate::models::{DepthHint, ToolKind};
use crate::store::RunStore;

/// Errors raised by sandbox backends
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Tool execution failed: {reason}")]
    Execution { reason: String },
}

impl SandboxError {
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

/// What a backend needs to execute one subtask attempt
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub aspect: String,
    pub query: String,
    pub depth: Option<DepthHint>,
}

impl From<&DispatchMessage> for ToolRequest {
    fn from(message: &DispatchMessage) -> Self {
        Self {
            aspect: message.aspect.clone(),
            query: message.query.clone(),
            depth: message.depth,
        }
    }
}

/// Execution surface workers run subtasks against. One method per tool so
/// backends can wire each surface to a different isolation mechanism.
#[async_trait]
pub trait SandboxBackend: Send + Sync + 'static {
    async fn run_shell(&self, request: &ToolRequest) -> Result<Value, SandboxError>;

    async fn run_code(&self, request: &ToolRequest) -> Result<Value, SandboxError>;

    async fn run_browser(&self, request: &ToolRequest) -> Result<Value, SandboxError>;

    /// Backend name for logging
    fn name(&self) -> &str {
        "sandbox"
    }
}

/// Route a request to the backend surface its tool names.
pub async fn execute_tool(
    backend: &dyn SandboxBackend,
    tool: ToolKind,
    request: &ToolRequest,
) -> Result<Value, SandboxError> {
    match tool {
        ToolKind::Shell => backend.run_shell(request).await,
        ToolKind::Code => backend.run_code(request).await,
        ToolKind::Browser => backend.run_browser(request).await,
    }
}

/// Demonstration backend that echoes the request back as a result payload.
/// Useful for simulations and tests that exercise orchestration without a
/// real execution environment.
#[derive(Debug, Clone, Default)]
pub struct EchoSandbox {
    latency: Option<Duration>,
}

impl EchoSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate execution time per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn respond(&self, surface: &str, request: &ToolRequest) -> Result<Value, SandboxError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(json!({
            "surface": surface,
            "aspect": request.aspect,
            "query": request.query,
            "depth": request.depth.map(|d| d.to_string()),
            "summary": format!("echo({}): {}", surface, request.query),
        }))
    }
}

#[async_trait]
impl SandboxBackend for EchoSandbox {
    async fn run_shell(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond("shell", request).await
    }

    async fn run_code(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond("code", request).await
    }

    async fn run_browser(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond("browser", request).await
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Pulls dispatches from the job queue, executes them, and reports outcomes
#[derive(Clone)]
pub struct SubtaskWorker {
    id: String,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn RunStore>,
    backend: Arc<dyn SandboxBackend>,
}

impl SubtaskWorker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn RunStore>,
        backend: Arc<dyn SandboxBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            store,
            backend,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Consume dispatches until the queue stays empty for `idle_after`.
    /// Returns the number of subtasks processed.
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub async fn run_until_idle(&self, idle_after: Duration) -> crate::error::Result<usize> {
        let mut processed = 0;
        while let Some(delivery) = self.queue.dequeue(idle_after).await? {
            self.handle_delivery(delivery).await?;
            processed += 1;
        }
        debug!(worker_id = %self.id, processed = processed, "Worker going idle");
        Ok(processed)
    }

    /// Consume exactly one dispatch if one arrives within `wait`.
    pub async fn run_once(&self, wait: Duration) -> crate::error::Result<bool> {
        match self.queue.dequeue(wait).await? {
            Some(delivery) => {
                self.handle_delivery(delivery).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) -> crate::error::Result<()> {
        let Delivery { receipt, message } = delivery;
        let outcome = self.execute(&message).await;

        log_subtask_operation(
            "worker_execute",
            Some(&message.run_id.to_string()),
            Some(&message.subtask_id.to_string()),
            if outcome.disposition.is_success() {
                "success"
            } else {
                "failure"
            },
            Some(&format!(
                "attempt {} took {}ms",
                outcome.attempt, outcome.execution_time_ms
            )),
        );

        // Report before acking so a crash between the two duplicates the
        // outcome rather than losing it; duplicates are dropped downstream.
        self.store.push_outcome(outcome).await?;
        self.queue.ack(receipt).await?;
        Ok(())
    }

    async fn execute(&self, message: &DispatchMessage) -> SubtaskOutcome {
        let request = ToolRequest::from(message);
        let budget = Duration::from_millis(message.metadata.timeout_ms);
        let started = Instant::now();

        debug!(
            worker_id = %self.id,
            subtask_id = %message.subtask_id,
            tool = %message.tool,
            attempt = message.metadata.attempt,
            backend = self.backend.name(),
            "Executing subtask"
        );

        let result = timeout(budget, execute_tool(self.backend.as_ref(), message.tool, &request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(value)) => SubtaskOutcome::success(message, &self.id, value, elapsed_ms),
            Ok(Err(e)) => {
                warn!(
                    worker_id = %self.id,
                    subtask_id = %message.subtask_id,
                    error = %e,
                    "Subtask execution failed"
                );
                SubtaskOutcome::failure(message, &self.id, e.to_string(), elapsed_ms)
            }
            Err(_) => {
                warn!(
                    worker_id = %self.id,
                    subtask_id = %message.subtask_id,
                    timeout_ms = message.metadata.timeout_ms,
                    "Subtask execution timed out on the worker"
                );
                SubtaskOutcome::failure(
                    message,
                    &self.id,
                    format!("execution timed out after {}ms", message.metadata.timeout_ms),
                    elapsed_ms,
                )
            }
        }
    }
}
