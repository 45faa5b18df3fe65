//! Engine-level configuration with environment variable overrides.
//!
//! Per-run knobs live in [`crate::models::RunConfig`]; this type holds the
//! defaults those knobs inherit plus the drive-loop tuning values.

use thiserror::Error;

use crate::models::RunConfig;

#[derive(Debug, Clone, Error)]
#[error("Configuration error: {0}")]
pub struct ConfigurationError(pub String);

#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Default ceiling on subtasks produced by decomposition
    pub max_subtasks: usize,
    /// Default per-run concurrency limit
    pub concurrency_limit: usize,
    /// Default per-subtask execution timeout in milliseconds
    pub subtask_timeout_ms: u64,
    /// Default cap on execution attempts per subtask; a failure below the
    /// cap returns the subtask to pending
    pub worker_max_retries: u32,
    /// Drive loop idle tick in milliseconds
    pub poll_interval_ms: u64,
    /// Consecutive no-progress passes before a run is failed as deadlocked
    pub stall_pass_limit: u32,
    /// Broadcast channel capacity for lifecycle events
    pub event_channel_capacity: usize,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_subtasks: 16,
            concurrency_limit: 4,
            subtask_timeout_ms: 300_000, // 5 minutes
            worker_max_retries: 2,
            poll_interval_ms: 250,
            stall_pass_limit: 3,
            event_channel_capacity: 1024,
        }
    }
}

impl ConductorConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Ok(max_subtasks) = std::env::var("CONDUCTOR_MAX_SUBTASKS") {
            config.max_subtasks = max_subtasks
                .parse()
                .map_err(|e| ConfigurationError(format!("Invalid max_subtasks: {e}")))?;
        }

        if let Ok(concurrency) = std::env::var("CONDUCTOR_CONCURRENCY_LIMIT") {
            config.concurrency_limit = concurrency
                .parse()
                .map_err(|e| ConfigurationError(format!("Invalid concurrency_limit: {e}")))?;
        }

        if let Ok(timeout_ms) = std::env::var("CONDUCTOR_SUBTASK_TIMEOUT_MS") {
            config.subtask_timeout_ms = timeout_ms
                .parse()
                .map_err(|e| ConfigurationError(format!("Invalid subtask_timeout_ms: {e}")))?;
        }

        if let Ok(max_retries) = std::env::var("CONDUCTOR_WORKER_MAX_RETRIES") {
            config.worker_max_retries = max_retries
                .parse()
                .map_err(|e| ConfigurationError(format!("Invalid worker_max_retries: {e}")))?;
        }

        if let Ok(poll_interval) = std::env::var("CONDUCTOR_POLL_INTERVAL_MS") {
            config.poll_interval_ms = poll_interval
                .parse()
                .map_err(|e| ConfigurationError(format!("Invalid poll_interval_ms: {e}")))?;
        }

        if let Ok(stall_limit) = std::env::var("CONDUCTOR_STALL_PASS_LIMIT") {
            config.stall_pass_limit = stall_limit
                .parse()
                .map_err(|e| ConfigurationError(format!("Invalid stall_pass_limit: {e}")))?;
        }

        if let Ok(capacity) = std::env::var("CONDUCTOR_EVENT_CHANNEL_CAPACITY") {
            config.event_channel_capacity = capacity
                .parse()
                .map_err(|e| ConfigurationError(format!("Invalid event_channel_capacity: {e}")))?;
        }

        Ok(config)
    }

    /// Run configuration seeded from the engine defaults.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            max_subtasks: self.max_subtasks,
            concurrency_limit: self.concurrency_limit,
            subtask_timeout_ms: self.subtask_timeout_ms,
            worker_max_retries: self.worker_max_retries,
            strategy: None,
        }
    }
}
