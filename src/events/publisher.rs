use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::{RunId, RunProgress, SubtaskId};

/// High-throughput publisher for run lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<RunLifecycleEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, Serialize)]
pub struct RunLifecycleEvent {
    pub name: String,
    pub run_id: RunId,
    pub subtask_id: Option<SubtaskId>,
    pub payload: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
    /// Marks the run's final event; per-run subscriptions end after it
    pub terminal: bool,
}

impl RunLifecycleEvent {
    pub fn new(name: impl Into<String>, run_id: RunId) -> Self {
        Self {
            name: name.into(),
            run_id,
            subtask_id: None,
            payload: Value::Null,
            published_at: chrono::Utc::now(),
            terminal: false,
        }
    }

    pub fn with_subtask(mut self, subtask_id: SubtaskId) -> Self {
        self.subtask_id = Some(subtask_id);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a lifecycle event
    pub async fn publish(&self, event: RunLifecycleEvent) -> Result<(), PublishError> {
        // For broadcast channels, send() returns an error if there are no subscribers
        // In our case, this is acceptable - we want to publish events even if no one is listening
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => {
                // No subscribers - this is acceptable for event publishing
                Ok(())
            }
        }
    }

    /// Publish a progress snapshot for a run
    pub async fn publish_progress(
        &self,
        run_id: RunId,
        progress: &RunProgress,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_value(progress)?;
        self.publish(
            RunLifecycleEvent::new(crate::constants::events::RUN_PROGRESS, run_id)
                .with_payload(payload),
        )
        .await
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<RunLifecycleEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a single run's events. The stream ends after the run's
    /// terminal event.
    pub fn subscribe_run(&self, run_id: RunId) -> RunEventStream {
        RunEventStream {
            run_id,
            receiver: self.sender.subscribe(),
            finished: false,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024) // Default channel capacity of 1024 events
    }
}

/// Per-run event subscription. Yields only the run's events and finishes
/// once a terminal event is observed.
pub struct RunEventStream {
    run_id: RunId,
    receiver: broadcast::Receiver<RunLifecycleEvent>,
    finished: bool,
}

impl RunEventStream {
    /// Await the run's next event; `None` once the run is finished or the
    /// publisher is gone.
    pub async fn next(&mut self) -> Option<RunLifecycleEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.run_id == self.run_id => {
                    if event.terminal {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        run_id = %self.run_id,
                        skipped = skipped,
                        "Event subscriber lagged; dropped events"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
