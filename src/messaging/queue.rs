//! # Job Queue
//!
//! Dispatch transport between the orchestrator and workers. The trait keeps
//! the transport swappable; the in-memory implementation backs tests, the
//! demo binary, and single-process deployments.
//!
//! Delivery discipline: a dequeued message stays invisible until the worker
//! acks it. A worker that cannot finish requeues the delivery instead, which
//! returns the message to the ready pool.

use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::message::DispatchMessage;

/// Queue operation errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Unknown delivery receipt: {receipt}")]
    UnknownReceipt { receipt: u64 },

    #[error("Queue operation failed: {operation}: {message}")]
    Operation { operation: String, message: String },
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Handle identifying one in-flight delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryReceipt(pub u64);

/// A dequeued message together with its delivery handle
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: DeliveryReceipt,
    pub message: DispatchMessage,
}

/// Transport carrying dispatch messages from the orchestrator to workers
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Make a message available to workers
    async fn enqueue(&self, message: DispatchMessage) -> QueueResult<()>;

    /// Take the highest-priority ready message, waiting up to `wait` for one
    /// to arrive. Returns `None` on timeout.
    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>>;

    /// Acknowledge a delivery, removing the message permanently
    async fn ack(&self, receipt: DeliveryReceipt) -> QueueResult<()>;

    /// Return an in-flight delivery to the ready pool
    async fn requeue(&self, receipt: DeliveryReceipt) -> QueueResult<()>;

    /// Messages currently ready for dequeue
    async fn ready_len(&self) -> QueueResult<usize>;
}

/// Priority-ordered entry; equal priorities dequeue in arrival order.
#[derive(Debug)]
struct ReadyEntry {
    priority: i32,
    sequence: u64,
    message: DispatchMessage,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier arrival
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    ready: BinaryHeap<ReadyEntry>,
    in_flight: HashMap<u64, DispatchMessage>,
    next_sequence: u64,
    next_receipt: u64,
}

/// In-process job queue on tokio primitives
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_take(&self) -> Option<Delivery> {
        let mut inner = self.inner.lock();
        let entry = inner.ready.pop()?;
        inner.next_receipt += 1;
        let receipt = inner.next_receipt;
        inner.in_flight.insert(receipt, entry.message.clone());
        Some(Delivery {
            receipt: DeliveryReceipt(receipt),
            message: entry.message,
        })
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, message: DispatchMessage) -> QueueResult<()> {
        {
            let mut inner = self.inner.lock();
            inner.next_sequence += 1;
            let sequence = inner.next_sequence;
            debug!(
                subtask_id = %message.subtask_id,
                priority = message.metadata.priority,
                "Enqueued dispatch message"
            );
            inner.ready.push(ReadyEntry {
                priority: message.metadata.priority,
                sequence,
                message,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_take() {
                return Ok(Some(delivery));
            }
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // One last check covers a message enqueued between the poll
                // and the timeout
                return Ok(self.try_take());
            }
        }
    }

    async fn ack(&self, receipt: DeliveryReceipt) -> QueueResult<()> {
        let mut inner = self.inner.lock();
        if inner.in_flight.remove(&receipt.0).is_none() {
            return Err(QueueError::UnknownReceipt { receipt: receipt.0 });
        }
        Ok(())
    }

    async fn requeue(&self, receipt: DeliveryReceipt) -> QueueResult<()> {
        let message = {
            let mut inner = self.inner.lock();
            inner
                .in_flight
                .remove(&receipt.0)
                .ok_or(QueueError::UnknownReceipt { receipt: receipt.0 })?
        };
        warn!(
            subtask_id = %message.subtask_id,
            "Delivery requeued without an outcome"
        );
        self.enqueue(message).await
    }

    async fn ready_len(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().ready.len())
    }
}
