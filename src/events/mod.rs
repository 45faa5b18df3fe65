//! # Lifecycle Events
//!
//! In-process broadcast of run and subtask lifecycle events. Observers
//! subscribe to the full firehose or to a single run; state machines and the
//! coordinator publish as transitions commit.

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, RunEventStream, RunLifecycleEvent};
