//! # Messaging Module
//!
//! Queue-based dispatch between the orchestrator and subtask workers:
//! message formats plus the job queue transport trait and its in-memory
//! implementation.

pub mod message;
pub mod queue;

pub use message::*;
pub use queue::*;
