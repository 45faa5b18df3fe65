#![allow(clippy::doc_markdown)] // Allow technical terms like JSON, LLM in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conductor Core
//!
//! Orchestration core for asynchronous AI-agent jobs: one prompt decomposed
//! by a language model into a dependency graph of subtasks, dispatched to
//! sandboxed workers, and driven to a terminal state.
//!
//! ## Overview
//!
//! A run moves through `created → queued → planning → executing` and ends
//! in `completed`, `failed`, or `cancelled`. Planning asks a language model
//! to split the prompt into subtasks; execution schedules those subtasks by
//! dependency order and priority, dispatches them over a job queue, and
//! reconciles whatever the workers report back.
//!
//! ## Architecture
//!
//! State lives in a [`store::RunStore`]; every lifecycle write goes through
//! a state machine that pairs a transition-table check with a fenced
//! compare-and-set, so concurrent orchestrators, duplicate deliveries, and
//! zombie workers cannot corrupt a record. The scheduler and finalizer are
//! pure decision functions over store snapshots; the drive loop applies
//! their decisions and re-reads.
//!
//! ## Module Organization
//!
//! - [`models`] - Run, subtask, and progress records
//! - [`state_machine`] - Run and subtask lifecycles with fenced writes
//! - [`fencing`] - Monotonic token issuance for stale-writer rejection
//! - [`decomposer`] - LLM-backed prompt decomposition
//! - [`scheduler`] - Dependency-aware subtask selection
//! - [`orchestration`] - The orchestrator and its drive loop
//! - [`messaging`] - Dispatch messages and the job queue transport
//! - [`worker`] - Queue-consuming subtask executor
//! - [`store`] - Persistence trait and the in-memory implementation
//! - [`events`] - Lifecycle and progress event broadcasting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use conductor_core::config::ConductorConfig;
//! use conductor_core::llm::ScriptedModel;
//! use conductor_core::messaging::InMemoryJobQueue;
//! use conductor_core::orchestration::Orchestrator;
//! use conductor_core::store::InMemoryRunStore;
//! use conductor_core::worker::{EchoSandbox, SubtaskWorker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryRunStore::new());
//! let queue = Arc::new(InMemoryJobQueue::new());
//! // One response for strategy inference, one for the decomposition
//! let model = Arc::new(ScriptedModel::new([
//!     "dimension_based",
//!     r#"[{"aspect": "overview", "query": "survey the landscape"}]"#,
//! ]));
//!
//! let orchestrator = Orchestrator::new(
//!     ConductorConfig::default(),
//!     store.clone(),
//!     queue.clone(),
//!     model,
//! );
//!
//! let worker = SubtaskWorker::new("worker-1", queue, store, Arc::new(EchoSandbox::new()));
//! tokio::spawn(async move { worker.run_until_idle(Duration::from_secs(2)).await });
//!
//! let run = orchestrator.create_run("research rust async runtimes").await?;
//! let finished = orchestrator.drive(run.id).await?;
//! println!("run ended {}", finished.state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod decomposer;
pub mod error;
pub mod events;
pub mod fencing;
pub mod llm;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod worker;

pub use config::ConductorConfig;
pub use constants::{status_groups, system};
// Re-export constants events with a distinct name; `events` is the module
pub use constants::events as event_names;
pub use error::{ConductorError, Result, ValidationError};
pub use orchestration::{OrchestrationError, OrchestrationResult, Orchestrator};
