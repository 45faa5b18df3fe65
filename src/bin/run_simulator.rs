//! End-to-end demonstration of the orchestration core.
//!
//! Seeds a scripted language model with a canned decomposition, starts a
//! small in-process worker fleet against the in-memory queue, and drives one
//! run from prompt to terminal state, printing the subtask graph as it
//! settles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use conductor_core::config::ConductorConfig;
use conductor_core::llm::ScriptedModel;
use conductor_core::logging::init_structured_logging;
use conductor_core::messaging::{InMemoryJobQueue, JobQueue};
use conductor_core::orchestration::Orchestrator;
use conductor_core::store::{InMemoryRunStore, RunStore};
use conductor_core::worker::{EchoSandbox, SubtaskWorker};

const PROMPT: &str = "Research the health of the payments service: recent deploys, \
                      error rates, open incidents, and oncall load";

/// Strategy answer followed by the decomposition the model "produces".
const STRATEGY_ANSWER: &str = "dimension_based";
const DECOMPOSITION: &str = r#"[
  {"aspect": "recent-deploys", "query": "list deploys to payments in the last 7 days", "tool": "shell", "priority": 5},
  {"aspect": "error-rates", "query": "pull 5xx rates for payments endpoints", "tool": "code", "priority": 5},
  {"aspect": "open-incidents", "query": "search the incident tracker for payments", "tool": "browser", "priority": 3},
  {"aspect": "oncall-load", "query": "count pages to the payments oncall this week", "tool": "code", "priority": 2},
  {"aspect": "correlate-deploys-errors", "query": "correlate deploy times with error spikes", "tool": "code", "depth": "deep", "depends_on": [0, 1]},
  {"aspect": "summary", "query": "synthesize findings into a health report", "tool": "code", "depends_on": [2, 3, 4]}
]"#;

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();

    let store: Arc<InMemoryRunStore> = Arc::new(InMemoryRunStore::new());
    let queue: Arc<InMemoryJobQueue> = Arc::new(InMemoryJobQueue::new());
    let model = Arc::new(ScriptedModel::new([STRATEGY_ANSWER, DECOMPOSITION]));

    let config = ConductorConfig {
        poll_interval_ms: 50,
        ..ConductorConfig::from_env()?
    };
    let orchestrator = Orchestrator::new(config, store.clone(), queue.clone(), model);

    // Two workers with simulated execution latency
    let mut worker_handles = Vec::new();
    for worker_index in 0..2 {
        let worker = SubtaskWorker::new(
            format!("sim-worker-{worker_index}"),
            queue.clone() as Arc<dyn JobQueue>,
            store.clone() as Arc<dyn RunStore>,
            Arc::new(EchoSandbox::new().with_latency(Duration::from_millis(120))),
        );
        worker_handles.push(tokio::spawn(async move {
            worker.run_until_idle(Duration::from_millis(500)).await
        }));
    }

    let run = orchestrator.create_run(PROMPT).await?;
    info!(run_id = %run.id, "simulation run created");

    let mut events = orchestrator.event_publisher().subscribe_run(run.id);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            info!(
                event = %event.name,
                subtask_id = event.subtask_id.map(|id| id.to_string()),
                "lifecycle event"
            );
        }
    });

    let finished = orchestrator.drive(run.id).await?;
    printer.await?;
    for handle in worker_handles {
        let processed = handle.await??;
        info!(processed = processed, "worker drained");
    }

    let status = orchestrator.get_status(run.id).await?;
    println!("\nrun {} finished: {}", finished.id, finished.state);
    if let Some(strategy) = finished.strategy_used {
        println!("decomposition strategy: {strategy}");
    }
    println!(
        "progress: {:.0}% ({} succeeded, {} failed, {} skipped of {})",
        status.progress.percent_complete,
        status.progress.succeeded,
        status.progress.failed,
        status.progress.skipped,
        status.progress.total,
    );
    for subtask in &status.subtasks {
        println!(
            "  [{}] {:<26} {:<9} attempts={}",
            subtask.index, subtask.aspect, subtask.state, subtask.attempts
        );
    }

    Ok(())
}
