//! End-to-end orchestration flows over the in-memory store and queue.
//!
//! Each scenario wires a real `Orchestrator` to scripted decompositions and
//! in-process workers, then drives a run to a terminal state and inspects
//! the persisted graph. Sandbox fakes inject the failure modes the drive
//! loop has to absorb: flaky tools, dead branches, lost dispatches, and
//! mid-flight cancellation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use conductor_core::config::ConductorConfig;
use conductor_core::constants::system::TIMEOUT_SWEEP_WORKER_ID;
use conductor_core::decomposer::DecompositionStrategy;
use conductor_core::event_names;
use conductor_core::llm::ScriptedModel;
use conductor_core::messaging::{InMemoryJobQueue, JobQueue};
use conductor_core::models::{RunConfig, RunId, SubtaskRecord};
use conductor_core::orchestration::Orchestrator;
use conductor_core::state_machine::{RunState, SubtaskState};
use conductor_core::store::{InMemoryRunStore, RunStore};
use conductor_core::worker::{
    EchoSandbox, SandboxBackend, SandboxError, SubtaskWorker, ToolRequest,
};

const CHAIN_PLAN: &str = r#"[
  {"aspect": "fetch-deps", "query": "list direct dependencies", "tool": "shell"},
  {"aspect": "fetch-advisories", "query": "pull the advisory database", "tool": "browser"},
  {"aspect": "cross-reference", "query": "match dependencies against advisories", "tool": "code", "depends_on": [0, 1]}
]"#;

const BRANCHED_PLAN: &str = r#"[
  {"aspect": "fetch-metrics", "query": "pull service metrics", "tool": "code"},
  {"aspect": "fetch-logs", "query": "pull recent logs", "tool": "shell"},
  {"aspect": "diagnose", "query": "diagnose from the metrics", "tool": "code", "depends_on": [0]}
]"#;

const SINGLE_PLAN: &str = r#"[
  {"aspect": "deep-audit", "query": "audit the access logs", "tool": "code"}
]"#;

const PAIR_PLAN: &str = r#"[
  {"aspect": "scan-alpha", "query": "scan the alpha shard", "tool": "shell"},
  {"aspect": "scan-beta", "query": "scan the beta shard", "tool": "shell"}
]"#;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<InMemoryRunStore>,
    queue: Arc<InMemoryJobQueue>,
}

fn harness(script: Vec<&str>, config: ConductorConfig) -> Harness {
    let store = Arc::new(InMemoryRunStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let model = Arc::new(ScriptedModel::new(script));
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        store.clone(),
        queue.clone(),
        model,
    ));
    Harness {
        orchestrator,
        store,
        queue,
    }
}

fn fast_config() -> ConductorConfig {
    ConductorConfig {
        poll_interval_ms: 10,
        ..ConductorConfig::default()
    }
}

/// Pin the strategy so the scripted model only has to answer the
/// decomposition request.
fn pinned_run_config() -> RunConfig {
    RunConfig {
        strategy: Some(DecompositionStrategy::DimensionBased),
        ..RunConfig::default()
    }
}

fn spawn_worker(
    harness: &Harness,
    id: &str,
    backend: Arc<dyn SandboxBackend>,
) -> tokio::task::JoinHandle<conductor_core::Result<usize>> {
    let worker = SubtaskWorker::new(
        id,
        harness.queue.clone() as Arc<dyn JobQueue>,
        harness.store.clone() as Arc<dyn RunStore>,
        backend,
    );
    tokio::spawn(async move { worker.run_until_idle(Duration::from_millis(400)).await })
}

/// Collect lifecycle event names for one run until its terminal event.
fn collect_events(
    harness: &Harness,
    run_id: RunId,
) -> tokio::task::JoinHandle<Vec<String>> {
    let mut stream = harness.orchestrator.event_publisher().subscribe_run(run_id);
    tokio::spawn(async move {
        let mut names = Vec::new();
        while let Some(event) = stream.next().await {
            names.push(event.name);
        }
        names
    })
}

fn find_aspect<'a>(subtasks: &'a [SubtaskRecord], aspect: &str) -> &'a SubtaskRecord {
    subtasks
        .iter()
        .find(|s| s.aspect == aspect)
        .unwrap_or_else(|| panic!("no subtask with aspect {aspect}"))
}

/// Echoes like `EchoSandbox` but remembers the order aspects executed in.
struct RecordingSandbox {
    seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingSandbox {
    fn respond(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.seen.lock().push(request.aspect.clone());
        Ok(json!({ "aspect": request.aspect }))
    }
}

#[async_trait]
impl SandboxBackend for RecordingSandbox {
    async fn run_shell(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    async fn run_code(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    async fn run_browser(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails the first `failures_remaining` calls, then succeeds.
struct FlakySandbox {
    failures_remaining: AtomicU32,
}

impl FlakySandbox {
    fn failing(times: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
        }
    }

    fn respond(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        let inject = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            Err(SandboxError::execution("synthetic fault injected"))
        } else {
            Ok(json!({ "aspect": request.aspect, "recovered": true }))
        }
    }
}

#[async_trait]
impl SandboxBackend for FlakySandbox {
    async fn run_shell(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    async fn run_code(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    async fn run_browser(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    fn name(&self) -> &str {
        "flaky"
    }
}

/// Fails every call whose aspect matches; succeeds on everything else.
struct SelectiveSandbox {
    failing_aspect: &'static str,
}

impl SelectiveSandbox {
    fn respond(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        if request.aspect == self.failing_aspect {
            Err(SandboxError::execution(format!(
                "{} is unreachable",
                self.failing_aspect
            )))
        } else {
            Ok(json!({ "aspect": request.aspect }))
        }
    }
}

#[async_trait]
impl SandboxBackend for SelectiveSandbox {
    async fn run_shell(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    async fn run_code(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    async fn run_browser(&self, request: &ToolRequest) -> Result<Value, SandboxError> {
        self.respond(request)
    }
    fn name(&self) -> &str {
        "selective"
    }
}

#[tokio::test]
async fn test_dependency_chain_completes_in_order() {
    let h = harness(vec![CHAIN_PLAN], fast_config());
    let run = h
        .orchestrator
        .create_run_with_config("audit dependency health", pinned_run_config())
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let backend = Arc::new(RecordingSandbox { seen: seen.clone() });
    let worker_a = spawn_worker(&h, "worker-a", backend.clone());
    let worker_b = spawn_worker(&h, "worker-b", backend);

    let finished = h.orchestrator.drive(run.id).await.unwrap();
    assert_eq!(finished.state, RunState::Completed);
    assert!(finished.completed_at.is_some());

    let processed =
        worker_a.await.unwrap().unwrap() + worker_b.await.unwrap().unwrap();
    assert_eq!(processed, 3);

    let order = seen.lock().clone();
    assert_eq!(order.len(), 3);
    assert_eq!(order.last().map(String::as_str), Some("cross-reference"));

    let subtasks = h.store.fetch_subtasks(run.id).await.unwrap();
    for subtask in &subtasks {
        assert_eq!(subtask.state, SubtaskState::Succeeded);
        assert!(subtask.result.is_some());
    }

    let progress = h.orchestrator.get_progress(run.id).await.unwrap();
    assert_eq!(progress.progress.succeeded, 3);
    assert!((progress.progress.percent_complete - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_flaky_subtask_retries_and_completes() {
    let h = harness(vec![SINGLE_PLAN], fast_config());
    let run = h
        .orchestrator
        .create_run_with_config("audit access logs", pinned_run_config())
        .await
        .unwrap();
    let events = collect_events(&h, run.id);

    let worker = spawn_worker(&h, "worker-1", Arc::new(FlakySandbox::failing(1)));

    let finished = h.orchestrator.drive(run.id).await.unwrap();
    assert_eq!(finished.state, RunState::Completed);

    let subtasks = h.store.fetch_subtasks(run.id).await.unwrap();
    let audit = find_aspect(&subtasks, "deep-audit");
    assert_eq!(audit.state, SubtaskState::Succeeded);
    assert_eq!(audit.attempts, 2);
    assert_eq!(audit.result, Some(json!({ "aspect": "deep-audit", "recovered": true })));
    // The first attempt's error is retained as history
    assert_eq!(
        audit.last_error.as_deref(),
        Some("Tool execution failed: synthetic fault injected")
    );

    let names = events.await.unwrap();
    assert!(names.iter().any(|n| n == event_names::SUBTASK_RETRYING));
    assert!(names.iter().any(|n| n == event_names::RUN_COMPLETED));

    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_exhausted_branch_skips_dependents_and_fails_run() {
    let h = harness(vec![BRANCHED_PLAN], fast_config());
    let config = RunConfig {
        worker_max_retries: 0,
        ..pinned_run_config()
    };
    let run = h
        .orchestrator
        .create_run_with_config("diagnose the checkout service", config)
        .await
        .unwrap();

    let backend = Arc::new(SelectiveSandbox {
        failing_aspect: "fetch-metrics",
    });
    let worker = spawn_worker(&h, "worker-1", backend);

    let finished = h.orchestrator.drive(run.id).await.unwrap();
    assert_eq!(finished.state, RunState::Failed);
    assert_eq!(finished.error.as_deref(), Some("1 of 3 subtasks failed"));

    let subtasks = h.store.fetch_subtasks(run.id).await.unwrap();
    assert_eq!(
        find_aspect(&subtasks, "fetch-metrics").state,
        SubtaskState::Failed
    );
    assert_eq!(
        find_aspect(&subtasks, "fetch-logs").state,
        SubtaskState::Succeeded
    );

    let diagnose = find_aspect(&subtasks, "diagnose");
    assert_eq!(diagnose.state, SubtaskState::Skipped);
    let reason = diagnose.last_error.as_deref().unwrap_or_default();
    assert!(reason.contains("fetch-metrics"), "reason was {reason:?}");

    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancellation_drains_running_work_then_cancels() {
    let h = harness(vec![PAIR_PLAN], fast_config());
    let config = RunConfig {
        concurrency_limit: 1,
        ..pinned_run_config()
    };
    let run = h
        .orchestrator
        .create_run_with_config("scan both shards", config)
        .await
        .unwrap();

    let slow = EchoSandbox::new().with_latency(Duration::from_millis(250));
    let worker = spawn_worker(&h, "worker-1", Arc::new(slow));

    let driver = {
        let orchestrator = h.orchestrator.clone();
        let run_id = run.id;
        tokio::spawn(async move { orchestrator.drive(run_id).await })
    };

    // Let the first shard start executing, then cancel mid-flight
    tokio::time::sleep(Duration::from_millis(80)).await;
    h.orchestrator.cancel_run(run.id).await.unwrap();

    let finished = driver.await.unwrap().unwrap();
    assert_eq!(finished.state, RunState::Cancelled);
    assert!(finished.completed_at.is_some());

    let subtasks = h.store.fetch_subtasks(run.id).await.unwrap();
    let states: Vec<SubtaskState> = subtasks.iter().map(|s| s.state).collect();
    assert!(states.contains(&SubtaskState::Succeeded), "states: {states:?}");
    assert!(states.contains(&SubtaskState::Skipped), "states: {states:?}");

    let skipped = subtasks
        .iter()
        .find(|s| s.state == SubtaskState::Skipped)
        .unwrap();
    assert_eq!(skipped.last_error.as_deref(), Some("run cancelled"));

    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_timeout_sweep_recovers_lost_dispatch() {
    let h = harness(vec![SINGLE_PLAN], fast_config());
    let config = RunConfig {
        subtask_timeout_ms: 60,
        ..pinned_run_config()
    };
    let run = h
        .orchestrator
        .create_run_with_config("audit access logs", config)
        .await
        .unwrap();
    let events = collect_events(&h, run.id);

    // Dispatch with no worker listening, then let the deadline lapse
    h.orchestrator.start_run(run.id).await.unwrap();
    let report = h.orchestrator.run_scheduling_pass(run.id).await.unwrap();
    assert_eq!(report.dispatched, 1);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let swept = h.orchestrator.sweep_timeouts(run.id).await.unwrap();
    assert_eq!(swept, 1);

    let worker = spawn_worker(&h, "worker-late", Arc::new(EchoSandbox::new()));
    let finished = h.orchestrator.drive(run.id).await.unwrap();
    assert_eq!(finished.state, RunState::Completed);

    let subtasks = h.store.fetch_subtasks(run.id).await.unwrap();
    let audit = find_aspect(&subtasks, "deep-audit");
    assert_eq!(audit.state, SubtaskState::Succeeded);
    assert_eq!(audit.attempts, 2);
    assert_ne!(audit.worker_id.as_deref(), Some(TIMEOUT_SWEEP_WORKER_ID));
    assert!(audit
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("no outcome within"));

    let names = events.await.unwrap();
    assert!(names.iter().any(|n| n == event_names::SUBTASK_RETRYING));

    // The late worker drains both the stale dispatch and the retry
    let processed = worker.await.unwrap().unwrap();
    assert_eq!(processed, 2);
}

#[tokio::test]
async fn test_concurrent_runs_stay_isolated() {
    let h = harness(vec![PAIR_PLAN, PAIR_PLAN], fast_config());
    let run_a = h
        .orchestrator
        .create_run_with_config("scan shards for tenant a", pinned_run_config())
        .await
        .unwrap();
    let run_b = h
        .orchestrator
        .create_run_with_config("scan shards for tenant b", pinned_run_config())
        .await
        .unwrap();

    let backend: Arc<dyn SandboxBackend> = Arc::new(EchoSandbox::new());
    let worker_a = spawn_worker(&h, "worker-a", backend.clone());
    let worker_b = spawn_worker(&h, "worker-b", backend);

    let events_a = collect_events(&h, run_a.id);

    let driver_a = {
        let orchestrator = h.orchestrator.clone();
        let run_id = run_a.id;
        tokio::spawn(async move { orchestrator.drive(run_id).await })
    };
    let driver_b = {
        let orchestrator = h.orchestrator.clone();
        let run_id = run_b.id;
        tokio::spawn(async move { orchestrator.drive(run_id).await })
    };

    let finished_a = driver_a.await.unwrap().unwrap();
    let finished_b = driver_b.await.unwrap().unwrap();
    assert_eq!(finished_a.state, RunState::Completed);
    assert_eq!(finished_b.state, RunState::Completed);

    for run_id in [run_a.id, run_b.id] {
        let subtasks = h.store.fetch_subtasks(run_id).await.unwrap();
        assert_eq!(subtasks.len(), 2);
        for subtask in &subtasks {
            assert_eq!(subtask.run_id, run_id);
            assert_eq!(subtask.state, SubtaskState::Succeeded);
        }
    }

    // The per-run stream only carries run A's events
    let names = events_a.await.unwrap();
    let succeeded = names
        .iter()
        .filter(|n| *n == event_names::SUBTASK_SUCCEEDED)
        .count();
    assert_eq!(succeeded, 2);

    let processed =
        worker_a.await.unwrap().unwrap() + worker_b.await.unwrap().unwrap();
    assert_eq!(processed, 4);
}
