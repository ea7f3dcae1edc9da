// crates/layerruntime/tests/coordinator_test.rs

use async_trait::async_trait;
use layercore::{
    EdgeSpec, NodeContext, NodeError, NodeExecutor, NodeSpec, NodeStatus, RepositoryError,
    StatusReporter, Subscription, WorkflowError, WorkflowEvent,
};
use layerruntime::{
    ExecutionCoordinator, ExecutionRepository, ExecutionSnapshot, ExecutorRegistry,
    InMemoryRepository, LayerRuntime, RuntimeConfig, SessionState,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};

/// Sleeps for `ms` (config), aborting early on cancellation
struct Sleep {
    dispatched: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeExecutor for Sleep {
    fn node_type(&self) -> &str {
        "test.sleep"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        self.dispatched.lock().unwrap().push(ctx.node_id.clone());
        let ms = ctx.config.get("ms").and_then(Value::as_u64).unwrap_or(0);
        if ms == 0 {
            return Ok(json!({ "slept": 0 }));
        }

        tokio::select! {
            _ = sleep(Duration::from_millis(ms)) => Ok(json!({ "slept": ms })),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

/// Always fails after an optional delay
struct Fail {
    dispatched: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeExecutor for Fail {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        self.dispatched.lock().unwrap().push(ctx.node_id.clone());
        let ms = ctx.config.get("ms").and_then(Value::as_u64).unwrap_or(0);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
        Err(NodeError::ExecutionFailed("simulated outage".into()))
    }
}

/// Reports what it could see of earlier layers
struct Inspect;

#[async_trait]
impl NodeExecutor for Inspect {
    fn node_type(&self) -> &str {
        "test.inspect"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let prior: Vec<&String> = ctx.prior_results.keys().collect();
        let upstream: Vec<&Value> = ctx.upstream_results().map(|r| &r.output).collect();
        Ok(json!({ "prior": prior, "upstream": upstream }))
    }
}

struct Panic;

#[async_trait]
impl NodeExecutor for Panic {
    fn node_type(&self) -> &str {
        "test.panic"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        panic!("executor bug");
    }
}

struct BrokenRepository;

#[async_trait]
impl ExecutionRepository for BrokenRepository {
    async fn save(&self, _snapshot: ExecutionSnapshot) -> Result<(), RepositoryError> {
        Err(RepositoryError::Storage("disk full".into()))
    }
}

/// Stores snapshots after a pause, leaving a window inside `save`
#[derive(Default)]
struct SlowRepository {
    inner: InMemoryRepository,
}

#[async_trait]
impl ExecutionRepository for SlowRepository {
    async fn save(&self, snapshot: ExecutionSnapshot) -> Result<(), RepositoryError> {
        sleep(Duration::from_millis(1000)).await;
        self.inner.save(snapshot).await
    }
}

struct Harness {
    coordinator: ExecutionCoordinator,
    reporter: Arc<StatusReporter>,
    dispatched: Arc<Mutex<Vec<String>>>,
}

fn registry(dispatched: &Arc<Mutex<Vec<String>>>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(Sleep {
        dispatched: dispatched.clone(),
    }));
    registry.register(Arc::new(Fail {
        dispatched: dispatched.clone(),
    }));
    registry.register(Arc::new(Inspect));
    registry.register(Arc::new(Panic));
    registry
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let reporter = Arc::new(StatusReporter::new(256));
    let coordinator = ExecutionCoordinator::new(Arc::new(registry(&dispatched)), reporter.clone());
    Harness {
        coordinator,
        reporter,
        dispatched,
    }
}

fn sleep_node(id: &str, ms: u64) -> NodeSpec {
    NodeSpec::new(id, "test.sleep").with_config("ms", ms)
}

fn edge(source: &str, target: &str) -> EdgeSpec {
    EdgeSpec::new(source, target)
}

/// Collect events up to and including the next terminal one
async fn until_terminal(sub: &mut Subscription) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.recv().await {
        let done = event.is_terminal();
        events.push(event);
        if done {
            break;
        }
    }
    events
}

/// Wait until a status update shows `node` in `status`
async fn wait_for_status(sub: &mut Subscription, node: &str, status: NodeStatus) {
    while let Some(event) = sub.recv().await {
        if let WorkflowEvent::NodeStatusUpdate { node_statuses } = &event {
            if node_statuses.get(node) == Some(&status) {
                return;
            }
        }
    }
    panic!("subscription closed before {node} became {status:?}");
}

fn names(events: &[WorkflowEvent]) -> Vec<&'static str> {
    events.iter().map(WorkflowEvent::name).collect()
}

#[tokio::test(start_paused = true)]
async fn successful_run_reports_every_layer_then_completes() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    let receipt = h
        .coordinator
        .start(
            "wf",
            vec![sleep_node("a", 10), sleep_node("b", 10), sleep_node("c", 10)],
            vec![edge("a", "c"), edge("b", "c")],
        )
        .unwrap();
    assert_eq!(receipt.status, "started");
    assert_eq!(receipt.workflow_id, "wf");
    assert!(h.coordinator.is_active("wf"));

    let events = until_terminal(&mut sub).await;
    assert_eq!(
        names(&events),
        vec![
            "node-status-update",
            "node-status-update",
            "node-status-update",
            "node-status-update",
            "workflow-execution-progress",
            "node-status-update",
            "node-status-update",
            "node-status-update",
            "workflow-execution-progress",
            "workflow-execution-completed",
        ]
    );

    match &events[0] {
        WorkflowEvent::NodeStatusUpdate { node_statuses } => {
            assert_eq!(node_statuses.len(), 3);
            assert!(node_statuses.values().all(|s| *s == NodeStatus::NotStarted));
        }
        other => panic!("unexpected first event {other:?}"),
    }

    match &events[1] {
        WorkflowEvent::NodeStatusUpdate { node_statuses } => {
            assert_eq!(node_statuses["a"], NodeStatus::Waiting);
            assert_eq!(node_statuses["b"], NodeStatus::Waiting);
            assert_eq!(node_statuses["c"], NodeStatus::NotStarted);
        }
        other => panic!("unexpected event {other:?}"),
    }

    match &events[4] {
        WorkflowEvent::WorkflowExecutionProgress {
            current_layer,
            nodes_completed,
            results,
        } => {
            assert_eq!(*current_layer, 0);
            assert_eq!(nodes_completed, &vec!["a".to_string(), "b".to_string()]);
            assert_eq!(results.len(), 2);
        }
        other => panic!("unexpected event {other:?}"),
    }

    match events.last() {
        Some(WorkflowEvent::WorkflowExecutionCompleted {
            results,
            node_statuses,
        }) => {
            assert_eq!(results.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
            assert!(results.values().all(|r| r.is_success()));
            assert!(node_statuses.values().all(|s| *s == NodeStatus::Succeeded));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }

    assert!(!h.coordinator.is_active("wf"));
    assert_eq!(h.coordinator.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn nodes_in_one_layer_run_concurrently() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    let started = Instant::now();
    h.coordinator
        .start("wf", vec![sleep_node("two", 2000), sleep_node("three", 3000)], vec![])
        .unwrap();

    let events = until_terminal(&mut sub).await;
    let elapsed = started.elapsed();

    assert_eq!(events.last().map(WorkflowEvent::name), Some("workflow-execution-completed"));
    assert!(elapsed >= Duration::from_millis(3000), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(4000), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn failure_stops_the_workflow_after_its_layer() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    h.coordinator
        .start(
            "wf",
            vec![
                sleep_node("first", 10),
                NodeSpec::new("broken", "test.fail").with_config("ms", 100),
                sleep_node("sibling", 5000),
                sleep_node("last", 10),
            ],
            vec![
                edge("first", "broken"),
                edge("first", "sibling"),
                edge("broken", "last"),
                edge("sibling", "last"),
            ],
        )
        .unwrap();

    let events = until_terminal(&mut sub).await;

    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::WorkflowExecutionProgress { current_layer, .. } => Some(*current_layer),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0]);

    let final_status = events
        .iter()
        .rev()
        .find_map(|e| match e {
            WorkflowEvent::NodeStatusUpdate { node_statuses } => Some(node_statuses.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(final_status["first"], NodeStatus::Succeeded);
    assert_eq!(final_status["broken"], NodeStatus::Failed);
    assert_eq!(final_status["sibling"], NodeStatus::Failed);
    assert_eq!(final_status["last"], NodeStatus::Failed);

    match events.last() {
        Some(WorkflowEvent::WorkflowExecutionError {
            error,
            cancelled,
            failed_layer,
            results,
            node_statuses,
        }) => {
            assert!(!cancelled);
            assert_eq!(*failed_layer, Some(1));
            assert!(error.contains("broken"), "{error}");
            assert!(error.contains("simulated outage"), "{error}");
            assert_eq!(results.keys().collect::<Vec<_>>(), vec!["broken", "first"]);
            assert_eq!(node_statuses, &final_status);
        }
        other => panic!("unexpected terminal event {other:?}"),
    }

    let dispatched = h.dispatched.lock().unwrap().clone();
    assert!(!dispatched.contains(&"last".to_string()));
    assert!(!h.coordinator.is_active("wf"));
}

#[tokio::test(start_paused = true)]
async fn cyclic_graph_is_rejected_without_events() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    let err = h
        .coordinator
        .start(
            "wf",
            vec![sleep_node("a", 1), sleep_node("b", 1)],
            vec![edge("a", "b"), edge("b", "a")],
        )
        .unwrap_err();

    assert!(err.is_cycle());
    tokio::task::yield_now().await;
    assert!(sub.try_recv().is_none());
    assert!(!h.coordinator.is_active("wf"));
    assert!(h.dispatched.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_submission_leaves_running_session_alone() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    let first = h
        .coordinator
        .start("wf", vec![sleep_node("slow", 1000)], vec![])
        .unwrap();

    let err = h
        .coordinator
        .start("wf", vec![sleep_node("a", 1)], vec![edge("a", "ghost")])
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownEdgeEndpoint { .. }));

    let empty = h.coordinator.start("wf", vec![], vec![]).unwrap_err();
    assert_eq!(empty, WorkflowError::EmptyGraph);

    assert_eq!(h.coordinator.active_generation("wf"), Some(first.generation));
    let events = until_terminal(&mut sub).await;
    assert_eq!(events.last().map(WorkflowEvent::name), Some("workflow-execution-completed"));
}

#[tokio::test(start_paused = true)]
async fn unknown_node_type_fails_that_node() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    h.coordinator
        .start("wf", vec![NodeSpec::new("mystery", "llm.chat")], vec![])
        .unwrap();

    match until_terminal(&mut sub).await.last() {
        Some(WorkflowEvent::WorkflowExecutionError { results, failed_layer, .. }) => {
            assert_eq!(*failed_layer, Some(0));
            assert_eq!(
                results["mystery"].error.as_deref(),
                Some("Unknown node type: llm.chat")
            );
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_executor_is_reported_as_node_failure() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    h.coordinator
        .start("wf", vec![NodeSpec::new("p", "test.panic")], vec![])
        .unwrap();

    match until_terminal(&mut sub).await.last() {
        Some(WorkflowEvent::WorkflowExecutionError { results, cancelled, .. }) => {
            assert!(!cancelled);
            assert!(results["p"]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("executor bug")));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    assert!(!h.coordinator.is_active("wf"));
}

#[tokio::test(start_paused = true)]
async fn later_layers_see_earlier_results() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    h.coordinator
        .start(
            "wf",
            vec![
                sleep_node("a", 5),
                sleep_node("b", 7),
                NodeSpec::new("c", "test.inspect"),
            ],
            vec![edge("b", "c")],
        )
        .unwrap();

    match until_terminal(&mut sub).await.last() {
        Some(WorkflowEvent::WorkflowExecutionCompleted { results, .. }) => {
            assert_eq!(
                results["c"].output,
                json!({ "prior": ["a", "b"], "upstream": [{ "slept": 7 }] })
            );
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn new_start_supersedes_running_session() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    let first = h
        .coordinator
        .start("wf", vec![sleep_node("slow", 60_000)], vec![])
        .unwrap();
    wait_for_status(&mut sub, "slow", NodeStatus::Running).await;

    let second = h
        .coordinator
        .start("wf", vec![sleep_node("quick", 10)], vec![])
        .unwrap();
    assert!(second.generation > first.generation);
    assert_eq!(h.coordinator.active_generation("wf"), Some(second.generation));

    // The first run winds down before the second publishes anything
    let cancelled_run = until_terminal(&mut sub).await;
    assert_eq!(
        names(&cancelled_run),
        vec!["workflow-execution-error", "workflow-execution-cancelled"]
    );
    match &cancelled_run[0] {
        WorkflowEvent::WorkflowExecutionError { cancelled, node_statuses, .. } => {
            assert!(cancelled);
            assert!(node_statuses.contains_key("slow"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        cancelled_run[1],
        WorkflowEvent::WorkflowExecutionCancelled {
            generation: first.generation
        }
    );

    let second_run = until_terminal(&mut sub).await;
    for event in &second_run {
        if let WorkflowEvent::NodeStatusUpdate { node_statuses } = event {
            assert!(node_statuses.contains_key("quick"));
            assert!(!node_statuses.contains_key("slow"));
        }
    }
    assert_eq!(
        second_run.last().map(WorkflowEvent::name),
        Some("workflow-execution-completed")
    );
    assert!(!h.coordinator.is_active("wf"));
}

#[tokio::test(start_paused = true)]
async fn back_to_back_starts_only_run_the_latest() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    h.coordinator
        .start("wf", vec![sleep_node("old", 10)], vec![])
        .unwrap();
    h.coordinator
        .start("wf", vec![sleep_node("new", 10)], vec![])
        .unwrap();

    let events = until_terminal(&mut sub).await;
    match &events[0] {
        WorkflowEvent::NodeStatusUpdate { node_statuses } => {
            assert!(node_statuses.contains_key("new"));
        }
        other => panic!("unexpected first event {other:?}"),
    }
    assert!(events
        .iter()
        .all(|e| !matches!(e, WorkflowEvent::WorkflowExecutionCancelled { .. })));
    assert_eq!(h.dispatched.lock().unwrap().clone(), vec!["new".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_the_active_session() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    assert!(!h.coordinator.cancel("wf"));

    let receipt = h
        .coordinator
        .start(
            "wf",
            vec![sleep_node("a", 60_000), sleep_node("b", 10)],
            vec![edge("a", "b")],
        )
        .unwrap();
    wait_for_status(&mut sub, "a", NodeStatus::Running).await;

    assert!(h.coordinator.cancel("wf"));
    let events = until_terminal(&mut sub).await;

    assert_eq!(
        events.last(),
        Some(&WorkflowEvent::WorkflowExecutionCancelled {
            generation: receipt.generation
        })
    );
    assert!(!h.dispatched.lock().unwrap().contains(&"b".to_string()));
    assert!(!h.coordinator.is_active("wf"));
}

#[tokio::test(start_paused = true)]
async fn workflows_do_not_block_each_other() {
    let h = harness();
    let mut left = h.reporter.subscribe("left");
    let mut right = h.reporter.subscribe("right");

    let started = Instant::now();
    h.coordinator
        .start("left", vec![sleep_node("l", 2000)], vec![])
        .unwrap();
    h.coordinator
        .start("right", vec![sleep_node("r", 2000)], vec![])
        .unwrap();
    assert_eq!(h.coordinator.active_count(), 2);

    until_terminal(&mut left).await;
    until_terminal(&mut right).await;
    assert!(started.elapsed() < Duration::from_millis(2500));
}

#[tokio::test(start_paused = true)]
async fn finished_runs_are_persisted() {
    init_tracing();
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let repository = Arc::new(InMemoryRepository::new());
    let runtime = LayerRuntime::with_registry(registry(&dispatched), RuntimeConfig::default())
        .with_repository(repository.clone());
    let mut sub = runtime.subscribe("wf");

    runtime
        .start("wf", vec![sleep_node("a", 10), sleep_node("b", 10)], vec![edge("a", "b")])
        .unwrap();
    until_terminal(&mut sub).await;

    let snapshot = repository.latest("wf").await.unwrap();
    assert_eq!(snapshot.status, SessionState::Completed);
    assert_eq!(snapshot.nodes.len(), 2);
    assert_eq!(snapshot.edges, vec![edge("a", "b")]);
    assert_eq!(snapshot.results.len(), 2);
    assert!(snapshot.finished_at >= snapshot.started_at);
}

#[tokio::test(start_paused = true)]
async fn repository_failure_does_not_change_outcome() {
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let runtime = LayerRuntime::with_registry(registry(&dispatched), RuntimeConfig::default())
        .with_repository(Arc::new(BrokenRepository));
    let mut sub = runtime.subscribe("wf");

    runtime.start("wf", vec![sleep_node("a", 10)], vec![]).unwrap();

    let events = until_terminal(&mut sub).await;
    assert_eq!(events.last().map(WorkflowEvent::name), Some("workflow-execution-completed"));
}

#[tokio::test(start_paused = true)]
async fn persistence_can_be_switched_off() {
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let repository = Arc::new(InMemoryRepository::new());
    let config = RuntimeConfig {
        persist_snapshots: false,
        ..RuntimeConfig::default()
    };
    let runtime =
        LayerRuntime::with_registry(registry(&dispatched), config).with_repository(repository.clone());
    let mut sub = runtime.subscribe("wf");

    runtime.start("wf", vec![sleep_node("a", 10)], vec![]).unwrap();
    until_terminal(&mut sub).await;

    assert_eq!(repository.len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_mid_run_does_not_disturb_execution() {
    let h = harness();
    let mut watcher = h.reporter.subscribe("wf");
    let leaver = h.reporter.subscribe("wf");

    h.coordinator
        .start("wf", vec![sleep_node("a", 100), sleep_node("b", 100)], vec![edge("a", "b")])
        .unwrap();
    h.reporter.unsubscribe("wf", leaver);

    let events = until_terminal(&mut watcher).await;
    assert_eq!(events.last().map(WorkflowEvent::name), Some("workflow-execution-completed"));
    assert_eq!(h.reporter.subscriber_count("wf"), 1);
}

#[tokio::test(start_paused = true)]
async fn finished_siblings_keep_their_results_when_one_fails() {
    let h = harness();
    let mut sub = h.reporter.subscribe("wf");

    h.coordinator
        .start(
            "wf",
            vec![NodeSpec::new("bad", "test.fail"), sleep_node("good", 0)],
            vec![],
        )
        .unwrap();

    match until_terminal(&mut sub).await.last() {
        Some(WorkflowEvent::WorkflowExecutionError {
            failed_layer,
            results,
            node_statuses,
            ..
        }) => {
            assert_eq!(*failed_layer, Some(0));
            assert_eq!(node_statuses["bad"], NodeStatus::Failed);
            assert_eq!(node_statuses["good"], NodeStatus::Succeeded);
            assert!(results["good"].is_success());
            assert!(!results["bad"].is_success());
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    let mut dispatched = h.dispatched.lock().unwrap().clone();
    dispatched.sort();
    assert_eq!(dispatched, vec!["bad".to_string(), "good".to_string()]);
}

fn persisting_runtime() -> (LayerRuntime, Arc<InMemoryRepository>) {
    init_tracing();
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let repository = Arc::new(InMemoryRepository::new());
    let runtime = LayerRuntime::with_registry(registry(&dispatched), RuntimeConfig::default())
        .with_repository(repository.clone());
    (runtime, repository)
}

#[tokio::test(start_paused = true)]
async fn failed_runs_are_persisted() {
    let (runtime, repository) = persisting_runtime();
    let mut sub = runtime.subscribe("wf");

    runtime
        .start(
            "wf",
            vec![sleep_node("a", 10), NodeSpec::new("b", "test.fail")],
            vec![edge("a", "b")],
        )
        .unwrap();
    until_terminal(&mut sub).await;

    let snapshot = repository.latest("wf").await.unwrap();
    assert_eq!(snapshot.status, SessionState::Failed);
    assert!(snapshot.results["a"].is_success());
    assert!(!snapshot.results["b"].is_success());
}

#[tokio::test(start_paused = true)]
async fn cancelled_runs_are_persisted() {
    let (runtime, repository) = persisting_runtime();
    let mut sub = runtime.subscribe("wf");

    runtime
        .start("wf", vec![sleep_node("a", 60_000)], vec![])
        .unwrap();
    wait_for_status(&mut sub, "a", NodeStatus::Running).await;
    assert!(runtime.cancel("wf"));
    until_terminal(&mut sub).await;

    let snapshot = repository.latest("wf").await.unwrap();
    assert_eq!(snapshot.status, SessionState::Cancelled);
    assert_eq!(snapshot.node_statuses["a"], NodeStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn run_superseded_before_starting_is_persisted() {
    let (runtime, repository) = persisting_runtime();
    let mut sub = runtime.subscribe("wf");

    let first = runtime.start("wf", vec![sleep_node("old", 10)], vec![]).unwrap();
    let second = runtime.start("wf", vec![sleep_node("new", 10)], vec![]).unwrap();
    until_terminal(&mut sub).await;

    let snapshots = repository.list("wf").await;
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].generation, first.generation);
    assert_eq!(snapshots[0].status, SessionState::Cancelled);
    assert!(snapshots[0].results.is_empty());
    assert_eq!(snapshots[1].generation, second.generation);
    assert_eq!(snapshots[1].status, SessionState::Completed);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_final_save_keeps_completed_outcome() {
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let repository = Arc::new(SlowRepository::default());
    let runtime = LayerRuntime::with_registry(registry(&dispatched), RuntimeConfig::default())
        .with_repository(repository.clone());
    let mut sub = runtime.subscribe("wf");

    runtime.start("wf", vec![sleep_node("a", 10)], vec![]).unwrap();

    // Progress of the last layer is published right before the save starts
    while let Some(event) = sub.recv().await {
        if matches!(event, WorkflowEvent::WorkflowExecutionProgress { .. }) {
            break;
        }
    }
    assert!(runtime.cancel("wf"));

    let events = until_terminal(&mut sub).await;
    assert_eq!(names(&events), vec!["workflow-execution-completed"]);
    let snapshot = repository.inner.latest("wf").await.unwrap();
    assert_eq!(snapshot.status, SessionState::Completed);
    assert!(!runtime.coordinator().is_active("wf"));
}
