use crate::executor::{LayerExecutor, LayerOutcome};
use crate::registry::ExecutorRegistry;
use crate::repository::{ExecutionRepository, ExecutionSnapshot};
use crate::scheduler::ExecutionPlan;
use crate::session::{
    lock_sessions, ActiveSession, ExecutionSession, SessionGuard, SessionMap, SessionState,
};
use chrono::Utc;
use layercore::{
    EdgeSpec, NodeResult, NodeSpec, NodeStatus, StatusReporter, WorkflowError, WorkflowEvent,
    WorkflowId,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Acknowledgement returned by [`ExecutionCoordinator::start`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartReceipt {
    pub status: String,
    pub workflow_id: WorkflowId,
    pub generation: u64,
}

/// Owns the single active execution attempt of each workflow id.
///
/// A new `start` for a workflow supersedes the running attempt: the old one
/// is cancelled and its successor waits for it to wind down before
/// publishing anything, so subscribers never see two runs interleaved.
pub struct ExecutionCoordinator {
    dispatcher: Dispatcher,
    sessions: SessionMap,
    next_generation: AtomicU64,
}

impl ExecutionCoordinator {
    pub fn new(registry: Arc<ExecutorRegistry>, reporter: Arc<StatusReporter>) -> Self {
        Self {
            dispatcher: Dispatcher {
                registry,
                reporter,
                repository: None,
            },
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Hand every finished execution to `repository`
    pub fn with_repository(mut self, repository: Arc<dyn ExecutionRepository>) -> Self {
        self.dispatcher.repository = Some(repository);
        self
    }

    /// Validate a submission and launch its execution in the background.
    ///
    /// Malformed or cyclic graphs are rejected here and leave any running
    /// attempt of the same workflow untouched. Must be called from within a
    /// Tokio runtime.
    pub fn start(
        &self,
        workflow_id: impl Into<WorkflowId>,
        nodes: Vec<NodeSpec>,
        edges: Vec<EdgeSpec>,
    ) -> Result<StartReceipt, WorkflowError> {
        let workflow_id = workflow_id.into();
        let plan = ExecutionPlan::new(nodes, edges).inspect_err(|e| {
            tracing::warn!("Rejected workflow {}: {}", workflow_id, e);
        })?;

        let node_ids: Vec<_> = plan.graph.nodes().map(|n| n.id.clone()).collect();
        let cancellation = CancellationToken::new();

        let mut sessions = lock_sessions(&self.sessions);

        let predecessor = sessions.remove(&workflow_id).map(|previous| {
            tracing::info!(
                "Superseding generation {} of workflow {}",
                previous.generation,
                workflow_id
            );
            previous.cancellation.cancel();
            previous.handle
        });

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = ExecutionSession::new(
            workflow_id.clone(),
            generation,
            node_ids.iter().cloned(),
            cancellation.clone(),
        );
        let guard = SessionGuard::new(
            self.sessions.clone(),
            self.dispatcher.reporter.clone(),
            workflow_id.clone(),
            generation,
            node_ids,
        );

        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            dispatcher.run(plan, session, predecessor, guard).await;
        });

        sessions.insert(
            workflow_id.clone(),
            ActiveSession {
                generation,
                cancellation,
                handle,
            },
        );
        drop(sessions);

        tracing::info!(
            "Started workflow {} generation {}",
            workflow_id,
            generation
        );

        Ok(StartReceipt {
            status: "started".to_string(),
            workflow_id,
            generation,
        })
    }

    /// Ask the active attempt of a workflow to stop. Returns false when
    /// nothing is running for that id.
    pub fn cancel(&self, workflow_id: &str) -> bool {
        match lock_sessions(&self.sessions).get(workflow_id) {
            Some(active) => {
                tracing::info!(
                    "Cancelling generation {} of workflow {}",
                    active.generation,
                    workflow_id
                );
                active.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, workflow_id: &str) -> bool {
        lock_sessions(&self.sessions).contains_key(workflow_id)
    }

    pub fn active_generation(&self, workflow_id: &str) -> Option<u64> {
        lock_sessions(&self.sessions)
            .get(workflow_id)
            .map(|active| active.generation)
    }

    pub fn active_count(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    pub fn reporter(&self) -> &Arc<StatusReporter> {
        &self.dispatcher.reporter
    }
}

/// Everything a dispatch task needs, shared by all sessions
#[derive(Clone)]
struct Dispatcher {
    registry: Arc<ExecutorRegistry>,
    reporter: Arc<StatusReporter>,
    repository: Option<Arc<dyn ExecutionRepository>>,
}

impl Dispatcher {
    async fn run(
        self,
        plan: ExecutionPlan,
        mut session: ExecutionSession,
        predecessor: Option<JoinHandle<()>>,
        mut guard: SessionGuard,
    ) {
        if let Some(previous) = predecessor {
            if let Err(e) = previous.await {
                tracing::warn!(
                    "Previous run of workflow {} ended abnormally: {}",
                    session.workflow_id,
                    e
                );
            }
        }

        if session.is_cancelled() {
            tracing::info!(
                "Generation {} of workflow {} was superseded before it started",
                session.generation,
                session.workflow_id
            );
            session.transition(SessionState::Cancelled);
            self.persist(&plan, &session).await;
            guard.release_with(None);
            return;
        }

        session.transition(SessionState::Running);
        self.publish(&session, session.status_event());

        let workflow_id = session.workflow_id.clone();
        let session_token = session.cancellation().clone();
        let layers = LayerExecutor {
            workflow_id: &workflow_id,
            graph: &plan.graph,
            registry: &self.registry,
            session_token: &session_token,
        };

        for (layer_idx, layer) in plan.layers.iter().enumerate() {
            if session.is_cancelled() {
                return self.finish_cancelled(&plan, session, guard).await;
            }

            tracing::info!(
                "Executing layer {} of workflow {} with nodes: {:?}",
                layer_idx + 1,
                workflow_id,
                layer
            );

            session.set_status(layer, NodeStatus::Waiting);
            self.publish(&session, session.status_event());

            session.set_status(layer, NodeStatus::Running);
            self.publish(&session, session.status_event());

            let prior = Arc::new(session.results().clone());
            match layers.run(layer, prior).await {
                LayerOutcome::Completed(results) => {
                    let nodes_completed = results.iter().map(|r| r.node_id.clone()).collect();
                    let layer_results = results
                        .iter()
                        .map(|r| (r.node_id.clone(), r.clone()))
                        .collect();
                    record_all(&mut session, results);

                    self.publish(&session, session.status_event());
                    self.publish(
                        &session,
                        WorkflowEvent::WorkflowExecutionProgress {
                            current_layer: layer_idx,
                            nodes_completed,
                            results: layer_results,
                        },
                    );
                }
                LayerOutcome::Failed { results, aborted } => {
                    let error = describe_failure(&results);
                    record_all(&mut session, results);
                    session.set_status(&aborted, NodeStatus::Failed);
                    for skipped in &plan.layers[layer_idx + 1..] {
                        session.set_status(skipped, NodeStatus::Failed);
                    }
                    self.publish(&session, session.status_event());

                    tracing::error!(
                        "Workflow {} failed in layer {}: {}",
                        workflow_id,
                        layer_idx + 1,
                        error
                    );
                    session.transition(SessionState::Failed);
                    self.persist(&plan, &session).await;

                    let terminal = WorkflowEvent::WorkflowExecutionError {
                        error,
                        cancelled: false,
                        failed_layer: Some(layer_idx),
                        results: session.results().clone(),
                        node_statuses: session.node_statuses().clone(),
                    };
                    guard.release_with(Some(terminal));
                    return;
                }
                LayerOutcome::Cancelled { results } => {
                    record_all(&mut session, results);
                    return self.finish_cancelled(&plan, session, guard).await;
                }
            }
        }

        if session.is_cancelled() {
            return self.finish_cancelled(&plan, session, guard).await;
        }

        // Committed from here on: a cancel arriving while the snapshot is
        // saved does not turn a finished run into a cancelled one
        tracing::info!("Workflow {} execution completed", workflow_id);
        session.transition(SessionState::Completed);
        self.persist(&plan, &session).await;

        let terminal = WorkflowEvent::WorkflowExecutionCompleted {
            results: session.results().clone(),
            node_statuses: session.node_statuses().clone(),
        };
        guard.release_with(Some(terminal));
    }

    async fn finish_cancelled(
        &self,
        plan: &ExecutionPlan,
        mut session: ExecutionSession,
        mut guard: SessionGuard,
    ) {
        tracing::info!(
            "Workflow {} generation {} cancelled",
            session.workflow_id,
            session.generation
        );
        session.transition(SessionState::Cancelled);
        self.persist(plan, &session).await;

        self.publish(
            &session,
            WorkflowEvent::WorkflowExecutionError {
                error: "Execution cancelled".to_string(),
                cancelled: true,
                failed_layer: None,
                results: session.results().clone(),
                node_statuses: session.node_statuses().clone(),
            },
        );
        guard.release_with(Some(WorkflowEvent::WorkflowExecutionCancelled {
            generation: session.generation,
        }));
    }

    fn publish(&self, session: &ExecutionSession, event: WorkflowEvent) {
        self.reporter.publish(&session.workflow_id, event);
    }

    async fn persist(&self, plan: &ExecutionPlan, session: &ExecutionSession) {
        let Some(repository) = &self.repository else {
            return;
        };

        let snapshot = ExecutionSnapshot {
            execution_id: session.execution_id,
            workflow_id: session.workflow_id.clone(),
            generation: session.generation,
            status: session.state(),
            nodes: plan.graph.nodes().cloned().collect(),
            edges: plan.graph.edges().to_vec(),
            node_statuses: session.node_statuses().clone(),
            results: session.results().clone(),
            started_at: session.started_at,
            finished_at: Utc::now(),
        };

        if let Err(e) = repository.save(snapshot).await {
            tracing::warn!(
                "Could not persist execution {} of workflow {}: {}",
                session.execution_id,
                session.workflow_id,
                e
            );
        }
    }
}

fn record_all(session: &mut ExecutionSession, results: Vec<NodeResult>) {
    for result in results {
        session.record(result);
    }
}

fn describe_failure(results: &[NodeResult]) -> String {
    let failures: Vec<String> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| {
            format!(
                "Node {} failed: {}",
                r.node_id,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();

    if failures.is_empty() {
        "Node execution could not be completed".to_string()
    } else {
        failures.join("; ")
    }
}
