use chrono::{DateTime, Utc};
use layercore::{
    NodeId, NodeResult, NodeStatus, ResultMap, StatusMap, StatusReporter, WorkflowEvent,
    WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// State of one execution attempt, owned by its dispatch task.
///
/// `node_statuses` always holds exactly the submitted node ids.
pub struct ExecutionSession {
    pub workflow_id: WorkflowId,
    pub generation: u64,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    state: SessionState,
    node_statuses: StatusMap,
    results: ResultMap,
    cancellation: CancellationToken,
}

impl ExecutionSession {
    pub fn new(
        workflow_id: WorkflowId,
        generation: u64,
        node_ids: impl IntoIterator<Item = NodeId>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            generation,
            execution_id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: SessionState::Pending,
            node_statuses: node_ids
                .into_iter()
                .map(|id| (id, NodeStatus::NotStarted))
                .collect(),
            results: ResultMap::new(),
            cancellation,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next` unless the session already reached a terminal state
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() {
            tracing::debug!(
                "Ignoring {:?} -> {:?} for workflow {} generation {}",
                self.state,
                next,
                self.workflow_id,
                self.generation
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Update the status of known nodes; unknown ids are ignored
    pub fn set_status<'a>(&mut self, ids: impl IntoIterator<Item = &'a NodeId>, status: NodeStatus) {
        for id in ids {
            if let Some(slot) = self.node_statuses.get_mut(id) {
                *slot = status;
            }
        }
    }

    /// Store a node result and derive the node's status from it
    pub fn record(&mut self, result: NodeResult) {
        let status = if result.is_success() {
            NodeStatus::Succeeded
        } else {
            NodeStatus::Failed
        };
        if let Some(slot) = self.node_statuses.get_mut(&result.node_id) {
            *slot = status;
            self.results.insert(result.node_id.clone(), result);
        }
    }

    pub fn node_statuses(&self) -> &StatusMap {
        &self.node_statuses
    }

    pub fn results(&self) -> &ResultMap {
        &self.results
    }

    pub fn status_event(&self) -> WorkflowEvent {
        WorkflowEvent::NodeStatusUpdate {
            node_statuses: self.node_statuses.clone(),
        }
    }
}

/// Entry in the active-session map
pub(crate) struct ActiveSession {
    pub generation: u64,
    pub cancellation: CancellationToken,
    pub handle: JoinHandle<()>,
}

pub(crate) type SessionMap = Arc<Mutex<HashMap<WorkflowId, ActiveSession>>>;

pub(crate) fn lock_sessions(
    sessions: &Mutex<HashMap<WorkflowId, ActiveSession>>,
) -> MutexGuard<'_, HashMap<WorkflowId, ActiveSession>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns a session's slot in the active map for the lifetime of its
/// dispatch task.
///
/// The slot is released on every exit path. A guard only ever removes the
/// entry of its own generation, so a finishing predecessor cannot evict the
/// session that superseded it.
pub(crate) struct SessionGuard {
    sessions: SessionMap,
    reporter: Arc<StatusReporter>,
    workflow_id: WorkflowId,
    generation: u64,
    node_ids: Vec<NodeId>,
    released: bool,
}

impl SessionGuard {
    pub fn new(
        sessions: SessionMap,
        reporter: Arc<StatusReporter>,
        workflow_id: WorkflowId,
        generation: u64,
        node_ids: Vec<NodeId>,
    ) -> Self {
        Self {
            sessions,
            reporter,
            workflow_id,
            generation,
            node_ids,
            released: false,
        }
    }

    /// Release the slot and publish the terminal event while holding the
    /// map lock, so a concurrent `start` cannot slip in between the two.
    pub fn release_with(&mut self, terminal: Option<WorkflowEvent>) {
        let mut sessions = lock_sessions(&self.sessions);
        if sessions
            .get(&self.workflow_id)
            .is_some_and(|active| active.generation == self.generation)
        {
            sessions.remove(&self.workflow_id);
        }
        if let Some(event) = terminal {
            self.reporter.publish(&self.workflow_id, event);
        }
        self.released = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        tracing::error!(
            "Execution of workflow {} generation {} ended without a terminal event",
            self.workflow_id,
            self.generation
        );
        let node_statuses = self
            .node_ids
            .iter()
            .map(|id| (id.clone(), NodeStatus::Failed))
            .collect();
        self.release_with(Some(WorkflowEvent::WorkflowExecutionError {
            error: "Execution aborted unexpectedly".to_string(),
            cancelled: false,
            failed_layer: None,
            results: ResultMap::new(),
            node_statuses,
        }));
    }
}
