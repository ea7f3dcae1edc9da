use crate::{NodeId, NodeStatus, ResultMap, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of every submitted node, keyed by node id
pub type StatusMap = BTreeMap<NodeId, NodeStatus>;

/// Progress and terminal events published for a workflow.
///
/// Serialized as `{"event": "<kind>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum WorkflowEvent {
    NodeStatusUpdate {
        node_statuses: StatusMap,
    },
    WorkflowExecutionProgress {
        current_layer: usize,
        nodes_completed: Vec<NodeId>,
        results: ResultMap,
    },
    WorkflowExecutionCompleted {
        results: ResultMap,
        node_statuses: StatusMap,
    },
    WorkflowExecutionError {
        error: String,
        /// Set when the run was superseded or stopped rather than failed
        cancelled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_layer: Option<usize>,
        results: ResultMap,
        node_statuses: StatusMap,
    },
    WorkflowExecutionCancelled {
        generation: u64,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::NodeStatusUpdate { .. } => "node-status-update",
            WorkflowEvent::WorkflowExecutionProgress { .. } => "workflow-execution-progress",
            WorkflowEvent::WorkflowExecutionCompleted { .. } => "workflow-execution-completed",
            WorkflowEvent::WorkflowExecutionError { .. } => "workflow-execution-error",
            WorkflowEvent::WorkflowExecutionCancelled { .. } => "workflow-execution-cancelled",
        }
    }

    /// Last event a session publishes. A cancellation error is always
    /// followed by `WorkflowExecutionCancelled`, so it does not count.
    pub fn is_terminal(&self) -> bool {
        match self {
            WorkflowEvent::WorkflowExecutionCompleted { .. }
            | WorkflowEvent::WorkflowExecutionCancelled { .. } => true,
            WorkflowEvent::WorkflowExecutionError { cancelled, .. } => !cancelled,
            _ => false,
        }
    }
}

/// Event tagged with the workflow it belongs to, for the global feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub workflow_id: WorkflowId,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}
