use crate::{NodeError, NodeId, NodeSpec, WorkflowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Results accumulated by earlier layers, keyed by node id
pub type ResultMap = BTreeMap<NodeId, NodeResult>;

/// Live status of a node within one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    #[serde(rename = "not-start")]
    NotStarted,
    Waiting,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Outcome of running one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub status: ResultStatus,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeResult {
    pub fn success(node: &NodeSpec, output: Value, execution_time_ms: u64) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: ResultStatus::Success,
            execution_time_ms,
            output,
            error: None,
        }
    }

    pub fn failure(node: &NodeSpec, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: ResultStatus::Error,
            execution_time_ms,
            output: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Pluggable capability that runs one node type.
///
/// Implementations return `Err` for any failure; the engine converts it into
/// a failed [`NodeResult`] so nothing plugin-specific ever reaches the
/// dispatcher. Long-running executors should watch `ctx.cancellation`.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Unique type identifier (e.g., "http.request", "time.delay")
    fn node_type(&self) -> &str;

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;

    /// Checked right before `execute`; an error fails the node without running it
    fn validate_config(&self, _config: &Map<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::default()
    }
}

/// Descriptive information about an executor, for listings
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub workflow_id: WorkflowId,

    pub node_id: NodeId,

    pub node_type: String,

    /// Static configuration for this node
    pub config: Map<String, Value>,

    /// Results of every node in earlier layers
    pub prior_results: Arc<ResultMap>,

    /// Direct predecessors of this node
    pub upstream: Vec<NodeId>,

    /// Fires when the session is superseded or a sibling fails
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(workflow_id: impl Into<WorkflowId>, node: &NodeSpec) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            config: node.config.clone(),
            prior_results: Arc::new(ResultMap::new()),
            upstream: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::MissingConfig(name.to_string()))
    }

    /// Get config with default
    pub fn config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(Value::as_str)
    }

    /// Results of the direct predecessors, in edge order
    pub fn upstream_results(&self) -> impl Iterator<Item = &NodeResult> {
        self.upstream
            .iter()
            .filter_map(|id| self.prior_results.get(id))
    }
}
