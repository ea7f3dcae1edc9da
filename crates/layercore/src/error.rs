use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Rejections raised synchronously by `start`. Nothing runs when one of
/// these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid graph: workflow has no nodes")]
    EmptyGraph,

    #[error("Invalid graph: duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("Invalid graph: edge {from} -> {to} references unknown node '{missing}'")]
    UnknownEdgeEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Cyclic dependency detected: only {placed} of {total} nodes could be layered")]
    CyclicDependency { placed: usize, total: usize },
}

impl WorkflowError {
    /// True for a topologically unsortable graph, false for a malformed one.
    pub fn is_cycle(&self) -> bool {
        matches!(self, WorkflowError::CyclicDependency { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown node type: {0}")]
    NotFound(String),
}

/// Failure reported by a node executor. The dispatcher turns every one of
/// these into a failed `NodeResult`.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing config: {0}")]
    MissingConfig(String),

    #[error("Invalid config for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Failed to store execution snapshot: {0}")]
    Storage(String),
}
