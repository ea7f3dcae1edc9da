use layercore::{ExecutorMetadata, NodeExecutor, RegistryError};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available node executors.
///
/// Filled once at startup, then shared behind an `Arc` and only read.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its node type. A later registration for
    /// the same type replaces the earlier one.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        if self.executors.insert(node_type.clone(), executor).is_some() {
            tracing::warn!("Node type {} was registered twice; keeping the latest", node_type);
        }
    }

    /// Look up the executor for a node type
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeExecutor>, RegistryError> {
        self.executors
            .get(node_type)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<ExecutorMetadata> {
        self.executors.get(node_type).map(|e| e.metadata())
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
