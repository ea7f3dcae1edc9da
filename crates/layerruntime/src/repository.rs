use crate::session::SessionState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use layercore::{EdgeSpec, NodeSpec, RepositoryError, ResultMap, StatusMap, WorkflowId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Final record of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: Uuid,
    pub workflow_id: WorkflowId,
    pub generation: u64,
    pub status: SessionState,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    pub node_statuses: StatusMap,
    pub results: ResultMap,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Storage for finished executions. Failures are logged by the engine and
/// never change an execution's outcome.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save(&self, snapshot: ExecutionSnapshot) -> Result<(), RepositoryError>;
}

/// Keeps snapshots in memory, oldest first. Nothing is ever evicted, so this
/// is meant for tests and one-shot CLI runs, not long-lived processes.
#[derive(Default)]
pub struct InMemoryRepository {
    snapshots: RwLock<Vec<ExecutionSnapshot>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self, workflow_id: &str) -> Vec<ExecutionSnapshot> {
        self.snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub async fn latest(&self, workflow_id: &str) -> Option<ExecutionSnapshot> {
        self.snapshots
            .read()
            .await
            .iter()
            .rev()
            .find(|s| s.workflow_id == workflow_id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryRepository {
    async fn save(&self, snapshot: ExecutionSnapshot) -> Result<(), RepositoryError> {
        tracing::debug!(
            "Storing execution {} of workflow {} ({:?})",
            snapshot.execution_id,
            snapshot.workflow_id,
            snapshot.status
        );
        self.snapshots.write().await.push(snapshot);
        Ok(())
    }
}
