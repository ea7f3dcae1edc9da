use crate::coordinator::{ExecutionCoordinator, StartReceipt};
use crate::registry::ExecutorRegistry;
use crate::repository::ExecutionRepository;
use layercore::{
    EdgeSpec, EventEnvelope, NodeSpec, StatusReporter, Subscription, WorkflowDefinition,
    WorkflowError,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application root: one per process, passed by reference to whatever
/// needs to submit workflows or watch them.
pub struct LayerRuntime {
    config: RuntimeConfig,
    registry: Arc<ExecutorRegistry>,
    reporter: Arc<StatusReporter>,
    coordinator: ExecutionCoordinator,
}

impl LayerRuntime {
    /// Create a new runtime with default settings and no executors
    pub fn new() -> Self {
        Self::with_registry(ExecutorRegistry::new(), RuntimeConfig::default())
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: ExecutorRegistry, config: RuntimeConfig) -> Self {
        let registry = Arc::new(registry);
        let reporter = Arc::new(StatusReporter::new(config.event_buffer_size));
        let coordinator = ExecutionCoordinator::new(registry.clone(), reporter.clone());

        Self {
            config,
            registry,
            reporter,
            coordinator,
        }
    }

    /// Store finished executions in `repository`, unless persistence is
    /// switched off in the config
    pub fn with_repository(mut self, repository: Arc<dyn ExecutionRepository>) -> Self {
        if self.config.persist_snapshots {
            self.coordinator = self.coordinator.with_repository(repository);
        } else {
            tracing::info!("Snapshot persistence disabled; repository ignored");
        }
        self
    }

    pub fn start(
        &self,
        workflow_id: impl Into<String>,
        nodes: Vec<NodeSpec>,
        edges: Vec<EdgeSpec>,
    ) -> Result<StartReceipt, WorkflowError> {
        self.coordinator.start(workflow_id, nodes, edges)
    }

    pub fn start_definition(
        &self,
        workflow: &WorkflowDefinition,
    ) -> Result<StartReceipt, WorkflowError> {
        self.coordinator
            .start(workflow.id.clone(), workflow.nodes.clone(), workflow.edges.clone())
    }

    pub fn cancel(&self, workflow_id: &str) -> bool {
        self.coordinator.cancel(workflow_id)
    }

    pub fn subscribe(&self, workflow_id: &str) -> Subscription {
        self.reporter.subscribe(workflow_id)
    }

    pub fn unsubscribe(&self, workflow_id: &str, subscription: Subscription) {
        self.reporter.unsubscribe(workflow_id, subscription)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope> {
        self.reporter.subscribe_all()
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn reporter(&self) -> &Arc<StatusReporter> {
        &self.reporter
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Default for LayerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Events buffered per workflow channel before slow subscribers lag
    pub event_buffer_size: usize,
    pub persist_snapshots: bool,
}

impl RuntimeConfig {
    pub const EVENT_BUFFER_VAR: &'static str = "LAYERFLOW_EVENT_BUFFER";
    pub const PERSIST_VAR: &'static str = "LAYERFLOW_PERSIST";

    /// Defaults overridden by `LAYERFLOW_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(Self::EVENT_BUFFER_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => config.event_buffer_size = size,
                _ => tracing::warn!(
                    "Ignoring {}={:?}; expected a positive integer",
                    Self::EVENT_BUFFER_VAR,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(Self::PERSIST_VAR) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.persist_snapshots = true,
                "0" | "false" | "no" | "off" => config.persist_snapshots = false,
                _ => tracing::warn!(
                    "Ignoring {}={:?}; expected true or false",
                    Self::PERSIST_VAR,
                    raw
                ),
            }
        }

        config
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            persist_snapshots: true,
        }
    }
}
