//! Core abstractions for the layerflow engine
//!
//! This crate provides the data model, the executor plugin contract, the
//! error taxonomy and the status event channel that every other crate
//! depends on. It holds no execution state of its own.

mod error;
pub mod events;
mod node;
mod workflow;

pub use error::{FlowError, NodeError, RegistryError, RepositoryError, WorkflowError};
pub use events::{EventEnvelope, StatusMap, StatusReporter, Subscription, WorkflowEvent};
pub use node::{
    ExecutorMetadata, NodeContext, NodeExecutor, NodeResult, NodeStatus, ResultMap, ResultStatus,
};
pub use workflow::{EdgeSpec, NodeId, NodeSpec, WorkflowDefinition, WorkflowId};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
