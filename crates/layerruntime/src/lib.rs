//! Workflow execution runtime
//!
//! This crate turns a submitted node/edge list into dependency layers and
//! runs them one layer at a time, every node of a layer concurrently, while
//! publishing live status through the `StatusReporter`.

mod coordinator;
mod executor;
mod graph;
mod registry;
mod repository;
mod runtime;
mod scheduler;
mod session;

pub use coordinator::{ExecutionCoordinator, StartReceipt};
pub use graph::WorkflowGraph;
pub use registry::ExecutorRegistry;
pub use repository::{ExecutionRepository, ExecutionSnapshot, InMemoryRepository};
pub use runtime::{LayerRuntime, RuntimeConfig};
pub use scheduler::{ExecutionPlan, Layer, LayerScheduler};
pub use session::{ExecutionSession, SessionState};
