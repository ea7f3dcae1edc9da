use crate::graph::WorkflowGraph;
use crate::registry::ExecutorRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use layercore::{NodeContext, NodeExecutor, NodeId, NodeResult, NodeSpec, RegistryError, ResultMap};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How one layer ended
#[derive(Debug)]
pub(crate) enum LayerOutcome {
    /// Every node succeeded. Results are in layer order.
    Completed(Vec<NodeResult>),
    /// At least one node failed. `aborted` lists siblings that were still
    /// running and got cancelled.
    Failed {
        results: Vec<NodeResult>,
        aborted: Vec<NodeId>,
    },
    /// The session was cancelled while the layer was in flight
    Cancelled { results: Vec<NodeResult> },
}

/// Runs every node of one layer concurrently and waits for all of them
pub(crate) struct LayerExecutor<'a> {
    pub workflow_id: &'a str,
    pub graph: &'a WorkflowGraph,
    pub registry: &'a ExecutorRegistry,
    pub session_token: &'a CancellationToken,
}

impl LayerExecutor<'_> {
    pub async fn run(&self, layer: &[NodeId], prior: Arc<ResultMap>) -> LayerOutcome {
        // Cancelled on sibling failure as well as with the session
        let layer_token = self.session_token.child_token();
        let mut running = FuturesUnordered::new();

        for node_id in layer {
            let Some(node) = self.graph.node(node_id) else {
                continue;
            };

            let ctx = NodeContext {
                workflow_id: self.workflow_id.to_string(),
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                config: node.config.clone(),
                prior_results: prior.clone(),
                upstream: self.graph.upstream(node_id),
                cancellation: layer_token.clone(),
            };

            tracing::info!(
                "Dispatching node {} ({}) for workflow {}",
                node.id,
                node.node_type,
                self.workflow_id
            );
            let executor = self.registry.resolve(&node.node_type);
            running.push(tokio::spawn(invoke(executor, node.clone(), ctx)));
        }

        let mut pending: Vec<NodeId> = layer.to_vec();
        let mut results = Vec::with_capacity(layer.len());
        let mut failed = false;

        loop {
            tokio::select! {
                biased;

                _ = self.session_token.cancelled() => {
                    abort_all(&running);
                    sort_by_layer(&mut results, layer);
                    return LayerOutcome::Cancelled { results };
                }

                joined = running.next() => match joined {
                    None => break,
                    Some(Ok(result)) => {
                        pending.retain(|id| id != &result.node_id);
                        let succeeded = result.is_success();
                        results.push(result);
                        if !succeeded {
                            failed = true;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("Node task for workflow {} could not be joined: {}", self.workflow_id, e);
                        failed = true;
                        break;
                    }
                }
            }
        }

        if failed {
            // Siblings that already finished keep their results; only the
            // ones still running are aborted
            while let Some(Some(joined)) = running.next().now_or_never() {
                match joined {
                    Ok(result) => {
                        pending.retain(|id| id != &result.node_id);
                        results.push(result);
                    }
                    Err(e) => {
                        tracing::error!("Node task for workflow {} could not be joined: {}", self.workflow_id, e);
                    }
                }
            }
        }

        sort_by_layer(&mut results, layer);
        if failed {
            layer_token.cancel();
            abort_all(&running);
            if !pending.is_empty() {
                tracing::warn!(
                    "Cancelled {} running sibling(s) in workflow {}: {:?}",
                    pending.len(),
                    self.workflow_id,
                    pending
                );
            }
            LayerOutcome::Failed {
                results,
                aborted: pending,
            }
        } else {
            LayerOutcome::Completed(results)
        }
    }
}

/// Run one node and turn every possible failure into a `NodeResult`
pub(crate) async fn invoke(
    executor: Result<Arc<dyn NodeExecutor>, RegistryError>,
    node: NodeSpec,
    ctx: NodeContext,
) -> NodeResult {
    let start = Instant::now();

    let executor = match executor {
        Ok(executor) => executor,
        Err(e) => {
            tracing::error!("Node {} cannot run: {}", node.id, e);
            return NodeResult::failure(&node, e.to_string(), 0);
        }
    };

    if let Err(e) = executor.validate_config(&node.config) {
        tracing::error!("Node {} rejected its config: {}", node.id, e);
        return NodeResult::failure(&node, e.to_string(), 0);
    }

    let outcome = AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(output)) => {
            tracing::info!("Node {} completed in {}ms", node.id, duration_ms);
            NodeResult::success(&node, output, duration_ms)
        }
        Ok(Err(e)) => {
            tracing::error!("Node {} failed: {}", node.id, e);
            NodeResult::failure(&node, e.to_string(), duration_ms)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("Node {} panicked: {}", node.id, message);
            NodeResult::failure(&node, format!("Executor panicked: {message}"), duration_ms)
        }
    }
}

fn abort_all<T>(running: &FuturesUnordered<tokio::task::JoinHandle<T>>) {
    for handle in running.iter() {
        handle.abort();
    }
}

fn sort_by_layer(results: &mut [NodeResult], layer: &[NodeId]) {
    results.sort_by_key(|r| layer.iter().position(|id| id == &r.node_id));
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
