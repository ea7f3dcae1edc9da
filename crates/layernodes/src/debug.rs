use crate::upstream_outputs;
use async_trait::async_trait;
use layercore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor};
use serde_json::{json, Value};

/// Logs a message, or what its predecessors produced
pub struct DebugNode;

#[async_trait]
impl NodeExecutor for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let upstream = upstream_outputs(&ctx);
        let message = match ctx.config_str("message") {
            Some(message) => message.to_string(),
            None if upstream.is_empty() => "(no message)".to_string(),
            None => format!("{} upstream result(s)", upstream.len()),
        };

        tracing::info!("DEBUG [{}/{}]: {}", ctx.workflow_id, ctx.node_id, message);
        for (node_id, output) in &upstream {
            tracing::info!("  {}: {}", node_id, output);
        }

        Ok(json!({ "message": message }))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
