use crate::upstream_outputs;
use async_trait::async_trait;
use layercore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let delay_ms = ctx
            .config
            .get("delay_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_DELAY_MS);

        tracing::debug!("Node {} delaying for {}ms", ctx.node_id, delay_ms);

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => {
                tracing::debug!("Node {} delay interrupted", ctx.node_id);
                return Err(NodeError::Cancelled);
            }
        }

        // Pass through whatever came in
        Ok(json!({
            "delayed_ms": delay_ms,
            "upstream": upstream_outputs(&ctx),
        }))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), NodeError> {
        match config.get("delay_ms") {
            None => Ok(()),
            Some(value) if value.as_u64().is_some() => Ok(()),
            Some(value) => Err(NodeError::InvalidConfig {
                field: "delay_ms".to_string(),
                reason: format!("expected a non-negative integer, got {value}"),
            }),
        }
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
