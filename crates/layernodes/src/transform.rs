use crate::upstream_outputs;
use async_trait::async_trait;
use layercore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor};
use serde_json::{json, Value};

/// Parse a JSON string into a value
pub struct JsonParseNode;

#[async_trait]
impl NodeExecutor for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let input = match ctx.config.get("json") {
            Some(Value::String(text)) => text.clone(),
            Some(_) => {
                return Err(NodeError::InvalidConfig {
                    field: "json".to_string(),
                    reason: "expected a string".to_string(),
                })
            }
            None => first_upstream_string(&ctx).ok_or_else(|| {
                NodeError::MissingConfig("json (or an upstream string output)".to_string())
            })?,
        };

        let parsed: Value = serde_json::from_str(&input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(json!({ "parsed": parsed }))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// First string found among upstream outputs, either the output itself or
/// one of its top-level fields
fn first_upstream_string(ctx: &NodeContext) -> Option<String> {
    ctx.upstream_results().find_map(|r| match &r.output {
        Value::String(text) => Some(text.clone()),
        Value::Object(fields) => fields
            .values()
            .find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    })
}

/// Render a value as JSON text
pub struct JsonStringifyNode;

#[async_trait]
impl NodeExecutor for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let value = match ctx.config.get("value") {
            Some(value) => value.clone(),
            None => Value::Object(upstream_outputs(&ctx)),
        };

        let pretty = ctx
            .config
            .get("pretty")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let rendered = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(json!({ "json": rendered }))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
