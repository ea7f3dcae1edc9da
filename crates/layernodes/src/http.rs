use async_trait::async_trait;
use layercore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor};
use serde_json::{json, Map, Value};

const METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, ctx: &NodeContext) -> Result<reqwest::RequestBuilder, NodeError> {
        let url = ctx
            .config_str("url")
            .ok_or_else(|| NodeError::MissingConfig("url".to_string()))?;
        let method = ctx.config_str("method").unwrap_or("GET").to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            other => {
                return Err(NodeError::InvalidConfig {
                    field: "method".to_string(),
                    reason: format!("unsupported method {other}"),
                })
            }
        };

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }

        request = match ctx.config.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(json) => request.json(json),
        };

        tracing::info!("Node {}: {} {}", ctx.node_id, method, url);
        Ok(request)
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let request = self.build_request(&ctx)?;

        let response = tokio::select! {
            sent = request.send() => sent
                .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();

        let body = tokio::select! {
            text = response.text() => text
                .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        tracing::info!("Node {} response status: {}", ctx.node_id, status);

        Ok(json!({
            "status": status,
            "body": body,
            "headers": headers,
        }))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), NodeError> {
        match config.get("url") {
            Some(Value::String(url)) if !url.is_empty() => {}
            Some(_) => {
                return Err(NodeError::InvalidConfig {
                    field: "url".to_string(),
                    reason: "expected a non-empty string".to_string(),
                })
            }
            None => return Err(NodeError::MissingConfig("url".to_string())),
        }

        if let Some(method) = config.get("method") {
            let known = method
                .as_str()
                .is_some_and(|m| METHODS.contains(&m.to_uppercase().as_str()));
            if !known {
                return Err(NodeError::InvalidConfig {
                    field: "method".to_string(),
                    reason: format!("expected one of {}", METHODS.join(", ")),
                });
            }
        }

        Ok(())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}
