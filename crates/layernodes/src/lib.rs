//! Standard node library
//!
//! Collection of built-in executors for common operations

mod debug;
mod http;
mod time;
mod transform;

pub use debug::DebugNode;
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};

use layercore::NodeContext;
use layerruntime::ExecutorRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Register all standard executors with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(HttpRequestNode::new()));
    registry.register(Arc::new(JsonParseNode));
    registry.register(Arc::new(JsonStringifyNode));
}

/// Outputs of the direct predecessors keyed by node id
pub(crate) fn upstream_outputs(ctx: &NodeContext) -> Map<String, Value> {
    ctx.upstream_results()
        .map(|r| (r.node_id.clone(), r.output.clone()))
        .collect()
}
