use crate::graph::WorkflowGraph;
use layercore::{EdgeSpec, NodeId, NodeSpec, WorkflowError};
use petgraph::graph::NodeIndex;
use petgraph::Direction;

/// Nodes whose dependencies are all satisfied by earlier layers
pub type Layer = Vec<NodeId>;

/// Splits a graph into dependency layers with Kahn's algorithm
pub struct LayerScheduler;

impl LayerScheduler {
    /// Order the graph into layers. Within a layer nodes keep submission order.
    pub fn layer(graph: &WorkflowGraph) -> Result<Vec<Layer>, WorkflowError> {
        let inner = graph.inner();
        let total = inner.node_count();

        let mut in_degree: Vec<usize> = inner
            .node_indices()
            .map(|idx| inner.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut frontier: Vec<NodeIndex> = inner
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        let mut layers = Vec::new();
        let mut placed = 0;

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for idx in &frontier {
                for succ in inner.neighbors_directed(*idx, Direction::Outgoing) {
                    in_degree[succ.index()] -= 1;
                    if in_degree[succ.index()] == 0 {
                        next.push(succ);
                    }
                }
            }
            next.sort();

            placed += frontier.len();
            layers.push(frontier.iter().map(|idx| inner[*idx].id.clone()).collect());
            frontier = next;
        }

        if placed < total {
            return Err(WorkflowError::CyclicDependency { placed, total });
        }

        Ok(layers)
    }
}

/// A validated graph together with its layers
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub graph: WorkflowGraph,
    pub layers: Vec<Layer>,
}

impl ExecutionPlan {
    /// Build and layer a submission. Pure; fails before anything runs.
    pub fn new(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> Result<Self, WorkflowError> {
        let graph = WorkflowGraph::build(nodes, edges)?;
        let layers = LayerScheduler::layer(&graph)?;
        Ok(Self { graph, layers })
    }

    /// Index of the layer that contains `id`
    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|n| n == id))
    }
}
