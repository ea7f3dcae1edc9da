use layercore::{EdgeSpec, NodeId, NodeSpec, WorkflowError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Validated dependency graph for one execution attempt.
///
/// Node indices follow submission order, which is what makes layering
/// deterministic. The graph is never mutated after `build`.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<NodeSpec, ()>,
    node_to_index: HashMap<NodeId, NodeIndex>,
    edges: Vec<EdgeSpec>,
}

impl WorkflowGraph {
    /// Build a dependency graph from raw node and edge lists
    pub fn build(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> Result<Self, WorkflowError> {
        if nodes.is_empty() {
            return Err(WorkflowError::EmptyGraph);
        }

        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut node_to_index = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if node_to_index.contains_key(&node.id) {
                return Err(WorkflowError::DuplicateNode(node.id));
            }
            let id = node.id.clone();
            let idx = graph.add_node(node);
            node_to_index.insert(id, idx);
        }

        for edge in &edges {
            let lookup = |id: &NodeId| {
                node_to_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| WorkflowError::UnknownEdgeEndpoint {
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                        missing: id.clone(),
                    })
            };
            let from_idx = lookup(&edge.source)?;
            let to_idx = lookup(&edge.target)?;

            graph.add_edge(from_idx, to_idx, ());
        }

        Ok(Self {
            graph,
            node_to_index,
            edges,
        })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.node_to_index.get(id).map(|idx| &self.graph[*idx])
    }

    /// All nodes in submission order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    pub fn edges(&self) -> &[EdgeSpec] {
        &self.edges
    }

    /// Direct predecessors of a node, in edge submission order
    pub fn upstream(&self, id: &str) -> Vec<NodeId> {
        let Some(idx) = self.node_to_index.get(id) else {
            return Vec::new();
        };

        let mut incoming: Vec<_> = self
            .graph
            .edges_directed(*idx, Direction::Incoming)
            .map(|e| (e.id(), e.source()))
            .collect();
        incoming.sort_by_key(|(edge, _)| *edge);
        incoming
            .into_iter()
            .map(|(_, source)| self.graph[source].id.clone())
            .collect()
    }

    pub(crate) fn inner(&self) -> &DiGraph<NodeSpec, ()> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<NodeSpec> {
        ids.iter().map(|id| NodeSpec::new(*id, "debug.log")).collect()
    }

    #[test]
    fn rejects_empty_node_list() {
        let err = WorkflowGraph::build(vec![], vec![]).unwrap_err();
        assert_eq!(err, WorkflowError::EmptyGraph);
        assert!(!err.is_cycle());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = WorkflowGraph::build(nodes(&["a", "b", "a"]), vec![]).unwrap_err();
        assert_eq!(err, WorkflowError::DuplicateNode("a".into()));
    }

    #[test]
    fn rejects_dangling_edge() {
        let err = WorkflowGraph::build(nodes(&["a"]), vec![EdgeSpec::new("a", "ghost")])
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::UnknownEdgeEndpoint {
                from: "a".into(),
                to: "ghost".into(),
                missing: "ghost".into(),
            }
        );
    }

    #[test]
    fn keeps_submission_order_and_upstream_order() {
        let graph = WorkflowGraph::build(
            nodes(&["c", "a", "b"]),
            vec![EdgeSpec::new("b", "c"), EdgeSpec::new("a", "c")],
        )
        .unwrap();

        let order: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(graph.upstream("c"), vec!["b".to_string(), "a".to_string()]);
        assert!(graph.upstream("a").is_empty());
        assert_eq!(graph.node("b").map(|n| n.node_type.as_str()), Some("debug.log"));
        assert_eq!(graph.edges().len(), 2);
    }
}
