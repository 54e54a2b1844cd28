//! Workflow graph - the DAG of work units and their dependency edges.

use crate::node::NodeDefinition;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Structural errors. Fatal: a graph that fails these checks never runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two nodes share an identifier
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    /// An edge references a node that does not exist
    #[error("Edge {from} -> {to} references unknown node {missing}")]
    DanglingEdge {
        /// Edge source
        from: String,
        /// Edge target
        to: String,
        /// The endpoint that is missing
        missing: String,
    },

    /// Nodes that could not be ordered because of a cycle
    #[error("Cycle detected among nodes: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    /// Lookup of a node that is not in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Any other structural problem
    #[error("Invalid graph: {0}")]
    Invalid(String),
}

/// A directed dependency edge: `target` consumes the output of `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream node
    pub source: String,
    /// Downstream node
    pub target: String,
}

impl Edge {
    /// Create a new edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Unvalidated wire form of a graph, as supplied by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Nodes in submission order
    pub nodes: Vec<NodeDefinition>,
    /// Edges in submission order
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A validated, immutable workflow graph.
///
/// Construction checks that node ids are unique (children included), that
/// every edge references existing top-level nodes, and that the nodes admit a
/// topological ordering. An edge into a loop-tagged node whose source is
/// reachable from that loop node is a loop-back edge: it is ignored by
/// ordering and input gathering. Loop-back edges never re-drive the nodes on
/// the cycle; only the loop node's own executor repeats, and the body runs
/// once after the loop finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphSpec", into = "GraphSpec")]
pub struct WorkflowGraph {
    nodes: Vec<NodeDefinition>,
    edges: Vec<Edge>,
    index: HashMap<String, usize>,
    loop_back: Vec<bool>,
    order: Vec<usize>,
}

impl WorkflowGraph {
    /// Validate nodes and edges into a graph.
    pub fn new(nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut index = HashMap::new();
        let mut seen = HashSet::new();
        for (i, node) in nodes.iter().enumerate() {
            index.insert(node.id.clone(), i);
            collect_ids(node, &mut seen)?;
        }

        for edge in &edges {
            for endpoint in [&edge.source, &edge.target] {
                if !index.contains_key(endpoint) {
                    return Err(GraphError::DanglingEdge {
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        let loop_back = find_loop_back_edges(&nodes, &edges, &index);
        let order = stable_topological_order(&nodes, &edges, &index, &loop_back)?;

        Ok(Self {
            nodes,
            edges,
            index,
            loop_back,
            order,
        })
    }

    /// All top-level nodes in submission order.
    pub fn nodes(&self) -> &[NodeDefinition] {
        &self.nodes
    }

    /// All edges in submission order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of top-level nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a top-level node.
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Deterministic topological order. Ties go to the earlier-submitted node.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].id.as_str()).collect()
    }

    /// Upstream node ids of `id`, in edge submission order.
    pub fn upstream(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .zip(&self.loop_back)
            .filter(|(edge, back)| !**back && edge.target == id)
            .map(|(edge, _)| edge.source.as_str())
            .collect()
    }

    /// Downstream node ids of `id`, in edge submission order.
    pub fn downstream(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .zip(&self.loop_back)
            .filter(|(edge, back)| !**back && edge.source == id)
            .map(|(edge, _)| edge.target.as_str())
            .collect()
    }

    /// Edges that close a bounded loop.
    pub fn loop_back_edges(&self) -> Vec<&Edge> {
        self.edges
            .iter()
            .zip(&self.loop_back)
            .filter(|(_, back)| **back)
            .map(|(edge, _)| edge)
            .collect()
    }

    /// Build a new graph with `id` replaced by `replacement`.
    ///
    /// Edges into the old node are redirected to the replacement's entry nodes
    /// and edges out of it leave from the replacement's exit nodes. The
    /// replacement nodes take the old node's position in submission order.
    pub fn replace_node(&self, id: &str, replacement: &WorkflowGraph) -> Result<Self, GraphError> {
        if !self.index.contains_key(id) {
            return Err(GraphError::NodeNotFound(id.to_string()));
        }
        if replacement.is_empty() {
            return Err(GraphError::Invalid(format!(
                "replacement for {} has no nodes",
                id
            )));
        }

        let entries: Vec<&str> = replacement
            .nodes
            .iter()
            .filter(|n| replacement.upstream(&n.id).is_empty())
            .map(|n| n.id.as_str())
            .collect();
        let exits: Vec<&str> = replacement
            .nodes
            .iter()
            .filter(|n| replacement.downstream(&n.id).is_empty())
            .map(|n| n.id.as_str())
            .collect();

        let mut nodes = Vec::with_capacity(self.nodes.len() + replacement.len());
        for node in &self.nodes {
            if node.id == id {
                nodes.extend(replacement.nodes.iter().cloned());
            } else {
                nodes.push(node.clone());
            }
        }

        let mut edges = Vec::new();
        for edge in &self.edges {
            match (edge.source == id, edge.target == id) {
                (true, true) => {}
                (false, true) => {
                    edges.extend(entries.iter().map(|entry| Edge::new(&edge.source, *entry)));
                }
                (true, false) => {
                    edges.extend(exits.iter().map(|exit| Edge::new(*exit, &edge.target)));
                }
                (false, false) => edges.push(edge.clone()),
            }
        }
        edges.extend(replacement.edges.iter().cloned());

        Self::new(nodes, edges)
    }

    /// Consume the graph into its wire form.
    pub fn into_spec(self) -> GraphSpec {
        GraphSpec {
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

impl TryFrom<GraphSpec> for WorkflowGraph {
    type Error = GraphError;

    fn try_from(spec: GraphSpec) -> Result<Self, Self::Error> {
        Self::new(spec.nodes, spec.edges)
    }
}

impl From<WorkflowGraph> for GraphSpec {
    fn from(graph: WorkflowGraph) -> Self {
        graph.into_spec()
    }
}

fn collect_ids(node: &NodeDefinition, seen: &mut HashSet<String>) -> Result<(), GraphError> {
    if !seen.insert(node.id.clone()) {
        return Err(GraphError::DuplicateNode(node.id.clone()));
    }
    for child in &node.children {
        collect_ids(child, seen)?;
    }
    Ok(())
}

fn find_loop_back_edges(
    nodes: &[NodeDefinition],
    edges: &[Edge],
    index: &HashMap<String, usize>,
) -> Vec<bool> {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for edge in edges {
        adjacency[index[&edge.source]].push(index[&edge.target]);
    }

    edges
        .iter()
        .map(|edge| {
            let target = index[&edge.target];
            nodes[target].is_loop() && reachable(&adjacency, target, index[&edge.source])
        })
        .collect()
}

fn reachable(adjacency: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut stack = vec![from];
    let mut visited = vec![false; adjacency.len()];
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if std::mem::replace(&mut visited[current], true) {
            continue;
        }
        stack.extend(adjacency[current].iter().copied());
    }
    false
}

fn stable_topological_order(
    nodes: &[NodeDefinition],
    edges: &[Edge],
    index: &HashMap<String, usize>,
    loop_back: &[bool],
) -> Result<Vec<usize>, GraphError> {
    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (edge, back) in edges.iter().zip(loop_back) {
        if *back {
            continue;
        }
        let (source, target) = (index[&edge.source], index[&edge.target]);
        in_degree[target] += 1;
        dependents[source].push(target);
    }

    // Min-heap on submission index keeps ties in submission order.
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < nodes.len() {
        let stuck = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(i, _)| nodes[i].id.clone())
            .collect();
        return Err(GraphError::CycleDetected(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;
    use serde_json::json;

    fn node(id: &str) -> NodeDefinition {
        NodeDefinition::new(id, NodeType::Transform)
    }

    fn linear() -> WorkflowGraph {
        WorkflowGraph::new(
            vec![node("a"), node("b"), node("c")],
            vec![Edge::new("a", "b"), Edge::new("b", "c")],
        )
        .unwrap()
    }

    fn is_linearization(graph: &WorkflowGraph) -> bool {
        let order = graph.topological_order();
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        graph
            .edges()
            .iter()
            .all(|e| position[e.source.as_str()] < position[e.target.as_str()])
    }

    #[test]
    fn test_linear_order() {
        assert_eq!(linear().topological_order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_follow_submission_order() {
        let graph = WorkflowGraph::new(
            vec![node("z"), node("m"), node("a"), node("sink")],
            vec![
                Edge::new("a", "sink"),
                Edge::new("m", "sink"),
                Edge::new("z", "sink"),
            ],
        )
        .unwrap();

        assert_eq!(graph.topological_order(), vec!["z", "m", "a", "sink"]);
    }

    #[test]
    fn test_order_is_valid_and_deterministic() {
        let nodes = ["s", "x", "y", "w", "v", "e"].map(node).to_vec();
        let edges = vec![
            Edge::new("s", "x"),
            Edge::new("s", "y"),
            Edge::new("y", "w"),
            Edge::new("x", "w"),
            Edge::new("v", "e"),
            Edge::new("w", "e"),
        ];
        let graph = WorkflowGraph::new(nodes.clone(), edges.clone()).unwrap();
        assert!(is_linearization(&graph));

        let first = graph.topological_order();
        for _ in 0..10 {
            let again = WorkflowGraph::new(nodes.clone(), edges.clone()).unwrap();
            assert_eq!(again.topological_order(), first);
        }
    }

    #[test]
    fn test_cycle_rejected() {
        let err = WorkflowGraph::new(
            vec![node("a"), node("b"), node("c")],
            vec![Edge::new("a", "b"), Edge::new("b", "c"), Edge::new("c", "b")],
        )
        .unwrap_err();

        assert_eq!(err, GraphError::CycleDetected(vec!["b".into(), "c".into()]));
    }

    #[test]
    fn test_loop_back_edge_allowed() {
        let graph = WorkflowGraph::new(
            vec![
                node("a"),
                NodeDefinition::new("loop", NodeType::Loop),
                node("body"),
            ],
            vec![
                Edge::new("a", "loop"),
                Edge::new("loop", "body"),
                Edge::new("body", "loop"),
            ],
        )
        .unwrap();

        assert_eq!(graph.topological_order(), vec!["a", "loop", "body"]);
        assert_eq!(graph.upstream("loop"), vec!["a"]);
        assert_eq!(graph.loop_back_edges().len(), 1);
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let err = WorkflowGraph::new(vec![node("a")], vec![Edge::new("a", "ghost")]).unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { missing, .. } if missing == "ghost"));
    }

    #[test]
    fn test_duplicate_ids_rejected_across_children() {
        let parent = NodeDefinition::new("p", NodeType::Group).with_child(node("a"));
        let err = WorkflowGraph::new(vec![node("a"), parent], vec![]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("a".into()));
    }

    #[test]
    fn test_upstream_lookup() {
        let graph = WorkflowGraph::new(
            vec![node("a"), node("b"), node("c")],
            vec![Edge::new("b", "c"), Edge::new("a", "c")],
        )
        .unwrap();
        assert_eq!(graph.upstream("c"), vec!["b", "a"]);
        assert!(graph.upstream("a").is_empty());
    }

    #[test]
    fn test_replace_node_rewires_edges() {
        let replacement = WorkflowGraph::new(
            vec![node("b1"), node("b2")],
            vec![Edge::new("b1", "b2")],
        )
        .unwrap();

        let replaced = linear().replace_node("b", &replacement).unwrap();

        assert_eq!(replaced.topological_order(), vec!["a", "b1", "b2", "c"]);
        assert_eq!(replaced.upstream("b1"), vec!["a"]);
        assert_eq!(replaced.upstream("c"), vec!["b2"]);
        assert!(replaced.node("b").is_none());
    }

    #[test]
    fn test_replace_unknown_node() {
        let replacement = WorkflowGraph::new(vec![node("x")], vec![]).unwrap();
        assert_eq!(
            linear().replace_node("nope", &replacement).unwrap_err(),
            GraphError::NodeNotFound("nope".into())
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: WorkflowGraph = serde_json::from_value(json!({
            "nodes": [{"id": "a", "type": "start"}, {"id": "b", "type": "end"}],
            "edges": [{"source": "a", "target": "b"}]
        }))
        .unwrap();
        assert_eq!(ok.topological_order(), vec!["a", "b"]);

        let cyclic = serde_json::from_value::<WorkflowGraph>(json!({
            "nodes": [{"id": "a", "type": "transform"}, {"id": "b", "type": "transform"}],
            "edges": [{"source": "a", "target": "b"}, {"source": "b", "target": "a"}]
        }));
        assert!(cyclic.is_err());
    }
}
