//! Graph Storage
//!
//! An arena of nodes indexed by `NodeId`. Nodes can only read from nodes
//! that already exist, so insertion order is always a topological order.

use std::collections::HashMap;

use serde::Deserialize;

use super::node::{Node, NodeId, OpKind, Target};
use super::order::topological_order;
use super::GraphView;
use crate::error::GraphError;

/// A computation graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// All nodes, indexed by ID.
    nodes: Vec<Node>,

    /// Name lookup. Names are unique within a graph.
    names: HashMap<String, NodeId>,
}

/// JSON description of a graph: a list of nodes referring to their inputs by
/// name. The list does not need to be topologically sorted.
#[derive(Debug, Deserialize)]
struct GraphDescription {
    nodes: Vec<NodeDescription>,
}

#[derive(Debug, Deserialize)]
struct NodeDescription {
    name: String,
    #[serde(flatten)]
    op: OpKind,
    #[serde(default)]
    inputs: Vec<String>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node reading from `inputs`.
    ///
    /// If `name` is taken, a numeric suffix is appended. Repeated inputs
    /// are recorded once.
    ///
    /// # Panics
    ///
    /// Panics if an input does not exist yet.
    pub fn add_node(&mut self, name: impl Into<String>, op: OpKind, inputs: &[NodeId]) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        let name = self.unique_name(name.into());

        let mut node = Node::new(id, name.clone(), op);
        for &input in inputs {
            assert!(input < id, "node {} reads from {} which does not exist yet", id, input);
            if node.add_input(input) {
                self.nodes[input.index()].add_user(id);
            }
        }

        self.nodes.push(node);
        self.names.insert(name, id);
        id
    }

    /// Add a graph input.
    pub fn placeholder(&mut self, name: impl Into<String>) -> NodeId {
        self.add_node(name, OpKind::Placeholder, &[])
    }

    /// Add a `call_function` node.
    pub fn call(&mut self, name: impl Into<String>, target: Target, inputs: &[NodeId]) -> NodeId {
        self.add_node(name, OpKind::CallFunction { target }, inputs)
    }

    /// Add the graph's output node.
    pub fn output(&mut self, inputs: &[NodeId]) -> NodeId {
        self.add_node("output", OpKind::Output, inputs)
    }

    /// Get a node by ID.
    ///
    /// # Panics
    ///
    /// Panics if the node does not belong to this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Look up a node by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Iterate over all nodes in topological order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Load a graph from its JSON description.
    ///
    /// ```json
    /// {"nodes": [
    ///     {"name": "x", "op": "placeholder"},
    ///     {"name": "y", "op": "call_function", "target": "relu", "inputs": ["x"]}
    /// ]}
    /// ```
    ///
    /// Nodes may be listed in any order; they are sorted topologically,
    /// keeping declaration order wherever the dependencies allow.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let description: GraphDescription = serde_json::from_str(json)?;
        let nodes = description.nodes;

        let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index_of.insert(node.name.as_str(), i).is_some() {
                return Err(GraphError::DuplicateName(node.name.clone()));
            }
        }

        let mut resolved: Vec<Vec<usize>> = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for input in &node.inputs {
                let &idx = index_of.get(input.as_str()).ok_or_else(|| GraphError::UnknownInput {
                    node: node.name.clone(),
                    input: input.clone(),
                })?;
                inputs.push(idx);
            }
            resolved.push(inputs);
        }

        let order = topological_order(nodes.len(), |v| resolved[v].clone()).map_err(|stuck| {
            GraphError::CycleDetected {
                nodes: stuck.into_iter().map(|v| nodes[v].name.clone()).collect(),
            }
        })?;

        let mut graph = Graph::new();
        let mut remap = vec![NodeId::new(0); nodes.len()];
        for v in order {
            let inputs: Vec<NodeId> = resolved[v].iter().map(|&i| remap[i]).collect();
            remap[v] = graph.add_node(nodes[v].name.clone(), nodes[v].op, &inputs);
        }

        Ok(graph)
    }

    fn unique_name(&self, name: String) -> String {
        if !self.names.contains_key(&name) {
            return name;
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{}_{}", name, counter);
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}

impl GraphView for Graph {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn op(&self, node: NodeId) -> OpKind {
        self.nodes[node.index()].op()
    }

    fn name(&self, node: NodeId) -> &str {
        self.nodes[node.index()].name()
    }

    fn inputs(&self, node: NodeId) -> &[NodeId] {
        self.nodes[node.index()].inputs()
    }

    fn users(&self, node: NodeId) -> &[NodeId] {
        self.nodes[node.index()].users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_node_wires_both_directions() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let y = graph.call("y", Target::Relu, &[x]);
        let z = graph.call("z", Target::Add, &[x, y, y]);

        assert_eq!(graph.inputs(z), &[x, y]);
        assert_eq!(graph.users(x), &[y, z]);
        assert_eq!(graph.users(y), &[z]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn clashing_names_get_suffixes() {
        let mut graph = Graph::new();
        let a = graph.placeholder("x");
        let b = graph.placeholder("x");
        let c = graph.placeholder("x");

        assert_eq!(graph.name(a), "x");
        assert_eq!(graph.name(b), "x_1");
        assert_eq!(graph.name(c), "x_2");
        assert_eq!(graph.find("x_1"), Some(b));
    }

    #[test]
    #[should_panic]
    fn reading_from_a_future_node_panics() {
        let mut graph = Graph::new();
        graph.call("y", Target::Relu, &[NodeId::new(3)]);
    }

    #[test]
    fn from_json_sorts_nodes() {
        let json = r#"{
            "nodes": [
                {"name": "out", "op": "output", "inputs": ["b"]},
                {"name": "b", "op": "call_function", "target": "relu", "inputs": ["a"]},
                {"name": "a", "op": "call_function", "target": "add", "inputs": ["x", "x"]},
                {"name": "x", "op": "placeholder"}
            ]
        }"#;

        let graph = Graph::from_json(json).unwrap();
        let names: Vec<&str> = graph.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["x", "a", "b", "out"]);

        let a = graph.find("a").unwrap();
        assert_eq!(graph.op(a), OpKind::CallFunction { target: Target::Add });
        assert_eq!(graph.inputs(a).len(), 1);
    }

    #[test]
    fn from_json_rejects_unknown_input() {
        let json = r#"{"nodes": [{"name": "y", "op": "call_function", "target": "relu", "inputs": ["x"]}]}"#;
        let err = Graph::from_json(json).unwrap_err();
        assert!(matches!(err, GraphError::UnknownInput { ref input, .. } if input == "x"));
    }

    #[test]
    fn from_json_rejects_duplicates() {
        let json = r#"{"nodes": [{"name": "x", "op": "placeholder"}, {"name": "x", "op": "placeholder"}]}"#;
        assert!(matches!(Graph::from_json(json), Err(GraphError::DuplicateName(_))));
    }

    #[test]
    fn from_json_rejects_cycles() {
        let json = r#"{
            "nodes": [
                {"name": "a", "op": "call_function", "target": "neg", "inputs": ["b"]},
                {"name": "b", "op": "call_function", "target": "neg", "inputs": ["a"]}
            ]
        }"#;
        match Graph::from_json(json) {
            Err(GraphError::CycleDetected { nodes }) => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }
}
