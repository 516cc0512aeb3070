//! Computation Graph
//!
//! This module defines the graph that the partitioner works on.
//!
//! # Overview
//!
//! The computation graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent operations (inputs, operator calls, submodule calls, the output)
//! - Edges represent data dependencies: if B reads A, there is an edge from A to B
//!
//! The partitioner does not own a graph representation. It reads any type
//! implementing [`GraphView`]; [`Graph`] is the arena implementation shipped
//! with this crate and the one the fusion rewrite produces.
//!
//! # Design Decisions
//!
//! 1. Node ids are dense indices numbered in topological order. Every
//!    per-node table in the partitioner is a plain vector indexed by id, and
//!    "reverse topological order" is simply descending id.
//!
//! 2. Operation kinds are a closed enum. Classifying a node is a set
//!    membership test on [`Target`], never a string comparison.
//!
//! 3. We maintain both forward (users) and reverse (inputs) edges to enable
//!    efficient traversal in both directions.

mod node;
mod order;
mod store;

pub use node::{Node, NodeId, NodeList, OpKind, Target};
pub use store::Graph;

pub(crate) use order::topological_order;

/// Iterator over the node ids of a graph, in topological order.
pub type NodeIds = std::iter::Map<std::ops::Range<usize>, fn(usize) -> NodeId>;

/// Read-only view of a DAG.
///
/// Implementations must number nodes `0..node_count()` in topological
/// order: every input of a node has a smaller id than the node itself.
pub trait GraphView {
    /// Get the total number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// What the node computes.
    fn op(&self, node: NodeId) -> OpKind;

    /// Human-readable node name, used for diagnostics.
    fn name(&self, node: NodeId) -> &str;

    /// Nodes that `node` reads from, without duplicates.
    fn inputs(&self, node: NodeId) -> &[NodeId];

    /// Nodes that read from `node`, without duplicates.
    fn users(&self, node: NodeId) -> &[NodeId];

    /// All node ids, in topological order.
    fn node_ids(&self) -> NodeIds {
        (0..self.node_count()).map(NodeId::new as fn(usize) -> NodeId)
    }
}
