//! Graph Fusion
//!
//! Turns accepted partitions into a rewritten graph.
//!
//! # Overview
//!
//! The partitioner only proposes partitions. Replacing each of them by a
//! single compiled unit is the job of a [`GraphRewriter`]. The rewriter is
//! called once with every partition and either produces its output or fails
//! as a whole; nothing is retried or split.
//!
//! [`FuseByPartitions`] is the rewriter shipped with this crate: it collapses
//! each partition of a [`Graph`] into a `call_module` node and records what
//! went into it as a [`FusedModule`].

mod by_partitions;

pub use by_partitions::FuseByPartitions;

use serde::Serialize;

use crate::error::FuseError;
use crate::graph::{Graph, NodeId};

/// Rewrites a graph so that each partition becomes one unit.
pub trait GraphRewriter<G: ?Sized> {
    /// What the rewrite produces.
    type Output;

    /// Fuse `partitions` in `graph`.
    ///
    /// Each partition lists its member ids in topological order.
    fn fuse(&mut self, graph: &G, partitions: &[Vec<NodeId>]) -> Result<Self::Output, FuseError>;
}

impl<G: ?Sized, R: GraphRewriter<G> + ?Sized> GraphRewriter<G> for &mut R {
    type Output = R::Output;

    fn fuse(&mut self, graph: &G, partitions: &[Vec<NodeId>]) -> Result<Self::Output, FuseError> {
        (**self).fuse(graph, partitions)
    }
}

/// One fused partition.
///
/// Node ids in `nodes`, `inputs` and `outputs` refer to the input graph;
/// `node` refers to the rewritten one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FusedModule {
    /// Name of the `call_module` node.
    pub name: String,

    /// The `call_module` node in the rewritten graph.
    pub node: NodeId,

    /// Member nodes, in topological order.
    pub nodes: Vec<NodeId>,

    /// Nodes outside the partition read by its members, in order of first
    /// use.
    pub inputs: Vec<NodeId>,

    /// Members read from outside the partition, in topological order.
    pub outputs: Vec<NodeId>,
}

/// Result of [`FuseByPartitions`].
#[derive(Debug, Clone)]
pub struct FusedGraph {
    /// The rewritten graph.
    pub graph: Graph,

    /// One record per partition, in the order the partitions were given.
    pub modules: Vec<FusedModule>,
}
