//! Partitioning
//!
//! This module groups supported nodes into partitions that can each be fused
//! into a single compiled unit.
//!
//! # Concepts
//!
//! ## Partitions
//!
//! A partition is a set of nodes proposed for joint fusion. Every node belongs
//! to at most one partition. A partition is only useful if replacing it with a
//! single node keeps the graph acyclic.
//!
//! ## Reachability
//!
//! Whether a merge is safe depends on which nodes can reach which. The
//! [`ReachabilityIndex`] answers that for every node pair and is computed once
//! per run. The [`PartitionRegistry`] additionally tracks which partitions can
//! reach which other partitions.
//!
//! ## Merging
//!
//! The [`MergeEngine`] walks the graph from the outputs back to the inputs,
//! seeding a partition for every supported node and greedily merging all live
//! partitions into the first one whenever that does not close a cycle.
//!
//! ## Post-processing
//!
//! The [`passes`] re-home projections next to their producer, drop partitions
//! with too little real work, and trim non-compute nodes off partition
//! boundaries.

mod merge;
pub mod passes;
mod reachability;
mod registry;

pub use merge::MergeEngine;
pub use reachability::ReachabilityIndex;
pub use registry::PartitionRegistry;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::graph::NodeId;

/// Unique identifier for a partition within one partitioning run.
///
/// Ids are handed out in creation order and never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A group of nodes proposed for fusion.
///
/// Members are kept sorted by id, which is topological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    id: PartitionId,
    nodes: BTreeSet<NodeId>,
}

impl Partition {
    pub(crate) fn new(id: PartitionId, nodes: BTreeSet<NodeId>) -> Self {
        Self { id, nodes }
    }

    /// Get the partition's ID.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Get the member nodes, in topological order.
    pub fn nodes(&self) -> &BTreeSet<NodeId> {
        &self.nodes
    }

    /// Check whether `node` is a member.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Member nodes as a list, in topological order.
    pub fn to_node_list(&self) -> Vec<NodeId> {
        self.nodes.iter().copied().collect()
    }

    pub(crate) fn add_node(&mut self, node: NodeId) {
        self.nodes.insert(node);
    }

    pub(crate) fn remove_node(&mut self, node: NodeId) -> bool {
        self.nodes.remove(&node)
    }

    pub(crate) fn set_nodes(&mut self, nodes: BTreeSet<NodeId>) {
        self.nodes = nodes;
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition {} {{", self.id)?;
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", node)?;
        }
        f.write_str("}")
    }
}
