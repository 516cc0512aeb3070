//! Partitioner errors

use thiserror::Error;

use crate::graph::NodeId;
use crate::partition::PartitionId;

/// Error type returned by operator support queries.
///
/// Support predicates are supplied by callers, so their failures are opaque
/// to the partitioner.
pub type SupportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Partitioner result type
pub type Result<T> = std::result::Result<T, PartitionError>;

/// Errors raised while building or loading a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("malformed graph description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    #[error("node {node} reads from unknown node {input}")]
    UnknownInput { node: String, input: String },

    #[error("cycle detected in graph: {nodes:?}")]
    CycleDetected { nodes: Vec<String> },
}

/// Internal-consistency faults of the partition registry.
///
/// These never occur for a correct partitioner; they indicate a broken
/// invariant rather than a property of the input graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("partition {0} does not exist")]
    UnknownPartition(PartitionId),

    #[error("node {node} is already assigned to partition {partition}")]
    AlreadyAssigned { node: NodeId, partition: PartitionId },

    #[error("node {0} is not assigned to any partition")]
    Unassigned(NodeId),
}

/// Errors raised by a graph rewrite while fusing partitions.
#[derive(Debug, Error)]
pub enum FuseError {
    #[error("partition {partition} is empty")]
    EmptyPartition { partition: usize },

    #[error("partition {partition} refers to unknown node {node}")]
    UnknownNode { partition: usize, node: NodeId },

    #[error("node {node} appears in partitions {first} and {second}")]
    OverlappingPartitions { node: NodeId, first: usize, second: usize },

    #[error("fusing partitions would create a cycle through {nodes:?}")]
    CyclicFusion { nodes: Vec<NodeId> },

    #[error("partition {partition} rejected by rewriter: {reason}")]
    Rejected { partition: usize, reason: String },
}

/// Errors surfaced by a partitioning run.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("operator support query failed for node {node}")]
    Support {
        node: NodeId,
        #[source]
        source: SupportError,
    },

    #[error("partition registry invariant violated: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Fuse(#[from] FuseError),
}
