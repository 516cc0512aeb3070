//! Coalesce Core
//!
//! This crate groups the nodes of a computation graph into partitions that a
//! back-end can fuse into single compiled units. It implements:
//!
//! - A graph model with closed operator kinds and JSON loading
//! - Pluggable operator support oracles
//! - A greedy, cycle-safe partitioner with post-processing passes
//! - A graph rewrite collapsing each partition into one node
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: The DAG being partitioned and the [`GraphView`] it is read through
//! - `support`: Deciding which nodes may be partitioned at all
//! - `partition`: Reachability, the partition registry, merging and passes
//! - `partitioner`: The end-to-end driver
//! - `fuse`: Rewriting a graph from its partitions
//!
//! # Example
//!
//! ```rust,ignore
//! use coalesce_core::{FuseByPartitions, Graph, Partitioner, SupportedTargets, Target};
//!
//! let mut graph = Graph::new();
//! let x = graph.placeholder("x");
//! let a = graph.call("a", Target::Relu, &[x]);
//! let b = graph.call("b", Target::Neg, &[a]);
//! graph.output(&[b]);
//!
//! let support = SupportedTargets::new([Target::Relu, Target::Neg]);
//! let fusion = Partitioner::new(&graph, support).partition_and_fuse(&mut FuseByPartitions::new())?;
//!
//! // x -> fused_0 -> output
//! assert_eq!(fusion.graph.graph.len(), 3);
//! ```

pub mod config;
pub mod error;
pub mod fuse;
pub mod graph;
pub mod partition;
pub mod partitioner;
pub mod support;

#[cfg(feature = "python")]
mod python;

pub use config::PartitionerConfig;
pub use error::{FuseError, GraphError, PartitionError, RegistryError, Result, SupportError};
pub use fuse::{FuseByPartitions, FusedGraph, FusedModule, GraphRewriter};
pub use graph::{Graph, GraphView, NodeId, OpKind, Target};
pub use partition::{Partition, PartitionId};
pub use partitioner::{Fusion, Partitioner};
pub use support::{create_op_support, AnyChain, Chain, OperatorSupport, SupportedTargets};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module definition.
///
/// This function is called by Python when importing the module.
/// It registers all Python-exposed functions.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)?;

    // Add version info
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
