//! Operator Support
//!
//! The partitioner only groups nodes that a back-end can handle. Which nodes
//! those are is decided by an [`OperatorSupport`] oracle supplied by the
//! caller.
//!
//! Oracles must be deterministic and free of observable side effects: the
//! partitioner asks about each node exactly once per run and relies on the
//! answer being reproducible.

use indexmap::IndexSet;

use crate::error::SupportError;
use crate::graph::{GraphView, NodeId, Target};

/// Decides whether a single node may be placed in a partition.
pub trait OperatorSupport<G: ?Sized> {
    /// Check whether `node` is supported.
    ///
    /// An error aborts the partitioning run.
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError>;
}

impl<G, S> OperatorSupport<G> for &S
where
    G: GraphView + ?Sized,
    S: OperatorSupport<G> + ?Sized,
{
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError> {
        (**self).is_node_supported(graph, node)
    }
}

impl<G, S> OperatorSupport<G> for Box<S>
where
    G: GraphView + ?Sized,
    S: OperatorSupport<G> + ?Sized,
{
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError> {
        (**self).is_node_supported(graph, node)
    }
}

/// Supports `call_function` nodes whose target is in a fixed set.
#[derive(Debug, Clone, Default)]
pub struct SupportedTargets {
    targets: IndexSet<Target>,
}

impl SupportedTargets {
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    pub fn targets(&self) -> &IndexSet<Target> {
        &self.targets
    }
}

impl<G: GraphView + ?Sized> OperatorSupport<G> for SupportedTargets {
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError> {
        Ok(graph
            .op(node)
            .target()
            .is_some_and(|target| self.targets.contains(&target)))
    }
}

/// Support decided by an infallible closure. Built by [`create_op_support`].
#[derive(Debug, Clone)]
pub struct FnSupport<F>(F);

impl<G, F> OperatorSupport<G> for FnSupport<F>
where
    G: GraphView + ?Sized,
    F: Fn(&G, NodeId) -> bool,
{
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError> {
        Ok((self.0)(graph, node))
    }
}

/// Support decided by a fallible closure. Built by [`try_create_op_support`].
#[derive(Debug, Clone)]
pub struct TryFnSupport<F>(F);

impl<G, F> OperatorSupport<G> for TryFnSupport<F>
where
    G: GraphView + ?Sized,
    F: Fn(&G, NodeId) -> Result<bool, SupportError>,
{
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError> {
        (self.0)(graph, node)
    }
}

/// Wrap a predicate as an oracle.
pub fn create_op_support<G, F>(predicate: F) -> FnSupport<F>
where
    G: GraphView + ?Sized,
    F: Fn(&G, NodeId) -> bool,
{
    FnSupport(predicate)
}

/// Wrap a fallible predicate as an oracle.
pub fn try_create_op_support<G, F>(predicate: F) -> TryFnSupport<F>
where
    G: GraphView + ?Sized,
    F: Fn(&G, NodeId) -> Result<bool, SupportError>,
{
    TryFnSupport(predicate)
}

/// Supported only if every oracle in the chain agrees.
///
/// Oracles are asked in order; the first `false` or error ends the query.
pub struct Chain<'s, G: ?Sized> {
    supports: Vec<Box<dyn OperatorSupport<G> + 's>>,
}

impl<'s, G: GraphView + ?Sized> Chain<'s, G> {
    pub fn new() -> Self {
        Self { supports: Vec::new() }
    }

    /// Append an oracle to the chain.
    pub fn with(mut self, support: impl OperatorSupport<G> + 's) -> Self {
        self.supports.push(Box::new(support));
        self
    }
}

impl<G: GraphView + ?Sized> Default for Chain<'_, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GraphView + ?Sized> OperatorSupport<G> for Chain<'_, G> {
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError> {
        for support in &self.supports {
            if !support.is_node_supported(graph, node)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Supported if any oracle in the chain agrees.
///
/// Oracles are asked in order; the first `true` or error ends the query.
pub struct AnyChain<'s, G: ?Sized> {
    supports: Vec<Box<dyn OperatorSupport<G> + 's>>,
}

impl<'s, G: GraphView + ?Sized> AnyChain<'s, G> {
    pub fn new() -> Self {
        Self { supports: Vec::new() }
    }

    /// Append an oracle to the chain.
    pub fn with(mut self, support: impl OperatorSupport<G> + 's) -> Self {
        self.supports.push(Box::new(support));
        self
    }
}

impl<G: GraphView + ?Sized> Default for AnyChain<'_, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GraphView + ?Sized> OperatorSupport<G> for AnyChain<'_, G> {
    fn is_node_supported(&self, graph: &G, node: NodeId) -> Result<bool, SupportError> {
        for support in &self.supports {
            if support.is_node_supported(graph, node)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
