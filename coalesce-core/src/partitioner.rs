//! Capability-based Partitioner
//!
//! Ties the passes together: build the reachability index, merge supported
//! nodes greedily, post-process the result and hand the partitions to a
//! graph rewriter.

use tracing::{debug, instrument};

use crate::config::PartitionerConfig;
use crate::error::Result;
use crate::fuse::GraphRewriter;
use crate::graph::{GraphView, NodeId};
use crate::partition::{passes, MergeEngine, Partition, PartitionRegistry, ReachabilityIndex};
use crate::support::OperatorSupport;

/// Partitions of a graph together with the rewrite built from them.
#[derive(Debug, Clone)]
pub struct Fusion<T> {
    /// The partitions handed to the rewriter.
    pub partitions: Vec<Partition>,

    /// What the rewriter produced.
    pub graph: T,
}

/// Groups the nodes of a graph that an [`OperatorSupport`] oracle accepts
/// into acyclic partitions.
///
/// # Example
///
/// ```rust,ignore
/// use coalesce_core::{Graph, Partitioner, SupportedTargets, Target};
///
/// let mut graph = Graph::new();
/// let x = graph.placeholder("x");
/// let a = graph.call("a", Target::Relu, &[x]);
/// let b = graph.call("b", Target::Neg, &[a]);
/// graph.output(&[b]);
///
/// let support = SupportedTargets::new([Target::Relu, Target::Neg]);
/// let partitions = Partitioner::new(&graph, support).propose_partitions()?;
/// assert_eq!(partitions[0].to_node_list(), vec![a, b]);
/// ```
pub struct Partitioner<'g, G: ?Sized, S> {
    graph: &'g G,
    support: S,
    config: PartitionerConfig,
}

impl<'g, G, S> Partitioner<'g, G, S>
where
    G: GraphView + ?Sized,
    S: OperatorSupport<G>,
{
    /// Create a partitioner with the default configuration.
    pub fn new(graph: &'g G, support: S) -> Self {
        Self {
            graph,
            support,
            config: PartitionerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PartitionerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PartitionerConfig {
        &self.config
    }

    pub fn graph(&self) -> &'g G {
        self.graph
    }

    /// Propose partitions for the graph.
    ///
    /// Every returned partition is non-empty, no node appears in two of them,
    /// and replacing each of them by a single node leaves the graph acyclic.
    /// The result depends only on the graph, the oracle's answers and the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Fails if the support oracle fails, or if a registry invariant is
    /// found broken.
    #[instrument(skip_all, fields(nodes = self.graph.node_count()))]
    pub fn propose_partitions(&self) -> Result<Vec<Partition>> {
        let index = ReachabilityIndex::build(self.graph);
        debug!(pairs = index.pair_count(), "reachability index built");

        let mut registry = PartitionRegistry::new();
        MergeEngine::new(self.graph, &index).run(&self.support, &mut registry)?;
        debug!(partitions = registry.len(), "merge pass finished");

        let moved = passes::rehome_projections(self.graph, &mut registry)?;
        debug!(moved, "projections re-homed");

        if !self.config.allow_single_node_partitions {
            let removed = passes::remove_degenerate_partitions(self.graph, &mut registry, &self.config)?;
            debug!(removed = removed.len(), "degenerate partitions removed");
        }

        let mut partitions = registry.into_partitions();

        if self.config.remove_bookend_non_compute {
            let trimmed = passes::remove_bookend_non_compute_ops(self.graph, &mut partitions, &self.config);
            debug!(trimmed, "bookend nodes trimmed");
        }

        for partition in &partitions {
            let names: Vec<&str> = partition.nodes().iter().map(|&node| self.graph.name(node)).collect();
            debug!(partition = %partition.id(), nodes = ?names, "proposed partition");
        }

        Ok(partitions)
    }

    /// Trim non-compute nodes off the boundaries of `partitions`.
    ///
    /// Returns the number of nodes removed. Partitions left empty are
    /// dropped.
    pub fn remove_bookend_non_compute_ops(&self, partitions: &mut Vec<Partition>) -> usize {
        passes::remove_bookend_non_compute_ops(self.graph, partitions, &self.config)
    }

    /// Hand `partitions` to `rewriter` in one call.
    ///
    /// # Errors
    ///
    /// A rewrite failure is returned as [`PartitionError::Fuse`] unchanged.
    ///
    /// [`PartitionError::Fuse`]: crate::error::PartitionError::Fuse
    #[instrument(skip_all, fields(partitions = partitions.len()))]
    pub fn fuse_partitions<R>(&self, partitions: &[Partition], rewriter: &mut R) -> Result<R::Output>
    where
        R: GraphRewriter<G> + ?Sized,
    {
        let lists: Vec<Vec<NodeId>> = partitions.iter().map(Partition::to_node_list).collect();
        Ok(rewriter.fuse(self.graph, &lists)?)
    }

    /// Propose partitions, then fuse them.
    pub fn partition_and_fuse<R>(&self, rewriter: &mut R) -> Result<Fusion<R::Output>>
    where
        R: GraphRewriter<G> + ?Sized,
    {
        let partitions = self.propose_partitions()?;
        let graph = self.fuse_partitions(&partitions, rewriter)?;
        Ok(Fusion { partitions, graph })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FuseError, PartitionError};
    use crate::graph::{Graph, Target};
    use crate::support::SupportedTargets;

    /// Rewriter that records what it was asked to fuse.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<Vec<Vec<NodeId>>>,
        reject: bool,
    }

    impl GraphRewriter<Graph> for Recorder {
        type Output = usize;

        fn fuse(&mut self, _graph: &Graph, partitions: &[Vec<NodeId>]) -> std::result::Result<usize, FuseError> {
            self.calls.push(partitions.to_vec());
            if self.reject {
                return Err(FuseError::Rejected {
                    partition: 0,
                    reason: "no kernel".to_string(),
                });
            }
            Ok(partitions.len())
        }
    }

    fn two_branches() -> (Graph, [NodeId; 3]) {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let v = graph.call("v", Target::View, &[x]);
        let a = graph.call("a", Target::Relu, &[v]);
        let b = graph.call("b", Target::Neg, &[a]);
        graph.output(&[b]);
        (graph, [v, a, b])
    }

    #[test]
    fn single_node_partitions_need_opt_in() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let a = graph.call("a", Target::Relu, &[x]);
        graph.output(&[a]);

        let support = SupportedTargets::new([Target::Relu]);
        assert!(Partitioner::new(&graph, &support).propose_partitions().unwrap().is_empty());

        let config = PartitionerConfig::new().with_single_node_partitions(true);
        let partitions = Partitioner::new(&graph, &support)
            .with_config(config)
            .propose_partitions()
            .unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].to_node_list(), vec![a]);
    }

    #[test]
    fn bookend_trimming_runs_when_configured() {
        let (graph, [v, a, b]) = two_branches();
        let support = SupportedTargets::new([Target::View, Target::Relu, Target::Neg]);
        let config = PartitionerConfig::new().with_non_compute([Target::View]);

        let untrimmed = Partitioner::new(&graph, &support)
            .with_config(config.clone())
            .propose_partitions()
            .unwrap();
        assert_eq!(untrimmed[0].to_node_list(), vec![v, a, b]);

        let partitioner = Partitioner::new(&graph, &support).with_config(config.with_bookend_trimming(true));
        let trimmed = partitioner.propose_partitions().unwrap();
        assert_eq!(trimmed[0].to_node_list(), vec![a, b]);

        let mut again = trimmed.clone();
        assert_eq!(partitioner.remove_bookend_non_compute_ops(&mut again), 0);
        assert_eq!(again, trimmed);
    }

    #[test]
    fn rewriter_is_called_once_with_every_partition() {
        let (graph, [v, a, b]) = two_branches();
        let support = SupportedTargets::new([Target::View, Target::Relu, Target::Neg]);
        let mut recorder = Recorder::default();

        let fusion = Partitioner::new(&graph, &support)
            .partition_and_fuse(&mut recorder)
            .unwrap();

        assert_eq!(fusion.graph, 1);
        assert_eq!(recorder.calls, vec![vec![vec![v, a, b]]]);
    }

    #[test]
    fn rewrite_failure_propagates_unchanged() {
        let (graph, _) = two_branches();
        let support = SupportedTargets::new([Target::Relu, Target::Neg]);
        let mut recorder = Recorder {
            reject: true,
            ..Recorder::default()
        };

        let partitioner = Partitioner::new(&graph, &support);
        let partitions = partitioner.propose_partitions().unwrap();
        let err = partitioner.fuse_partitions(&partitions, &mut recorder).unwrap_err();

        assert!(matches!(
            err,
            PartitionError::Fuse(FuseError::Rejected { partition: 0, ref reason }) if reason == "no kernel"
        ));
        assert_eq!(recorder.calls.len(), 1);
    }
}
