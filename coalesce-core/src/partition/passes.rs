//! Post-processing Passes
//!
//! Passes run after the merge engine, in this order:
//!
//! 1. [`rehome_projections`]: move `getitem` projections into the partition
//!    of the tuple they read from.
//! 2. [`remove_degenerate_partitions`]: drop partitions with at most one
//!    compute node.
//! 3. [`remove_bookend_non_compute_ops`]: trim non-compute nodes that sit on
//!    a partition boundary.
//!
//! None of them re-checks acyclicity. Re-homing only moves a projection next
//! to its producer; the other two only shrink partitions.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;
use tracing::{debug, trace};

use super::registry::PartitionRegistry;
use super::{Partition, PartitionId};
use crate::config::PartitionerConfig;
use crate::error::RegistryError;
use crate::graph::{GraphView, NodeId, OpKind, Target};

/// Move projections of tuple-producing nodes into their producer's partition.
///
/// A node is tuple-producing when every user is a `getitem`. Each of its
/// users that sits elsewhere is moved next to it, or out of any partition if
/// the producer is unassigned. Returns the number of nodes moved.
pub fn rehome_projections<G>(graph: &G, registry: &mut PartitionRegistry) -> Result<usize, RegistryError>
where
    G: GraphView + ?Sized,
{
    let mut moves: IndexMap<NodeId, Option<PartitionId>> = IndexMap::new();

    for node in graph.node_ids() {
        let users = graph.users(node);
        let is_tuple_output = users.iter().all(|&user| graph.op(user).is_call_to(Target::GetItem));
        if !is_tuple_output {
            continue;
        }

        let producer = registry.partition_of(node);
        for &user in users {
            if registry.partition_of(user) != producer {
                moves.insert(user, producer);
            }
        }
    }

    for (&node, &target) in &moves {
        trace!(node = %node, ?target, "re-homing projection");
        registry.move_node(node, target)?;
    }

    let emptied = registry.remove_empty_partitions();
    if !emptied.is_empty() {
        debug!(count = emptied.len(), "partitions emptied by projection re-homing");
    }

    Ok(moves.len())
}

/// Number of compute points scored by a partition's members.
pub fn compute_node_count<G>(graph: &G, partition: &Partition, config: &PartitionerConfig) -> usize
where
    G: GraphView + ?Sized,
{
    partition
        .nodes()
        .iter()
        .filter_map(|&node| graph.op(node).target())
        .map(|target| config.compute_score(target))
        .sum()
}

/// Delete every partition scoring at most one compute point.
///
/// Their nodes become unassigned. Returns the ids of the removed partitions.
pub fn remove_degenerate_partitions<G>(
    graph: &G,
    registry: &mut PartitionRegistry,
    config: &PartitionerConfig,
) -> Result<Vec<PartitionId>, RegistryError>
where
    G: GraphView + ?Sized,
{
    let degenerate: Vec<PartitionId> = registry
        .partitions()
        .filter(|partition| compute_node_count(graph, partition, config) <= 1)
        .map(Partition::id)
        .collect();

    for &id in &degenerate {
        let partition = registry.remove_partition(id)?;
        trace!(partition = %id, nodes = partition.len(), "dropped degenerate partition");
    }

    Ok(degenerate)
}

/// Trim non-compute nodes off partition boundaries.
///
/// A non-compute node (one whose target is in
/// [`PartitionerConfig::non_compute_kinds`]) is removed when it is
/// transparent as an input, meaning everything it reads comes from outside
/// the partition through other transparent nodes, or transparent as an
/// output, the symmetric condition over its users. Partitions left empty are
/// dropped. Returns the number of nodes removed.
pub fn remove_bookend_non_compute_ops<G>(
    graph: &G,
    partitions: &mut Vec<Partition>,
    config: &PartitionerConfig,
) -> usize
where
    G: GraphView + ?Sized,
{
    let mut transparency = Transparency::new(graph, config);
    let mut total = 0;

    for partition in partitions.iter_mut() {
        let mut removed: HashSet<NodeId> = HashSet::new();
        for &node in partition.nodes() {
            if transparency.is_non_compute(node)
                && (transparency.is_transparent_input(node, partition.nodes(), &removed)
                    || transparency.is_transparent_output(node, partition.nodes(), &removed))
            {
                removed.insert(node);
            }
        }

        if !removed.is_empty() {
            trace!(partition = %partition.id(), count = removed.len(), "trimmed bookend nodes");
            total += removed.len();
            for node in removed {
                partition.remove_node(node);
            }
        }
    }

    partitions.retain(|partition| !partition.is_empty());
    total
}

/// Memoised transparency of nodes, shared across all partitions of one
/// trimming pass.
struct Transparency<'a, G: ?Sized> {
    graph: &'a G,
    config: &'a PartitionerConfig,
    input: Vec<Option<bool>>,
    output: Vec<Option<bool>>,
}

impl<'a, G: GraphView + ?Sized> Transparency<'a, G> {
    fn new(graph: &'a G, config: &'a PartitionerConfig) -> Self {
        let count = graph.node_count();
        Self {
            graph,
            config,
            input: vec![None; count],
            output: vec![None; count],
        }
    }

    fn is_non_compute(&self, node: NodeId) -> bool {
        self.graph
            .op(node)
            .target()
            .is_some_and(|target| self.config.is_trimmable(target))
    }

    fn is_outside(&self, node: NodeId, partition: &BTreeSet<NodeId>, removed: &HashSet<NodeId>) -> bool {
        self.graph.op(node) == OpKind::Placeholder || !partition.contains(&node) || removed.contains(&node)
    }

    fn is_transparent_input(&mut self, node: NodeId, partition: &BTreeSet<NodeId>, removed: &HashSet<NodeId>) -> bool {
        if self.is_outside(node, partition, removed) {
            return true;
        }
        if let Some(known) = self.input[node.index()] {
            return known;
        }

        let graph = self.graph;
        let transparent = self.is_non_compute(node)
            && graph
                .inputs(node)
                .iter()
                .all(|&input| self.is_transparent_input(input, partition, removed));

        self.input[node.index()] = Some(transparent);
        transparent
    }

    fn is_transparent_output(&mut self, node: NodeId, partition: &BTreeSet<NodeId>, removed: &HashSet<NodeId>) -> bool {
        if self.is_outside(node, partition, removed) {
            return true;
        }
        if let Some(known) = self.output[node.index()] {
            return known;
        }

        let graph = self.graph;
        let transparent = self.is_non_compute(node)
            && graph
                .users(node)
                .iter()
                .all(|&user| self.is_transparent_output(user, partition, removed));

        self.output[node.index()] = Some(transparent);
        transparent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::partition::ReachabilityIndex;

    fn partition_of(nodes: &[NodeId]) -> Partition {
        Partition::new(PartitionId::from(0), nodes.iter().copied().collect())
    }

    #[test]
    fn projections_follow_their_producer() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let s = graph.call("split", Target::Split, &[x]);
        let g0 = graph.call("g0", Target::GetItem, &[s]);
        let g1 = graph.call("g1", Target::GetItem, &[s]);
        let r = graph.call("r", Target::Relu, &[g1]);

        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();
        let ps = registry.seed(s, &index).unwrap();
        let pr = registry.seed(r, &index).unwrap();
        registry.insert_node(g1, pr).unwrap();

        let moved = rehome_projections(&graph, &mut registry).unwrap();

        assert_eq!(moved, 2);
        assert_eq!(registry.partition_of(g0), Some(ps));
        assert_eq!(registry.partition_of(g1), Some(ps));
        assert_eq!(registry.partition_of(r), Some(pr));
        assert!(registry.is_consistent());
    }

    #[test]
    fn projections_of_unassigned_producer_are_unassigned() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let s = graph.call("split", Target::Split, &[x]);
        let g0 = graph.call("g0", Target::GetItem, &[s]);

        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();
        let pg = registry.seed(g0, &index).unwrap();

        rehome_projections(&graph, &mut registry).unwrap();

        assert_eq!(registry.partition_of(g0), None);
        assert!(registry.partition(pg).is_none());
    }

    #[test]
    fn mixed_users_are_left_alone() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let s = graph.call("split", Target::Split, &[x]);
        let g0 = graph.call("g0", Target::GetItem, &[s]);
        let n = graph.call("n", Target::Neg, &[s]);

        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();
        let pg = registry.seed(g0, &index).unwrap();

        assert_eq!(rehome_projections(&graph, &mut registry).unwrap(), 0);
        assert_eq!(registry.partition_of(g0), Some(pg));
        assert_eq!(registry.partition_of(n), None);
    }

    #[test]
    fn nested_projections_move_in_one_pass() {
        // g1 reads g0 which reads the tuple; g0 leaves a partition of its own
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let s = graph.call("split", Target::Split, &[x]);
        let g0 = graph.call("g0", Target::GetItem, &[s]);
        let g1 = graph.call("g1", Target::GetItem, &[g0]);

        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();
        let ps = registry.seed(s, &index).unwrap();
        let pg = registry.seed(g0, &index).unwrap();

        rehome_projections(&graph, &mut registry).unwrap();

        assert_eq!(registry.partition_of(g0), Some(ps));
        // g1 followed g0's partition as it was when the pass started
        assert_eq!(registry.partition_of(g1), Some(pg));
        assert!(registry.is_consistent());
    }

    #[test]
    fn degenerate_partitions_are_removed() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let v = graph.call("v", Target::View, &[x]);
        let a = graph.call("a", Target::Add, &[v]);
        let b = graph.call("b", Target::Mul, &[a]);
        let c = graph.call("c", Target::Relu, &[x]);
        let m = graph.call("m", Target::MatMul, &[x]);

        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();
        let keep = registry.seed(a, &index).unwrap();
        registry.insert_node(b, keep).unwrap();
        let view_only = registry.seed(v, &index).unwrap();
        registry.insert_node(c, view_only).unwrap();
        let heavy = registry.seed(m, &index).unwrap();

        let config = PartitionerConfig::new().with_always_compute([Target::MatMul]);
        let removed = remove_degenerate_partitions(&graph, &mut registry, &config).unwrap();

        assert_eq!(removed, vec![view_only]);
        assert!(registry.partition(keep).is_some());
        assert!(registry.partition(heavy).is_some());
        assert!(!registry.is_assigned(v));
        assert!(registry.is_consistent());
    }

    #[test]
    fn bookend_views_are_trimmed() {
        // x -> v0 -> a -> v1 -> b -> v2 -> out
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let v0 = graph.call("v0", Target::View, &[x]);
        let a = graph.call("a", Target::Add, &[v0]);
        let v1 = graph.call("v1", Target::View, &[a]);
        let b = graph.call("b", Target::Mul, &[v1]);
        let v2 = graph.call("v2", Target::View, &[b]);
        graph.output(&[v2]);

        let config = PartitionerConfig::new().with_non_compute([Target::View]);
        let mut partitions = vec![partition_of(&[v0, a, v1, b, v2])];

        let removed = remove_bookend_non_compute_ops(&graph, &mut partitions, &config);

        assert_eq!(removed, 2);
        assert_eq!(partitions[0].to_node_list(), vec![a, v1, b]);
    }

    #[test]
    fn trimming_chains_of_views() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let v0 = graph.call("v0", Target::View, &[x]);
        let v1 = graph.call("v1", Target::Permute, &[v0]);
        let a = graph.call("a", Target::Add, &[v1, x]);
        graph.output(&[a]);

        let config = PartitionerConfig::new().with_non_compute([Target::View, Target::Permute]);
        let mut partitions = vec![partition_of(&[v0, v1, a])];

        remove_bookend_non_compute_ops(&graph, &mut partitions, &config);
        assert_eq!(partitions[0].to_node_list(), vec![a]);
    }

    #[test]
    fn trimming_is_idempotent() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let v0 = graph.call("v0", Target::View, &[x]);
        let a = graph.call("a", Target::Add, &[v0]);
        let v1 = graph.call("v1", Target::View, &[a]);
        let b = graph.call("b", Target::Mul, &[v1, a]);
        let v2 = graph.call("v2", Target::View, &[b]);
        graph.output(&[v2]);

        let config = PartitionerConfig::new().with_non_compute([Target::View]);
        let mut partitions = vec![partition_of(&[v0, a, v1, b, v2])];

        remove_bookend_non_compute_ops(&graph, &mut partitions, &config);
        let once = partitions.clone();
        assert_eq!(remove_bookend_non_compute_ops(&graph, &mut partitions, &config), 0);
        assert_eq!(partitions, once);
    }

    #[test]
    fn fully_transparent_partition_is_dropped() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let v0 = graph.call("v0", Target::View, &[x]);
        graph.output(&[v0]);

        let config = PartitionerConfig::new().with_non_compute([Target::View]);
        let mut partitions = vec![partition_of(&[v0])];

        assert_eq!(remove_bookend_non_compute_ops(&graph, &mut partitions, &config), 1);
        assert!(partitions.is_empty());
    }
}
