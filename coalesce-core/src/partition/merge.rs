//! Greedy Merge Engine
//!
//! Builds provisional partitions by walking the graph in reverse topological
//! order (users before producers).
//!
//! # Algorithm
//!
//! For each node:
//!
//! 1. If the node is supported and unassigned, seed a partition for it.
//! 2. Collect the partition of every assigned node into an insertion-ordered
//!    set of merge candidates. This scans all assignments, not just the
//!    neighbours of the current node, so any live partitions that can be
//!    coalesced are.
//! 3. Try to merge every other candidate into the first one.
//!
//! A merge is checked against a copy of the merged member set before the
//! registry is touched, and committed only if it cannot create a cycle. A
//! rejected merge is not retried.

use std::collections::BTreeSet;

use indexmap::IndexSet;
use tracing::trace;

use super::reachability::ReachabilityIndex;
use super::registry::PartitionRegistry;
use super::PartitionId;
use crate::error::{PartitionError, RegistryError, Result};
use crate::graph::{GraphView, NodeId};
use crate::support::OperatorSupport;

/// Greedy, cycle-safe partition merger.
pub struct MergeEngine<'a, G: ?Sized> {
    graph: &'a G,
    index: &'a ReachabilityIndex,
}

impl<'a, G: GraphView + ?Sized> MergeEngine<'a, G> {
    /// Create an engine over `graph`, using its precomputed reachability.
    pub fn new(graph: &'a G, index: &'a ReachabilityIndex) -> Self {
        Self { graph, index }
    }

    /// Run the merge pass, recording partitions in `registry`.
    ///
    /// The support oracle is queried exactly once per node. Its first error
    /// aborts the run.
    pub fn run<S>(&self, support: &S, registry: &mut PartitionRegistry) -> Result<()>
    where
        S: OperatorSupport<G> + ?Sized,
    {
        for node in self.graph.node_ids().rev() {
            let supported = support
                .is_node_supported(self.graph, node)
                .map_err(|source| PartitionError::Support { node, source })?;

            let mut candidates: IndexSet<PartitionId> = IndexSet::new();
            if supported && !registry.is_assigned(node) {
                candidates.insert(registry.seed(node, self.index)?);
            }

            candidates.extend(registry.assigned_partitions());

            let mut candidates = candidates.into_iter();
            if let Some(self_id) = candidates.next() {
                for other_id in candidates {
                    self.try_merge(registry, self_id, other_id)?;
                }
            }
        }

        Ok(())
    }

    /// Merge partition `other_id` into `self_id` unless that would create a
    /// cycle in the coarsened graph.
    ///
    /// Returns whether the merge happened. A rejected merge leaves the
    /// registry unchanged.
    pub fn try_merge(
        &self,
        registry: &mut PartitionRegistry,
        self_id: PartitionId,
        other_id: PartitionId,
    ) -> std::result::Result<bool, RegistryError> {
        let merged = {
            let this = registry
                .partition(self_id)
                .ok_or(RegistryError::UnknownPartition(self_id))?;
            let other = registry
                .partition(other_id)
                .ok_or(RegistryError::UnknownPartition(other_id))?;
            this.nodes().union(other.nodes()).copied().collect::<BTreeSet<NodeId>>()
        };

        if let Some(blocker) = self.find_cycle(registry, self_id, other_id, &merged) {
            trace!(
                partition = %self_id,
                other = %other_id,
                through = %blocker,
                "merge rejected: would create a cycle"
            );
            return Ok(false);
        }

        registry.commit_merge(self_id, other_id, merged)?;
        trace!(partition = %self_id, other = %other_id, "merged partitions");
        Ok(true)
    }

    /// Look for a path that leaves `merged` and comes back into it, either
    /// directly through the graph or through another partition that already
    /// reaches one of the two partitions being merged.
    ///
    /// Returns the frontier user the offending path starts from.
    fn find_cycle(
        &self,
        registry: &PartitionRegistry,
        self_id: PartitionId,
        other_id: PartitionId,
        merged: &BTreeSet<NodeId>,
    ) -> Option<NodeId> {
        let mut frontier: IndexSet<NodeId> = IndexSet::new();
        for &node in merged {
            for &user in self.graph.users(node) {
                if !merged.contains(&user) {
                    frontier.insert(user);
                }
            }
        }

        for &user in &frontier {
            let mut visited_partitions: IndexSet<PartitionId> = IndexSet::new();
            let path = std::iter::once(&user).chain(self.index.descendants(user));

            for &path_node in path {
                if merged.contains(&path_node) {
                    return Some(user);
                }

                let Some(partition) = registry.partition_of(path_node) else {
                    continue;
                };
                if !visited_partitions.insert(partition) {
                    continue;
                }
                let closes_cycle = registry
                    .reachable_from(partition)
                    .is_some_and(|reachable| reachable.contains(&self_id) || reachable.contains(&other_id));
                if closes_cycle {
                    return Some(user);
                }
            }
        }

        None
    }
}
