//! Partition Registry
//!
//! The mutable state of a partitioning run:
//!
//! - partitions by id, in creation order
//! - the assignment of nodes to partitions, in first-assignment order
//! - the partition reachability graph: which partitions can reach which
//!
//! The assignment is a function: a node is in partition `p` exactly when
//! `partition_of(node) == Some(p)`. Every mutation keeps that true, and
//! every operation that would break it fails with a [`RegistryError`].

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use super::reachability::ReachabilityIndex;
use super::{Partition, PartitionId};
use crate::error::RegistryError;
use crate::graph::NodeId;

/// Partitions, node assignment and partition-level reachability.
#[derive(Debug, Clone, Default)]
pub struct PartitionRegistry {
    /// Live partitions, indexed by ID.
    partitions: IndexMap<PartitionId, Partition>,

    /// Node to partition mapping. Iteration order is the order in which nodes
    /// were first assigned; reassigning a node keeps its position.
    assignment: IndexMap<NodeId, PartitionId>,

    /// For each partition, the partitions reachable from it.
    reachability: IndexMap<PartitionId, IndexSet<PartitionId>>,

    /// Next partition ID to hand out.
    next_id: u32,
}

impl PartitionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of live partitions.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Get a partition by ID.
    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    /// Iterate over live partitions in creation order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Get the partition a node is assigned to.
    pub fn partition_of(&self, node: NodeId) -> Option<PartitionId> {
        self.assignment.get(&node).copied()
    }

    pub fn is_assigned(&self, node: NodeId) -> bool {
        self.assignment.contains_key(&node)
    }

    /// Partition ids of all assigned nodes, in assignment order.
    ///
    /// Ids repeat once per member node.
    pub fn assigned_partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.assignment.values().copied()
    }

    /// Partitions reachable from `id` through the graph.
    pub fn reachable_from(&self, id: PartitionId) -> Option<&IndexSet<PartitionId>> {
        self.reachability.get(&id)
    }

    /// Create a partition containing only `node`.
    ///
    /// The new partition's reachability is derived from the partitions that
    /// already hold descendants or ancestors of `node`.
    pub fn seed(&mut self, node: NodeId, index: &ReachabilityIndex) -> Result<PartitionId, RegistryError> {
        if let Some(partition) = self.partition_of(node) {
            return Err(RegistryError::AlreadyAssigned { node, partition });
        }

        let id = PartitionId(self.next_id);
        self.next_id += 1;

        self.partitions.insert(id, Partition::new(id, BTreeSet::from([node])));
        self.assignment.insert(node, id);

        // Paths out of the node lead to whatever holds its descendants
        let mut reachable = IndexSet::new();
        for descendant in index.descendants(node) {
            if let Some(target) = self.partition_of(*descendant) {
                reachable.insert(target);
            }
        }
        self.reachability.insert(id, reachable);

        // Paths into the node start at whatever holds its ancestors
        for ancestor in index.ancestors(node) {
            if let Some(source) = self.assignment.get(ancestor).copied() {
                if source != id {
                    self.reachability.entry(source).or_default().insert(id);
                }
            }
        }

        trace!(partition = %id, node = %node, "seeded partition");
        Ok(id)
    }

    /// Add an unassigned node to an existing partition.
    pub fn insert_node(&mut self, node: NodeId, id: PartitionId) -> Result<(), RegistryError> {
        if let Some(partition) = self.partition_of(node) {
            return Err(RegistryError::AlreadyAssigned { node, partition });
        }
        let partition = self
            .partitions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownPartition(id))?;
        partition.add_node(node);
        self.assignment.insert(node, id);
        Ok(())
    }

    /// Take a node out of its partition, leaving it unassigned.
    ///
    /// A partition that loses its last node stays registered until
    /// [`remove_empty_partitions`](Self::remove_empty_partitions) is called.
    pub fn remove_node(&mut self, node: NodeId) -> Result<PartitionId, RegistryError> {
        let id = self
            .assignment
            .shift_remove(&node)
            .ok_or(RegistryError::Unassigned(node))?;
        self.detach(node, id)?;
        Ok(id)
    }

    /// Move a single node into `target`, or out of any partition if `target`
    /// is `None`.
    ///
    /// This is a plain reassignment: no cycle check is performed.
    pub fn move_node(&mut self, node: NodeId, target: Option<PartitionId>) -> Result<(), RegistryError> {
        if let Some(target) = target {
            if !self.partitions.contains_key(&target) {
                return Err(RegistryError::UnknownPartition(target));
            }
        }

        match (self.partition_of(node), target) {
            (Some(old), Some(new)) if old == new => Ok(()),
            (Some(old), Some(new)) => {
                // Overwriting keeps the node's place in the assignment order
                self.assignment.insert(node, new);
                self.detach(node, old)?;
                self.partitions
                    .get_mut(&new)
                    .ok_or(RegistryError::UnknownPartition(new))?
                    .add_node(node);
                Ok(())
            }
            (Some(_), None) => self.remove_node(node).map(|_| ()),
            (None, Some(new)) => self.insert_node(node, new),
            (None, None) => Ok(()),
        }
    }

    /// Merge `other_id` into `self_id`, whose members become `merged`.
    ///
    /// The caller has already decided that the merge is safe; `merged` must
    /// be the union of both partitions.
    pub fn commit_merge(
        &mut self,
        self_id: PartitionId,
        other_id: PartitionId,
        merged: BTreeSet<NodeId>,
    ) -> Result<(), RegistryError> {
        if !self.partitions.contains_key(&self_id) {
            return Err(RegistryError::UnknownPartition(self_id));
        }
        let other = self
            .partitions
            .shift_remove(&other_id)
            .ok_or(RegistryError::UnknownPartition(other_id))?;

        for node in other.nodes() {
            self.assignment.insert(*node, self_id);
        }
        if let Some(partition) = self.partitions.get_mut(&self_id) {
            partition.set_nodes(merged);
        }

        let absorbed = self.reachability.shift_remove(&other_id).unwrap_or_default();
        self.redirect(other_id, Some(self_id));
        let reachable = self.reachability.entry(self_id).or_default();
        reachable.extend(absorbed);
        reachable.shift_remove(&self_id);
        reachable.shift_remove(&other_id);

        Ok(())
    }

    /// Delete a partition, leaving its nodes unassigned.
    pub fn remove_partition(&mut self, id: PartitionId) -> Result<Partition, RegistryError> {
        let partition = self
            .partitions
            .shift_remove(&id)
            .ok_or(RegistryError::UnknownPartition(id))?;
        for node in partition.nodes() {
            self.assignment.shift_remove(node);
        }
        self.reachability.shift_remove(&id);
        self.redirect(id, None);
        Ok(partition)
    }

    /// Delete every partition without members.
    pub fn remove_empty_partitions(&mut self) -> Vec<PartitionId> {
        let empty: Vec<PartitionId> = self
            .partitions
            .values()
            .filter(|partition| partition.is_empty())
            .map(Partition::id)
            .collect();
        for &id in &empty {
            self.partitions.shift_remove(&id);
            self.reachability.shift_remove(&id);
            self.redirect(id, None);
            trace!(partition = %id, "dropped empty partition");
        }
        empty
    }

    /// Consume the registry, returning live partitions in creation order.
    pub fn into_partitions(self) -> Vec<Partition> {
        self.partitions.into_values().collect()
    }

    /// Check that the assignment map and the partition member sets describe
    /// the same function from nodes to partitions.
    pub fn is_consistent(&self) -> bool {
        let members: usize = self.partitions.values().map(Partition::len).sum();
        members == self.assignment.len()
            && self.assignment.iter().all(|(node, id)| {
                self.partitions
                    .get(id)
                    .is_some_and(|partition| partition.contains(*node))
            })
    }

    /// Remove `node` from partition `id`'s member set.
    fn detach(&mut self, node: NodeId, id: PartitionId) -> Result<(), RegistryError> {
        self.partitions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownPartition(id))?
            .remove_node(node);
        Ok(())
    }

    /// Replace every reference to `from` in the reachability graph by `to`,
    /// or drop the references if `to` is `None`.
    fn redirect(&mut self, from: PartitionId, to: Option<PartitionId>) {
        for (&source, reachable) in self.reachability.iter_mut() {
            if reachable.shift_remove(&from) {
                if let Some(to) = to {
                    if to != source {
                        reachable.insert(to);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, Target};

    fn chain(len: usize) -> Graph {
        let mut graph = Graph::new();
        let mut prev = graph.placeholder("x");
        for i in 0..len {
            prev = graph.call(format!("n{}", i), Target::Relu, &[prev]);
        }
        graph
    }

    #[test]
    fn seed_creates_single_node_partition() {
        let graph = chain(2);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let id = registry.seed(NodeId::new(2), &index).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.partition_of(NodeId::new(2)), Some(id));
        assert_eq!(registry.partition(id).unwrap().len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn seed_records_partition_reachability() {
        // x -> n0 -> n1
        let graph = chain(2);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let downstream = registry.seed(NodeId::new(2), &index).unwrap();
        let upstream = registry.seed(NodeId::new(0), &index).unwrap();
        let middle = registry.seed(NodeId::new(1), &index).unwrap();

        let from_upstream = registry.reachable_from(upstream).unwrap();
        assert!(from_upstream.contains(&downstream));
        assert!(from_upstream.contains(&middle));
        assert!(registry.reachable_from(middle).unwrap().contains(&downstream));
        assert!(registry.reachable_from(downstream).unwrap().is_empty());
    }

    #[test]
    fn seeding_an_assigned_node_is_a_fault() {
        let graph = chain(1);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let id = registry.seed(NodeId::new(1), &index).unwrap();
        let err = registry.seed(NodeId::new(1), &index).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyAssigned { node: NodeId::new(1), partition: id });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn double_assignment_is_a_fault() {
        let graph = chain(2);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let a = registry.seed(NodeId::new(1), &index).unwrap();
        let b = registry.seed(NodeId::new(2), &index).unwrap();

        assert!(matches!(
            registry.insert_node(NodeId::new(1), b),
            Err(RegistryError::AlreadyAssigned { partition, .. }) if partition == a
        ));
        assert!(registry.is_consistent());
    }

    #[test]
    fn unknown_partition_is_a_fault() {
        let mut registry = PartitionRegistry::new();
        let missing = PartitionId::from(9);

        assert_eq!(
            registry.insert_node(NodeId::new(0), missing),
            Err(RegistryError::UnknownPartition(missing))
        );
        assert_eq!(
            registry.commit_merge(missing, PartitionId::from(3), BTreeSet::new()),
            Err(RegistryError::UnknownPartition(missing))
        );
        assert!(registry.remove_partition(missing).is_err());
    }

    #[test]
    fn commit_merge_moves_members_and_reachability() {
        let graph = chain(3);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let tail = registry.seed(NodeId::new(3), &index).unwrap();
        let mid = registry.seed(NodeId::new(2), &index).unwrap();
        let head = registry.seed(NodeId::new(1), &index).unwrap();

        let merged: BTreeSet<NodeId> = [NodeId::new(2), NodeId::new(3)].into_iter().collect();
        registry.commit_merge(mid, tail, merged).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.partition(tail).is_none());
        assert!(registry.reachable_from(tail).is_none());
        assert_eq!(registry.partition_of(NodeId::new(3)), Some(mid));

        // head used to reach tail; it now reaches the merged partition
        let from_head = registry.reachable_from(head).unwrap();
        assert!(from_head.contains(&mid));
        assert!(!from_head.contains(&tail));
        assert!(!registry.reachable_from(mid).unwrap().contains(&mid));
        assert!(registry.is_consistent());
    }

    #[test]
    fn move_node_keeps_assignment_position() {
        let graph = chain(3);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let a = registry.seed(NodeId::new(3), &index).unwrap();
        let b = registry.seed(NodeId::new(2), &index).unwrap();
        registry.insert_node(NodeId::new(1), b).unwrap();

        registry.move_node(NodeId::new(2), Some(a)).unwrap();

        let order: Vec<PartitionId> = registry.assigned_partitions().collect();
        assert_eq!(order, vec![a, a, b]);
        assert_eq!(registry.partition(b).unwrap().len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn emptied_partitions_are_pruned_on_request() {
        let graph = chain(2);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let a = registry.seed(NodeId::new(2), &index).unwrap();
        let b = registry.seed(NodeId::new(1), &index).unwrap();

        registry.move_node(NodeId::new(1), Some(a)).unwrap();
        assert!(registry.partition(b).unwrap().is_empty());
        assert_eq!(registry.partition(a).unwrap().len(), 2);

        // An emptied partition can still receive nodes until it is pruned
        registry.move_node(NodeId::new(1), Some(b)).unwrap();
        registry.move_node(NodeId::new(1), None).unwrap();
        assert!(!registry.is_assigned(NodeId::new(1)));

        assert_eq!(registry.remove_empty_partitions(), vec![b]);
        assert!(registry.partition(b).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn remove_partition_unassigns_members() {
        let graph = chain(2);
        let index = ReachabilityIndex::build(&graph);
        let mut registry = PartitionRegistry::new();

        let a = registry.seed(NodeId::new(2), &index).unwrap();
        registry.insert_node(NodeId::new(1), a).unwrap();

        let removed = registry.remove_partition(a).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty());
        assert!(!registry.is_assigned(NodeId::new(1)));
        assert!(registry.is_consistent());
    }
}
