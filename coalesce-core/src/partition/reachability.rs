//! Reachability Index
//!
//! Precomputed forward and backward reachability for every node.
//!
//! # Algorithm
//!
//! For each node we run an iterative depth-first search over its users.
//! Every user reached is recorded as a descendant of the root, and the root
//! is recorded as an ancestor of that user in the same step, so both tables
//! come out of a single pass.
//!
//! The relation is dense in the worst case (quadratic in the node count).
//! That is accepted: merge decisions query it constantly and an exact answer
//! is required.

use indexmap::IndexSet;

use crate::graph::{GraphView, NodeId};

/// Forward and backward reachability of every node in a graph.
///
/// Built once per partitioning run and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ReachabilityIndex {
    /// `descendants[n]`: every node reachable from `n` along user edges.
    descendants: Vec<IndexSet<NodeId>>,

    /// `ancestors[n]`: every node from which `n` is reachable.
    ancestors: Vec<IndexSet<NodeId>>,
}

impl ReachabilityIndex {
    /// Compute the index for `graph`.
    pub fn build<G: GraphView + ?Sized>(graph: &G) -> Self {
        let count = graph.node_count();
        let mut descendants: Vec<IndexSet<NodeId>> = vec![IndexSet::new(); count];
        let mut ancestors: Vec<IndexSet<NodeId>> = vec![IndexSet::new(); count];

        // visited[n] == root + 1 marks n as seen in the search from root,
        // which avoids clearing a visited table for every root.
        let mut visited = vec![0usize; count];
        let mut stack = Vec::new();

        for root in graph.node_ids() {
            let stamp = root.index() + 1;
            let reached = &mut descendants[root.index()];
            stack.push(root);

            while let Some(node) = stack.pop() {
                for &user in graph.users(node) {
                    if visited[user.index()] == stamp {
                        continue;
                    }
                    visited[user.index()] = stamp;
                    reached.insert(user);
                    ancestors[user.index()].insert(root);
                    stack.push(user);
                }
            }
        }

        Self { descendants, ancestors }
    }

    /// Every node reachable from `node`, excluding `node` itself.
    pub fn descendants(&self, node: NodeId) -> &IndexSet<NodeId> {
        &self.descendants[node.index()]
    }

    /// Every node that can reach `node`, excluding `node` itself.
    pub fn ancestors(&self, node: NodeId) -> &IndexSet<NodeId> {
        &self.ancestors[node.index()]
    }

    /// Check whether there is a non-empty path from `from` to `to`.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        self.descendants[from.index()].contains(&to)
    }

    /// Get the number of nodes covered by the index.
    pub fn node_count(&self) -> usize {
        self.descendants.len()
    }

    /// Total number of (node, descendant) pairs.
    pub fn pair_count(&self) -> usize {
        self.descendants.iter().map(IndexSet::len).sum()
    }
}
