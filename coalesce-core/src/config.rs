//! Partitioner Configuration
//!
//! Controls which partitions survive post-processing and which operators are
//! considered real computation.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::graph::Target;

/// Operators that never count as computation when scoring partitions.
pub const DEFAULT_NON_COMPUTE: [Target; 2] = [Target::View, Target::GetItem];

/// Configuration for a partitioning run.
///
/// Every field has a default, so a JSON config only needs to name the
/// fields it changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionerConfig {
    /// Keep partitions with at most one compute node.
    pub allow_single_node_partitions: bool,

    /// Operators that do no real work. They never count towards a
    /// partition's compute score (in addition to [`DEFAULT_NON_COMPUTE`]),
    /// and they are the nodes boundary trimming may remove.
    pub non_compute_kinds: IndexSet<Target>,

    /// Operators that score an extra compute point, so that a partition made
    /// of one of them survives on its own.
    pub always_count_as_compute: IndexSet<Target>,

    /// Trim non-compute nodes off partition boundaries as the last pass of
    /// `propose_partitions`.
    pub remove_bookend_non_compute: bool,
}

impl PartitionerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_single_node_partitions(mut self, allow: bool) -> Self {
        self.allow_single_node_partitions = allow;
        self
    }

    pub fn with_non_compute(mut self, targets: impl IntoIterator<Item = Target>) -> Self {
        self.non_compute_kinds.extend(targets);
        self
    }

    pub fn with_always_compute(mut self, targets: impl IntoIterator<Item = Target>) -> Self {
        self.always_count_as_compute.extend(targets);
        self
    }

    pub fn with_bookend_trimming(mut self, enabled: bool) -> Self {
        self.remove_bookend_non_compute = enabled;
        self
    }

    /// Check whether `target` is excluded from compute scoring.
    pub fn is_non_compute(&self, target: Target) -> bool {
        DEFAULT_NON_COMPUTE.contains(&target) || self.non_compute_kinds.contains(&target)
    }

    /// Check whether `target` may be trimmed from a partition boundary.
    ///
    /// Only the configured kinds qualify: a projection re-homed next to its
    /// producer stays there.
    pub fn is_trimmable(&self, target: Target) -> bool {
        self.non_compute_kinds.contains(&target)
    }

    /// Compute points scored by a node calling `target`.
    pub fn compute_score(&self, target: Target) -> usize {
        let mut score = 0;
        if !self.is_non_compute(target) {
            score += 1;
        }
        if self.always_count_as_compute.contains(&target) {
            score += 1;
        }
        score
    }
}
