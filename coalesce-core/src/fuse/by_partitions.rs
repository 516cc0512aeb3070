//! Partition Collapsing
//!
//! # Algorithm
//!
//! 1. Validate the partitions: non-empty, made of existing nodes, pairwise
//!    disjoint.
//! 2. Coarsen the graph: every partition becomes one unit, every other node
//!    stays a unit of its own. Units are numbered by their smallest member.
//! 3. Sort the units topologically, breaking ties by number. A cycle here
//!    means some partition reads one of its own outputs through an outside
//!    node, and the rewrite fails.
//! 4. Emit the units into a fresh graph. A fused unit becomes a
//!    `call_module` node; if several of its members are read from outside,
//!    each of them is replaced by a `getitem` projection of the call.

use indexmap::IndexSet;
use tracing::{debug, instrument};

use super::{FusedGraph, FusedModule, GraphRewriter};
use crate::error::FuseError;
use crate::graph::{topological_order, Graph, GraphView, NodeId, OpKind, Target};

/// Collapses each partition of a [`Graph`] into a `call_module` node.
#[derive(Debug, Clone)]
pub struct FuseByPartitions {
    prefix: String,
}

impl Default for FuseByPartitions {
    fn default() -> Self {
        Self {
            prefix: "fused".to_string(),
        }
    }
}

impl FuseByPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name fused nodes `<prefix>_<i>` instead of `fused_<i>`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// A vertex of the coarsened graph.
#[derive(Debug, Clone, Copy)]
enum Unit {
    Node(NodeId),
    Fused(usize),
}

/// Where a partition meets the rest of the graph.
#[derive(Debug, Default)]
struct Boundary {
    inputs: IndexSet<NodeId>,
    outputs: Vec<NodeId>,
}

impl GraphRewriter<Graph> for FuseByPartitions {
    type Output = FusedGraph;

    #[instrument(skip_all, fields(partitions = partitions.len()))]
    fn fuse(&mut self, graph: &Graph, partitions: &[Vec<NodeId>]) -> Result<FusedGraph, FuseError> {
        let (owner, members) = validate(graph, partitions)?;

        // Coarsen: number units by their smallest member
        let mut units: Vec<Unit> = Vec::new();
        let mut unit_of = vec![0usize; graph.len()];
        let mut partition_unit: Vec<Option<usize>> = vec![None; members.len()];
        for node in graph.node_ids() {
            unit_of[node.index()] = match owner[node.index()] {
                None => {
                    units.push(Unit::Node(node));
                    units.len() - 1
                }
                Some(p) => *partition_unit[p].get_or_insert_with(|| {
                    units.push(Unit::Fused(p));
                    units.len() - 1
                }),
            };
        }

        let dependencies: Vec<IndexSet<usize>> = units
            .iter()
            .enumerate()
            .map(|(u, unit)| {
                let nodes: &[NodeId] = match unit {
                    Unit::Node(node) => std::slice::from_ref(node),
                    Unit::Fused(p) => &members[*p],
                };
                nodes
                    .iter()
                    .flat_map(|&node| graph.inputs(node))
                    .map(|input| unit_of[input.index()])
                    .filter(|&dep| dep != u)
                    .collect()
            })
            .collect();

        let order = topological_order(units.len(), |u| dependencies[u].clone()).map_err(|stuck| {
            let mut nodes: Vec<NodeId> = stuck
                .into_iter()
                .flat_map(|u| match units[u] {
                    Unit::Node(node) => vec![node],
                    Unit::Fused(p) => members[p].clone(),
                })
                .collect();
            nodes.sort_unstable();
            FuseError::CyclicFusion { nodes }
        })?;

        let boundaries: Vec<Boundary> = members
            .iter()
            .enumerate()
            .map(|(p, nodes)| boundary(graph, &owner, p, nodes))
            .collect();

        let mut fused = Graph::new();
        let mut value: Vec<Option<NodeId>> = vec![None; graph.len()];
        let mut module_nodes: Vec<Option<NodeId>> = vec![None; members.len()];

        for u in order {
            match units[u] {
                Unit::Node(id) => {
                    let node = graph.node(id);
                    let inputs = remap(&value, node.inputs());
                    value[id.index()] = Some(fused.add_node(node.name(), node.op(), &inputs));
                }
                Unit::Fused(p) => {
                    let boundary = &boundaries[p];
                    let inputs = remap(&value, &boundary.inputs);
                    let call = fused.add_node(
                        format!("{}_{}", self.prefix, p),
                        OpKind::CallModule { module: p as u32 },
                        &inputs,
                    );
                    module_nodes[p] = Some(call);

                    if let [single] = boundary.outputs.as_slice() {
                        value[single.index()] = Some(call);
                    } else {
                        for &output in &boundary.outputs {
                            let projection = fused.call(graph.name(output), Target::GetItem, &[call]);
                            value[output.index()] = Some(projection);
                        }
                    }
                }
            }
        }

        let modules: Vec<FusedModule> = members
            .into_iter()
            .zip(boundaries)
            .zip(module_nodes)
            .filter_map(|((nodes, boundary), node)| {
                let node = node?;
                Some(FusedModule {
                    name: fused.name(node).to_string(),
                    node,
                    nodes,
                    inputs: boundary.inputs.into_iter().collect(),
                    outputs: boundary.outputs,
                })
            })
            .collect();

        debug!(nodes = fused.len(), modules = modules.len(), "fused graph built");
        Ok(FusedGraph { graph: fused, modules })
    }
}

/// Check the partitions and map every node to the partition owning it.
///
/// Returns the owner table and each partition's members, sorted and
/// deduplicated.
fn validate(graph: &Graph, partitions: &[Vec<NodeId>]) -> Result<(Vec<Option<usize>>, Vec<Vec<NodeId>>), FuseError> {
    let mut owner: Vec<Option<usize>> = vec![None; graph.len()];
    let mut members = Vec::with_capacity(partitions.len());

    for (p, partition) in partitions.iter().enumerate() {
        if partition.is_empty() {
            return Err(FuseError::EmptyPartition { partition: p });
        }

        let mut nodes = Vec::with_capacity(partition.len());
        for &node in partition {
            if node.index() >= graph.len() {
                return Err(FuseError::UnknownNode { partition: p, node });
            }
            match owner[node.index()] {
                Some(first) if first == p => {}
                Some(first) => {
                    return Err(FuseError::OverlappingPartitions {
                        node,
                        first,
                        second: p,
                    })
                }
                None => {
                    owner[node.index()] = Some(p);
                    nodes.push(node);
                }
            }
        }

        nodes.sort_unstable();
        members.push(nodes);
    }

    Ok((owner, members))
}

fn boundary(graph: &Graph, owner: &[Option<usize>], partition: usize, nodes: &[NodeId]) -> Boundary {
    let outside = |node: &NodeId| owner[node.index()] != Some(partition);

    let mut boundary = Boundary::default();
    for &node in nodes {
        boundary
            .inputs
            .extend(graph.inputs(node).iter().copied().filter(|input| outside(input)));
        if graph.users(node).iter().any(|user| outside(user)) {
            boundary.outputs.push(node);
        }
    }
    boundary
}

fn remap<'a>(value: &[Option<NodeId>], nodes: impl IntoIterator<Item = &'a NodeId>) -> Vec<NodeId> {
    nodes.into_iter().filter_map(|node| value[node.index()]).collect()
}
