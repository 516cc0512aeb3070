//! Graph Nodes
//!
//! This module defines the node types that live in the computation graph.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Unique identifier for a node in the computation graph.
///
/// Ids are dense indices. Every graph numbers its nodes in topological
/// order, so a producer always has a smaller id than its users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Create an id from a dense index.
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Get the index of this node in its graph.
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The operator a `call_function` node invokes.
///
/// This is a closed set: classification of nodes (compute vs. non-compute,
/// projection vs. real work) is a membership test on these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    // Views and layout
    View,
    Reshape,
    Permute,
    Transpose,
    Expand,
    Clone,

    /// Extract one element of a multi-result producer.
    #[serde(rename = "getitem")]
    GetItem,

    // Elementwise
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Relu,
    Gelu,
    Sigmoid,
    Tanh,
    Exp,

    // Reductions and structured ops
    #[serde(rename = "matmul")]
    MatMul,
    Sum,
    Mean,
    Softmax,
    Cat,
    Split,
}

impl Target {
    /// Fully qualified operator name, as printed in graph dumps.
    pub fn qualified_name(&self) -> &'static str {
        match self {
            Target::View => "aten.view",
            Target::Reshape => "aten.reshape",
            Target::Permute => "aten.permute",
            Target::Transpose => "aten.transpose",
            Target::Expand => "aten.expand",
            Target::Clone => "aten.clone",
            Target::GetItem => "_operator.getitem",
            Target::Add => "aten.add",
            Target::Sub => "aten.sub",
            Target::Mul => "aten.mul",
            Target::Div => "aten.div",
            Target::Neg => "aten.neg",
            Target::Relu => "aten.relu",
            Target::Gelu => "aten.gelu",
            Target::Sigmoid => "aten.sigmoid",
            Target::Tanh => "aten.tanh",
            Target::Exp => "aten.exp",
            Target::MatMul => "aten.mm",
            Target::Sum => "aten.sum",
            Target::Mean => "aten.mean",
            Target::Softmax => "aten._softmax",
            Target::Cat => "aten.cat",
            Target::Split => "aten.split",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qualified_name())
    }
}

/// The kind of node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    /// A graph input. Has no inputs of its own.
    Placeholder,

    /// A parameter or buffer fetched from the owning module.
    GetAttr,

    /// A call to a free operator.
    CallFunction { target: Target },

    /// A call into a submodule, such as a fused partition.
    CallModule { module: u32 },

    /// The graph's return node.
    Output,
}

impl OpKind {
    /// The target of a `call_function` node, if this is one.
    pub fn target(&self) -> Option<Target> {
        match self {
            OpKind::CallFunction { target } => Some(*target),
            _ => None,
        }
    }

    /// Check whether this is a `call_function` of the given target.
    pub fn is_call_to(&self, target: Target) -> bool {
        self.target() == Some(target)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Placeholder => f.write_str("placeholder"),
            OpKind::GetAttr => f.write_str("get_attr"),
            OpKind::CallFunction { target } => write!(f, "call_function[{}]", target),
            OpKind::CallModule { module } => write!(f, "call_module[{}]", module),
            OpKind::Output => f.write_str("output"),
        }
    }
}

/// Edge lists are short for almost every operator.
pub type NodeList = SmallVec<[NodeId; 4]>;

/// A node in the computation graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// Unique, human-readable name.
    name: String,

    /// What this node computes.
    op: OpKind,

    /// Nodes that this node reads from, without duplicates.
    inputs: NodeList,

    /// Nodes that read from this node, without duplicates, in the order the
    /// edges were added.
    users: NodeList,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, op: OpKind) -> Self {
        Self {
            id,
            name,
            op,
            inputs: NodeList::new(),
            users: NodeList::new(),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the node's kind.
    pub fn op(&self) -> OpKind {
        self.op
    }

    /// Get all inputs.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Get all users.
    pub fn users(&self) -> &[NodeId] {
        &self.users
    }

    /// Add an input (a node that this node reads from).
    pub(crate) fn add_input(&mut self, node_id: NodeId) -> bool {
        if self.inputs.contains(&node_id) {
            return false;
        }
        self.inputs.push(node_id);
        true
    }

    /// Add a user (a node that reads from this node).
    pub(crate) fn add_user(&mut self, node_id: NodeId) {
        if !self.users.contains(&node_id) {
            self.users.push(node_id);
        }
    }
}
