use serde::{Deserialize, Serialize};

use super::node::{NodeId, PinId};

/// One step along a branch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowRef {
    Node(NodeId),
    Pin(PinId),
}

/// One outgoing path from a node, computed by exploration.
///
/// Branches are produced fresh on every traversal call and describe the
/// route only; they hold no state of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Position in the list the branch was returned in.
    pub index: usize,
    pub origin: NodeId,
    pub target: NodeId,
    /// Pins and nodes in traversal order. The last entry is always `Node(target)`.
    pub path: Vec<FlowRef>,
    /// False if a pin guard along the path evaluated false.
    pub is_valid: bool,
}

impl Branch {
    /// Nodes along the path, target last.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.path.iter().filter_map(|step| match step {
            FlowRef::Node(id) => Some(*id),
            FlowRef::Pin(_) => None,
        })
    }

    /// Pins along the path, in the order they were crossed.
    pub fn pins(&self) -> impl Iterator<Item = PinId> + '_ {
        self.path.iter().filter_map(|step| match step {
            FlowRef::Pin(id) => Some(*id),
            FlowRef::Node(_) => None,
        })
    }

    pub fn passes_through(&self, node: NodeId) -> bool {
        self.nodes().any(|n| n == node)
    }
}

/// Why a partial path was dropped during exploration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// A connection's target pin no longer exists.
    Dangling { source: PinId, target: PinId },
    /// A jump's target node no longer exists.
    DanglingTarget { jump: NodeId, target: NodeId },
    /// A node does not have the pin layout its kind requires.
    Malformed { node: NodeId, reason: String },
    /// The path grew beyond the configured depth.
    DepthLimit { node: NodeId, depth: usize },
}

/// A diagnostic for a path pruned during exploration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedBranch {
    pub origin: NodeId,
    /// The path up to the point where it was pruned.
    pub path: Vec<FlowRef>,
    pub reason: SkipReason,
}

/// The result of one exploration call: branches in output-pin order plus
/// diagnostics for anything structurally broken that was pruned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BranchSet {
    pub branches: Vec<Branch>,
    pub skipped: Vec<SkippedBranch>,
}

impl BranchSet {
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Branch> {
        self.branches.get(index)
    }

    pub fn targets(&self) -> Vec<NodeId> {
        self.branches.iter().map(|b| b.target).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Branch> {
        self.branches.iter()
    }
}
