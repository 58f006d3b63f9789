use serde::{Deserialize, Serialize};

use crate::model::frame::FrameId;

/// Index of a node in the call tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One position in the merged call tree: a frame occurring under one
/// specific ancestor path. The same frame may back several nodes when it
/// recurs under different ancestors, or non-adjacently under the same
/// parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTreeNode {
    pub frame: FrameId,
    pub parent: Option<NodeId>,
    /// Child nodes in insertion order.
    pub children: Vec<NodeId>,
    /// Time this node spent as the sampled leaf (µs).
    pub self_time: f64,
    /// Time this node spent anywhere on the sampled stack (µs).
    pub total_time: f64,
}

/// Arena-backed forest of call tree nodes, grown by merging sample stacks.
///
/// Nodes are stored in a flat vector and addressed by `NodeId`; children
/// own the downward direction, `parent` is a plain back-index. Nodes are
/// never removed or reparented once created.
#[derive(Debug, Clone, Default)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
    roots: Vec<NodeId>,
}

impl CallTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Merge one root-to-leaf stack into the forest and account `delta`
    /// against every node on the path, with self time on the leaf only.
    /// Returns the leaf node, or `None` for an empty stack.
    ///
    /// At each depth the incoming frame is compared against the most
    /// recently appended child at that position — not all siblings. A
    /// mismatch opens a fresh sibling, so non-adjacent repeats of an
    /// identical stack stay separate nodes. That keeps the merge O(depth)
    /// per sample and is part of the behavioral contract: callers that
    /// want full-history merging re-sort first (see
    /// `Profile::sorted_alphabetically`).
    pub fn merge_stack(&mut self, stack: &[FrameId], delta: f64) -> Option<NodeId> {
        let mut cursor: Option<NodeId> = None;
        for &frame in stack {
            let last = match cursor {
                Some(parent) => self.nodes[parent.0].children.last().copied(),
                None => self.roots.last().copied(),
            };
            let node = match last {
                Some(node) if self.nodes[node.0].frame == frame => node,
                _ => {
                    let id = NodeId(self.nodes.len());
                    self.nodes.push(CallTreeNode {
                        frame,
                        parent: cursor,
                        children: Vec::new(),
                        self_time: 0.0,
                        total_time: 0.0,
                    });
                    match cursor {
                        Some(parent) => self.nodes[parent.0].children.push(id),
                        None => self.roots.push(id),
                    }
                    id
                }
            };
            self.nodes[node.0].total_time += delta;
            cursor = Some(node);
        }
        let leaf = cursor?;
        self.nodes[leaf.0].self_time += delta;
        Some(leaf)
    }

    /// Root-to-leaf frame path of `leaf`, following parent links.
    pub fn stack_of(&self, leaf: NodeId) -> Vec<FrameId> {
        let mut stack = Vec::new();
        let mut cursor = Some(leaf);
        while let Some(node) = cursor {
            stack.push(self.nodes[node.0].frame);
            cursor = self.nodes[node.0].parent;
        }
        stack.reverse();
        stack
    }
}
