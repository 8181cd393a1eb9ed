//! In-memory block graph
//!
//! Nodes live in an arena and refer to their parent by index, so the graph
//! has no reference cycles and nodes are never mutated after insertion.

use std::collections::HashMap;

use primitive_types::U256;

use crate::consensus::{calc_work, BlockHeader};
use crate::constants::MEDIAN_TIME_BLOCKS;
use crate::crypto::Hash;

/// Position of a node in the arena
pub type NodeId = usize;

/// Header summary of a block whose ancestry is fully known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub hash: Hash,
    pub parent: Option<NodeId>,
    pub height: u32,
    pub version: i32,
    pub bits: u32,
    pub timestamp: u64,
    /// Total work of the chain ending at this node
    pub work_sum: U256,
}

/// Arena of block nodes indexed by hash
#[derive(Debug, Default)]
pub struct BlockIndex {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash, NodeId>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header whose parent is `parent` (None for genesis)
    ///
    /// Inserting a hash that is already present returns the existing id.
    pub fn insert(&mut self, header: &BlockHeader, parent: Option<NodeId>) -> NodeId {
        let hash = header.hash();
        if let Some(&id) = self.by_hash.get(&hash) {
            return id;
        }

        let (height, parent_work) = match parent {
            Some(p) => (self.nodes[p].height + 1, self.nodes[p].work_sum),
            None => (0, U256::zero()),
        };
        let id = self.nodes.len();
        self.nodes.push(BlockNode {
            hash,
            parent,
            height,
            version: header.version,
            bits: header.bits,
            timestamp: header.timestamp,
            work_sum: parent_work.saturating_add(calc_work(header.bits)),
        });
        self.by_hash.insert(hash, id);
        id
    }

    /// Undo the most recent insert
    ///
    /// Only the last node can go, since nothing may refer to it yet.
    /// Returns false and leaves the index alone for any other id.
    pub fn remove_last(&mut self, id: NodeId) -> bool {
        if id + 1 != self.nodes.len() {
            return false;
        }
        if let Some(node) = self.nodes.pop() {
            self.by_hash.remove(&node.hash);
        }
        true
    }

    pub fn lookup(&self, hash: &Hash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn node(&self, id: NodeId) -> &BlockNode {
        &self.nodes[id]
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockNode> {
        self.lookup(hash).map(|id| &self.nodes[id])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ancestor of `id` at `height`, or None when `height` is above `id`
    pub fn ancestor(&self, id: NodeId, height: u32) -> Option<NodeId> {
        if height > self.nodes[id].height {
            return None;
        }
        let mut current = id;
        while self.nodes[current].height > height {
            current = self.nodes[current].parent?;
        }
        Some(current)
    }

    /// Ancestor `distance` blocks before `id`
    pub fn relative_ancestor(&self, id: NodeId, distance: u32) -> Option<NodeId> {
        let height = self.nodes[id].height.checked_sub(distance)?;
        self.ancestor(id, height)
    }

    /// Iterate from `id` back to genesis, `id` included
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            index: self,
            next: Some(id),
        }
    }

    /// Nearest node at or before `id` satisfying `predicate`
    pub fn last_matching<F>(&self, id: NodeId, mut predicate: F) -> Option<NodeId>
    where
        F: FnMut(&BlockNode) -> bool,
    {
        self.ancestors(id).find(|&n| predicate(&self.nodes[n]))
    }

    /// Median timestamp of the last 11 blocks ending at `id`
    pub fn median_time_past(&self, id: NodeId) -> u64 {
        let mut timestamps: Vec<u64> = self
            .ancestors(id)
            .take(MEDIAN_TIME_BLOCKS)
            .map(|n| self.nodes[n].timestamp)
            .collect();
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    /// Last common ancestor of two nodes
    pub fn find_fork(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height = self.nodes[a].height.min(self.nodes[b].height);
        let mut a = self.ancestor(a, height)?;
        let mut b = self.ancestor(b, height)?;
        while a != b {
            a = self.nodes[a].parent?;
            b = self.nodes[b].parent?;
        }
        Some(a)
    }
}

/// Walks parent links towards genesis
pub struct Ancestors<'a> {
    index: &'a BlockIndex,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.index.nodes[current].parent;
        Some(current)
    }
}
