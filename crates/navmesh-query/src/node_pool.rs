//! Node pool and open list used by the graph searches
//!
//! The pool is a fixed-capacity arena of search nodes keyed by
//! (polygon reference, state). Nodes are addressed by [`NodeIndex`]; parents
//! are stored as indices, so clearing the pool between queries only resets
//! the hash buckets and the allocation counter.

use navmesh_common::Vec3;

use super::PolyRef;

/// Maximum number of search states per polygon
pub const MAX_STATES_PER_NODE: usize = 4;

/// Terminates a hash bucket chain
const NULL_IDX: u16 = u16::MAX;

bitflags::bitflags! {
    /// Search state of a node
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// The node is in the open list
        const OPEN = 0x01;
        /// The node has been expanded
        const CLOSED = 0x02;
        /// The parent was reached through a raycast, not through a direct
        /// polygon adjacency
        const PARENT_DETACHED = 0x04;
    }
}

/// Index of a node in a [`NodePool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(u16);

impl NodeIndex {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// Search node
#[derive(Debug, Clone, Copy)]
pub struct Node {
    /// Position used when computing costs, usually an edge midpoint
    pub pos: Vec3,
    /// Cost from the start to this node
    pub cost: f32,
    /// Cost plus heuristic estimate to the goal
    pub total: f32,
    /// Node this one was reached from, `None` for the root
    pub parent: Option<NodeIndex>,
    /// Extra search state (0-3)
    pub state: u8,
    pub flags: NodeFlags,
    /// Polygon this node represents
    pub poly_ref: PolyRef,
    heap_index: u32,
}

impl Node {
    fn new(poly_ref: PolyRef, state: u8) -> Self {
        Self {
            pos: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            parent: None,
            state,
            flags: NodeFlags::empty(),
            poly_ref,
            heap_index: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.flags.contains(NodeFlags::OPEN)
    }

    pub fn is_closed(&self) -> bool {
        self.flags.contains(NodeFlags::CLOSED)
    }
}

/// Fixed capacity arena of search nodes with hash lookup
#[derive(Debug, Clone)]
pub struct NodePool {
    nodes: Vec<Node>,
    next: Vec<u16>,
    first: Vec<u16>,
    max_nodes: usize,
}

#[inline]
fn hash_ref(r: PolyRef) -> u32 {
    let mut a = r.id();
    a = a.wrapping_add(!(a << 15));
    a ^= a >> 10;
    a = a.wrapping_add(a << 3);
    a ^= a >> 6;
    a = a.wrapping_add(!(a << 11));
    a ^= a >> 16;
    a
}

impl NodePool {
    /// Creates a pool holding up to `max_nodes` nodes. `hash_size` must be a
    /// power of two.
    pub fn new(max_nodes: usize, hash_size: usize) -> Self {
        debug_assert!(max_nodes <= NULL_IDX as usize);
        debug_assert!(hash_size.is_power_of_two());
        Self {
            nodes: Vec::with_capacity(max_nodes),
            next: Vec::with_capacity(max_nodes),
            first: vec![NULL_IDX; hash_size],
            max_nodes,
        }
    }

    /// Forgets all nodes without releasing memory
    pub fn clear(&mut self) {
        self.first.fill(NULL_IDX);
        self.nodes.clear();
        self.next.clear();
    }

    #[inline]
    fn bucket(&self, r: PolyRef) -> usize {
        hash_ref(r) as usize & (self.first.len() - 1)
    }

    /// Returns the node for (`poly_ref`, `state`), allocating it if needed.
    /// `None` means the pool is exhausted.
    pub fn get_node(&mut self, poly_ref: PolyRef, state: u8) -> Option<NodeIndex> {
        if let Some(idx) = self.find_node(poly_ref, state) {
            return Some(idx);
        }

        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len() as u16;
        let bucket = self.bucket(poly_ref);
        self.nodes.push(Node::new(poly_ref, state));
        self.next.push(self.first[bucket]);
        self.first[bucket] = idx;

        Some(NodeIndex(idx))
    }

    pub fn find_node(&self, poly_ref: PolyRef, state: u8) -> Option<NodeIndex> {
        let mut i = self.first[self.bucket(poly_ref)];
        while i != NULL_IDX {
            let node = &self.nodes[i as usize];
            if node.poly_ref == poly_ref && node.state == state {
                return Some(NodeIndex(i));
            }
            i = self.next[i as usize];
        }
        None
    }

    /// All nodes for a polygon, one per visited state
    pub fn find_nodes(&self, poly_ref: PolyRef) -> Vec<NodeIndex> {
        let mut out = Vec::with_capacity(MAX_STATES_PER_NODE);
        let mut i = self.first[self.bucket(poly_ref)];
        while i != NULL_IDX && out.len() < MAX_STATES_PER_NODE {
            if self.nodes[i as usize].poly_ref == poly_ref {
                out.push(NodeIndex(i));
            }
            i = self.next[i as usize];
        }
        out
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.get()]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx.get()]
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn hash_size(&self) -> usize {
        self.first.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Binary min-heap of pool nodes ordered by total cost.
///
/// Every node remembers its heap slot so that [`NodeQueue::modify`] can
/// re-sift it after its cost was lowered.
#[derive(Debug, Clone)]
pub struct NodeQueue {
    heap: Vec<NodeIndex>,
}

impl NodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn top(&self) -> Option<NodeIndex> {
        self.heap.first().copied()
    }

    pub fn push(&mut self, pool: &mut NodePool, idx: NodeIndex) {
        self.heap.push(idx);
        self.bubble_up(pool, self.heap.len() - 1, idx);
    }

    pub fn pop(&mut self, pool: &mut NodePool) -> Option<NodeIndex> {
        let top = *self.heap.first()?;
        let last = self.heap.pop()?;
        if !self.heap.is_empty() {
            self.trickle_down(pool, 0, last);
        }
        Some(top)
    }

    /// Restores heap order after the node's total cost decreased
    pub fn modify(&mut self, pool: &mut NodePool, idx: NodeIndex) {
        let i = pool.node(idx).heap_index as usize;
        if self.heap.get(i) == Some(&idx) {
            self.bubble_up(pool, i, idx);
        }
    }

    fn place(&mut self, pool: &mut NodePool, i: usize, idx: NodeIndex) {
        self.heap[i] = idx;
        pool.node_mut(idx).heap_index = i as u32;
    }

    fn bubble_up(&mut self, pool: &mut NodePool, mut i: usize, idx: NodeIndex) {
        let total = pool.node(idx).total;
        while i > 0 {
            let parent = (i - 1) / 2;
            let parent_idx = self.heap[parent];
            if pool.node(parent_idx).total <= total {
                break;
            }
            self.place(pool, i, parent_idx);
            i = parent;
        }
        self.place(pool, i, idx);
    }

    fn trickle_down(&mut self, pool: &mut NodePool, mut i: usize, idx: NodeIndex) {
        let size = self.heap.len();
        let mut child = i * 2 + 1;
        while child < size {
            if child + 1 < size
                && pool.node(self.heap[child]).total > pool.node(self.heap[child + 1]).total
            {
                child += 1;
            }
            let child_idx = self.heap[child];
            self.place(pool, i, child_idx);
            i = child;
            child = i * 2 + 1;
        }
        self.bubble_up(pool, i, idx);
    }
}
