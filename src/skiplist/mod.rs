//! Probabilistic ordered in-memory index.
//!
//! The skiplist is the storage structure behind the memtable. Nodes
//! live in an append-only arena (`Vec`), linked by arena indices rather
//! than pointers, which keeps the structure entirely safe Rust: an
//! index handed to a reader stays valid for the lifetime of the list
//! because nodes are never moved or freed.
//!
//! ## Shape
//!
//! - Maximum tower height **12**, branching probability **1/4** per
//!   level — the classic geometry giving O(log n) expected search cost
//!   for memtable-sized populations.
//! - Keys are internal keys ordered by
//!   [`internal_key_cmp`](crate::keys::internal_key_cmp). Duplicate
//!   internal keys are never coalesced; mutation sequence numbers make
//!   every inserted key unique.
//!
//! ## Concurrency
//!
//! One writer, many readers, arbitrated by an `RwLock` around the
//! arena. Each operation holds the lock only for its own duration;
//! cursors carry a node index across calls and re-acquire the read
//! lock per step. After `insert(k, v)` returns, every subsequent
//! `seek(k)` from any thread observes `v`.

#[cfg(test)]
mod tests;

use std::sync::RwLock;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::keys::internal_key_cmp;

/// Maximum tower height.
pub const MAX_HEIGHT: usize = 12;

/// Inverse branching probability: a node of height `h` reaches `h + 1`
/// with probability `1 / BRANCHING`.
const BRANCHING: u32 = 4;

/// Arena index sentinel for "no node".
const NIL: u32 = u32::MAX;

struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    /// Forward links, one per level; `next.len()` is the node height.
    next: Vec<u32>,
}

struct Core {
    /// Arena of nodes; index 0 is the head sentinel.
    arena: Vec<Node>,
    /// Height of the tallest non-sentinel tower.
    max_height: usize,
    rng: SmallRng,
}

impl Core {
    /// Returns the first node whose key is ≥ `target`, together with
    /// the predecessor at every level (for insertion splicing).
    fn find_greater_or_equal(&self, target: &[u8]) -> (u32, [u32; MAX_HEIGHT]) {
        let mut prev = [0u32; MAX_HEIGHT];
        let mut node = 0u32;
        let mut level = self.max_height - 1;
        loop {
            let next = self.arena[node as usize].next[level];
            if self.key_is_after_node(target, next) {
                node = next;
            } else {
                prev[level] = node;
                if level == 0 {
                    return (next, prev);
                }
                level -= 1;
            }
        }
    }

    /// True when `target` sorts strictly after the key at `node`.
    fn key_is_after_node(&self, target: &[u8], node: u32) -> bool {
        if node == NIL {
            return false;
        }
        internal_key_cmp(&self.arena[node as usize].key, target).is_lt()
    }

    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.rng.random_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }
}

/// Ordered in-memory index with a single mutator and concurrent readers.
pub struct SkipList {
    core: RwLock<Core>,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    /// Creates an empty list.
    pub fn new() -> Self {
        let head = Node {
            key: Vec::new(),
            value: Vec::new(),
            next: vec![NIL; MAX_HEIGHT],
        };
        Self {
            core: RwLock::new(Core {
                arena: vec![head],
                max_height: 1,
                // Deterministic seed: tower heights need no entropy,
                // only the 1/4 branching distribution.
                rng: SmallRng::seed_from_u64(0xdead_beef),
            }),
        }
    }

    /// Inserts an internal key and its value.
    ///
    /// Duplicate internal keys are stored as distinct nodes; callers
    /// guarantee uniqueness through sequence numbers.
    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut core = self.core.write().unwrap_or_else(|e| e.into_inner());

        let (_, mut prev) = core.find_greater_or_equal(&key);
        let height = core.random_height();
        if height > core.max_height {
            for link in prev.iter_mut().take(height).skip(core.max_height) {
                *link = 0;
            }
            core.max_height = height;
        }

        let new_index = core.arena.len() as u32;
        let mut node = Node {
            key,
            value,
            next: Vec::with_capacity(height),
        };
        for (level, &p) in prev.iter().enumerate().take(height) {
            node.next.push(core.arena[p as usize].next[level]);
        }
        core.arena.push(node);
        for (level, &p) in prev.iter().enumerate().take(height) {
            core.arena[p as usize].next[level] = new_index;
        }
    }

    /// Position of the smallest entry, if any.
    pub fn first(&self) -> Option<u32> {
        let core = self.core.read().unwrap_or_else(|e| e.into_inner());
        match core.arena[0].next[0] {
            NIL => None,
            pos => Some(pos),
        }
    }

    /// Position of the first entry whose key is ≥ `target`, if any.
    pub fn seek(&self, target: &[u8]) -> Option<u32> {
        let core = self.core.read().unwrap_or_else(|e| e.into_inner());
        match core.find_greater_or_equal(target).0 {
            NIL => None,
            pos => Some(pos),
        }
    }

    /// Position of the entry following `pos`, if any.
    pub fn next_after(&self, pos: u32) -> Option<u32> {
        let core = self.core.read().unwrap_or_else(|e| e.into_inner());
        match core.arena[pos as usize].next[0] {
            NIL => None,
            next => Some(next),
        }
    }

    /// Owned copies of the key and value at `pos`.
    pub fn entry(&self, pos: u32) -> (Vec<u8>, Vec<u8>) {
        let core = self.core.read().unwrap_or_else(|e| e.into_inner());
        let node = &core.arena[pos as usize];
        (node.key.clone(), node.value.clone())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        let core = self.core.read().unwrap_or_else(|e| e.into_inner());
        core.arena.len() - 1
    }

    /// True when the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
