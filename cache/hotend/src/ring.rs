//! The circular ring, its arena, and the trim machinery.
//!
//! Nodes are stored in a `Vec` arena and linked by slot index, so the
//! cyclic structure needs no shared ownership and no unsafe pointer
//! juggling. Freed slots are chained into a free list and reused.
//!
//! All mutation happens under the cache's exclusive lock; the only shared
//! access is the visit-counter bump performed by readers.

use std::collections::HashMap;
use std::mem;

use crate::node::{HOT_COLD_BOUNDARY, NIL, Node};

/// Arena slot: either a live node or a link in the free list.
enum Slot<K, V> {
    Occupied(Node<K, V>),
    Free { next_free: u32 },
}

/// Slab-style node storage with free-list reuse.
struct Arena<K, V> {
    slots: Vec<Slot<K, V>>,
    free_head: u32,
    len: usize,
}

impl<K, V> Arena<K, V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: NIL,
            len: 0,
        }
    }

    fn alloc(&mut self, node: Node<K, V>) -> u32 {
        self.len += 1;
        if self.free_head != NIL {
            let idx = self.free_head;
            match self.slots[idx as usize] {
                Slot::Free { next_free } => self.free_head = next_free,
                Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
            }
            self.slots[idx as usize] = Slot::Occupied(node);
            idx
        } else {
            assert!(
                self.slots.len() < NIL as usize,
                "hot-end lru arena exhausted the u32 index space"
            );
            self.slots.push(Slot::Occupied(node));
            (self.slots.len() - 1) as u32
        }
    }

    fn free(&mut self, idx: u32) -> Node<K, V> {
        let slot = mem::replace(
            &mut self.slots[idx as usize],
            Slot::Free {
                next_free: self.free_head,
            },
        );
        self.free_head = idx;
        self.len -= 1;
        match slot {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("freed a slot that was already free"),
        }
    }

    fn node(&self, idx: u32) -> &Node<K, V> {
        match &self.slots[idx as usize] {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("ring link points at a free slot"),
        }
    }

    fn node_mut(&mut self, idx: u32) -> &mut Node<K, V> {
        match &mut self.slots[idx as usize] {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("ring link points at a free slot"),
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free_head = NIL;
        self.len = 0;
    }
}

/// Result of a traverse-trim pass.
///
/// `evicted` holds the nodes the predicate accepted for removal, oldest
/// first, already unlinked and deindexed. The caller finishes whatever
/// migration it is doing with them.
pub struct TrimOutcome<K, V> {
    /// Number of nodes the traversal inspected.
    pub visited: usize,
    /// Nodes removed from the ring, in traversal order.
    pub evicted: Vec<(K, V)>,
}

impl<K, V> Default for TrimOutcome<K, V> {
    fn default() -> Self {
        Self {
            visited: 0,
            evicted: Vec::new(),
        }
    }
}

/// Ring state: arena, key index, the two region heads, and the size scalars.
pub(crate) struct Ring<K, V> {
    arena: Arena<K, V>,
    index: HashMap<K, u32, ahash::RandomState>,
    hot_head: u32,
    cold_head: u32,
    cur_size: usize,
    max_size: usize,
    hot_size: usize,
    max_hot_size: usize,
}

impl<K, V> Ring<K, V>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub(crate) fn new(max_size: usize, hot_percent: f32) -> Self {
        let mut ring = Self {
            arena: Arena::new(),
            index: HashMap::default(),
            hot_head: NIL,
            cold_head: NIL,
            cur_size: 0,
            max_size: 0,
            hot_size: 0,
            max_hot_size: 0,
        };
        ring.resize(max_size, hot_percent);
        ring
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len
    }

    pub(crate) fn cur_size(&self) -> usize {
        self.cur_size
    }

    pub(crate) fn hot_size(&self) -> usize {
        self.hot_size
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn max_hot_size(&self) -> usize {
        self.max_hot_size
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up a node and bump its visit counter.
    pub(crate) fn get(&self, key: &K) -> Option<&Node<K, V>> {
        let idx = *self.index.get(key)?;
        let node = self.arena.node(idx);
        node.visit_count.increase();
        Some(node)
    }

    /// Look up a node without touching its visit counter.
    pub(crate) fn peek(&self, key: &K) -> Option<&Node<K, V>> {
        let idx = *self.index.get(key)?;
        Some(self.arena.node(idx))
    }

    /// Insert a value of the given weighted size. The caller has already
    /// rejected sizes above `max_size`.
    pub(crate) fn insert(&mut self, key: K, value: V, size: usize) {
        let idx = self.arena.alloc(Node::new(key.clone(), value, size));
        let replaced = self.index.insert(key, idx);

        if let Some(old_idx) = replaced {
            let last_count = self.arena.node(old_idx).visit_count.get();
            self.unlink(old_idx);
            self.arena.free(old_idx);
            self.arena.node(idx).visit_count.set(last_count + 1);
        }

        let trimmed = if replaced.is_none() {
            self.trim_to_size(self.max_size - size)
        } else {
            false
        };

        if trimmed && self.hot_head != NIL && self.cold_head != NIL {
            // An eviction just ran: the newcomer has not earned a hot slot,
            // so it becomes the new cold-head.
            let cold_head = self.cold_head;
            self.link_before(idx, cold_head);
            self.cold_head = idx;
            self.arena.node_mut(idx).is_cold = true;
            self.cur_size += size;
        } else {
            if self.hot_head != NIL {
                let hot_head = self.hot_head;
                self.link_before(idx, hot_head);
            } else {
                let node = self.arena.node_mut(idx);
                node.prev = idx;
                node.next = idx;
            }

            let was_shared_head = self.cold_head != NIL && self.cold_head == self.hot_head;

            self.hot_head = idx;
            self.hot_size += size;
            self.cur_size += size;

            if self.hot_size > self.max_hot_size {
                if was_shared_head && self.arena.node(self.cold_head).prev != self.cold_head {
                    // The heads split: the former shared head keeps the
                    // cold-head position and joins the cold region.
                    let cold_head = self.cold_head;
                    self.hot_size -= self.arena.node(cold_head).size;
                    self.arena.node_mut(cold_head).is_cold = true;
                }
                self.rebalance();
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.arena.node(idx).visit_count.poison();
        self.unlink(idx);
        Some(self.arena.free(idx).value)
    }

    pub(crate) fn resize(&mut self, max_size: usize, hot_percent: f32) {
        assert!(
            max_size >= HOT_COLD_BOUNDARY as usize && (0.0..1.0).contains(&hot_percent),
            "hot-end lru size parameters error: max_size={max_size}, hot_percent={hot_percent}"
        );

        self.max_size = max_size;
        self.max_hot_size = ((max_size as f32 * hot_percent) as usize).clamp(1, max_size - 1);

        if self.cur_size > self.max_size {
            self.trim_to_size(self.max_size);
        }
    }

    /// Evict from the cold tail until `cur_size <= target`, promoting any
    /// tail node that was visited again since insertion. Returns whether at
    /// least one node was evicted.
    pub(crate) fn trim_to_size(&mut self, target: usize) -> bool {
        let mut removed = false;

        while self.cur_size > target {
            loop {
                let cold_tail = self.arena.node(self.hot_head).prev;

                if self.arena.node(cold_tail).visit_count.get() >= HOT_COLD_BOUNDARY {
                    self.arena.node(cold_tail).visit_count.set(1);
                    self.set_new_hot_head(cold_tail);
                    self.rebalance();
                    continue;
                }

                self.arena.node(cold_tail).visit_count.poison();
                self.index.remove(&self.arena.node(cold_tail).key);
                self.unlink(cold_tail);
                self.arena.free(cold_tail);
                removed = true;
                break;
            }
        }

        removed
    }

    /// Walk backward from the cold tail for up to `max_count` nodes, letting
    /// `should_evict` decide each node's fate. A node with `visit_count >= 2`
    /// is re-promoted without consulting the predicate.
    pub(crate) fn traverse<F>(&mut self, max_count: usize, mut should_evict: F) -> TrimOutcome<K, V>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut outcome = TrimOutcome::default();

        if self.hot_head == NIL {
            return outcome;
        }

        let mut idx = self.arena.node(self.hot_head).prev;

        while outcome.visited < max_count {
            let prev = self.arena.node(idx).prev;
            let last = prev == idx;

            let keep = {
                let node = self.arena.node(idx);
                node.visit_count.get() >= HOT_COLD_BOUNDARY
                    || !should_evict(&node.key, &node.value)
            };

            if keep {
                self.arena.node(idx).visit_count.set(1);
                self.set_new_hot_head(idx);
                self.rebalance();
            } else {
                self.arena.node(idx).visit_count.poison();
                self.index.remove(&self.arena.node(idx).key);
                self.unlink(idx);
                let node = self.arena.free(idx);
                outcome.evicted.push((node.key, node.value));
            }

            outcome.visited += 1;
            if last {
                break;
            }
            idx = prev;
        }

        outcome
    }

    pub(crate) fn clear(&mut self) {
        self.index.clear();
        self.arena.clear();
        self.hot_head = NIL;
        self.cold_head = NIL;
        self.cur_size = 0;
        self.hot_size = 0;
    }

    fn link_before(&mut self, idx: u32, exist: u32) {
        let exist_prev = self.arena.node(exist).prev;
        {
            let node = self.arena.node_mut(idx);
            node.next = exist;
            node.prev = exist_prev;
        }
        self.arena.node_mut(exist_prev).next = idx;
        self.arena.node_mut(exist).prev = idx;
    }

    /// Detach a node from the ring and adjust heads and size counters. The
    /// node's own links are left intact so callers can keep walking from it.
    fn unlink(&mut self, idx: u32) {
        let (prev, next, size, is_cold) = {
            let node = self.arena.node(idx);
            (node.prev, node.next, node.size, node.is_cold)
        };

        if next == idx {
            self.set_new_hot_head(NIL);
            self.set_new_cold_head(NIL);
        } else {
            self.arena.node_mut(next).prev = prev;
            self.arena.node_mut(prev).next = next;

            if self.hot_head == idx {
                self.set_new_hot_head(next);
            }
            if self.cold_head == idx {
                self.set_new_cold_head(next);
            }
        }

        self.cur_size -= size;
        if !is_cold {
            self.hot_size -= size;
        }
    }

    fn set_new_hot_head(&mut self, idx: u32) {
        if idx != NIL {
            let node = self.arena.node_mut(idx);
            if node.is_cold {
                node.is_cold = false;
                let size = node.size;
                self.hot_size += size;
            }
        }
        self.hot_head = idx;
    }

    /// Assign the cold-head. Returns false when the assignment cannot open a
    /// cold region (nil, or the node is the hot-head).
    fn set_new_cold_head(&mut self, idx: u32) -> bool {
        self.cold_head = idx;

        if idx == NIL || self.hot_head == idx {
            return false;
        }

        let node = self.arena.node_mut(idx);
        if !node.is_cold {
            node.is_cold = true;
            let size = node.size;
            self.hot_size -= size;
        }

        true
    }

    /// Step the cold-head backward until the hot region fits again. When no
    /// cold region exists yet, one is carved from the ring tail.
    fn rebalance(&mut self) {
        while self.hot_size > self.max_hot_size {
            let candidate = if self.cold_head == NIL {
                self.arena.node(self.hot_head).prev
            } else {
                self.arena.node(self.cold_head).prev
            };
            if !self.set_new_cold_head(candidate) {
                break;
            }
        }
    }
}

#[cfg(test)]
impl<K, V> Ring<K, V>
where
    K: std::hash::Hash + Eq + Clone,
{
    /// Walk the ring and cross-check every counter against the node flags.
    pub(crate) fn assert_invariants(&self) {
        assert!(self.max_size >= 2);
        assert!(self.max_hot_size >= 1 && self.max_hot_size <= self.max_size - 1);

        if self.arena.len == 0 {
            assert_eq!(self.hot_head, NIL);
            assert_eq!(self.cold_head, NIL);
            assert_eq!(self.cur_size, 0);
            assert_eq!(self.hot_size, 0);
            assert!(self.index.is_empty());
            return;
        }

        assert_ne!(self.hot_head, NIL);

        let mut seen = 0;
        let mut total = 0;
        let mut hot = 0;
        let mut idx = self.hot_head;
        loop {
            let node = self.arena.node(idx);
            assert!(
                node.visit_count.get() >= 0,
                "linked node has a poisoned visit count"
            );
            assert_eq!(self.index.get(&node.key), Some(&idx));
            total += node.size;
            if !node.is_cold {
                hot += node.size;
            }
            seen += 1;
            idx = node.next;
            if idx == self.hot_head {
                break;
            }
        }

        assert_eq!(seen, self.arena.len);
        assert_eq!(seen, self.index.len());
        assert_eq!(total, self.cur_size);
        assert_eq!(hot, self.hot_size);
        if self.cold_head == NIL {
            assert_eq!(self.hot_size, self.cur_size);
        }
    }
}
