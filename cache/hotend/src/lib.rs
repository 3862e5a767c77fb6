//! hotend-cache: an LRU container with a hot-end promotion rule.
//!
//! A plain LRU is easily polluted by a one-shot scan: every touched key
//! pushes a genuinely warm key toward the tail. This container partitions a
//! circular doubly-linked list into a **hot** region and a **cold** region.
//! Fresh insertions earn a hot slot only while the hot region has room;
//! eviction always works the cold tail, and a cold-tail node that was
//! visited again since insertion (visit count reached 2) is promoted back
//! to the hot-head instead of being evicted.
//!
//! # Architecture
//!
//! ```text
//!        hot-head                cold-head
//!            |                       |
//!            v                       v
//!      +-----+-----+-----+-----+-----+-----+-----+
//!  ..->| MRU |     | hot |     | MRU | ... | LRU |--+
//!      +-----+-----+-----+-----+-----+-----+-----+  |
//!        ^          (hot arc)        (cold arc)     |
//!        +------------------------------------------+
//!                      (circular, cold tail = hot-head.prev)
//! ```
//!
//! Nodes live in an index-linked arena; a hash index maps keys to slots.
//! Reads take the shared lock and bump an atomic per-node visit counter;
//! all structural changes take the exclusive lock.
//!
//! # Example
//!
//! ```
//! use hotend_cache::HotEndLru;
//!
//! let lru = HotEndLru::new(4, 0.5);
//! assert!(lru.put("a", 1));
//! assert!(lru.put("b", 2));
//! assert_eq!(lru.get(&"a"), Some(1));
//! assert_eq!(lru.get(&"missing"), None);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod node;
mod ring;

use std::fmt;
use std::hash::Hash;

use parking_lot::RwLock;

use ring::Ring;

pub use ring::TrimOutcome;

/// Weighted size hook. Sizes are clamped to at least 1 unit.
type Weigher<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

/// Concurrent LRU cache with hot-end promotion.
///
/// `get` runs under a shared lock; `put`, `remove`, `resize`, the trim
/// operations, and `clear` run under an exclusive lock. Values are returned
/// by clone, so `V` is typically a cheap handle such as an `Arc`.
pub struct HotEndLru<K, V> {
    ring: RwLock<Ring<K, V>>,
    weigher: Weigher<V>,
}

impl<K, V> HotEndLru<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `max_size` units, with
    /// `hot_percent` of them protected in the hot region.
    ///
    /// # Panics
    ///
    /// Panics when `max_size < 2` or `hot_percent` is outside `[0, 1)`.
    pub fn new(max_size: usize, hot_percent: f32) -> Self {
        Self {
            ring: RwLock::new(Ring::new(max_size, hot_percent)),
            weigher: Box::new(|_| 1),
        }
    }

    /// Like [`HotEndLru::new`], but sizing each value through `weigher`
    /// instead of counting every entry as one unit.
    pub fn with_weigher<W>(max_size: usize, hot_percent: f32, weigher: W) -> Self
    where
        W: Fn(&V) -> usize + Send + Sync + 'static,
    {
        Self {
            ring: RwLock::new(Ring::new(max_size, hot_percent)),
            weigher: Box::new(weigher),
        }
    }

    /// Look up a value, bumping the entry's visit counter. The entry does
    /// not move; promotion happens lazily when a trim reaches it.
    pub fn get(&self, key: &K) -> Option<V> {
        let ring = self.ring.read();
        ring.get(key).map(|node| node.value.clone())
    }

    /// Look up a value without counting a visit, leaving the entry's
    /// eviction odds unchanged.
    pub fn peek(&self, key: &K) -> Option<V> {
        let ring = self.ring.read();
        ring.peek(key).map(|node| node.value.clone())
    }

    /// Insert a value, replacing any previous entry for the key.
    ///
    /// Returns false when the value's weighted size exceeds the cache
    /// capacity; the cache is unchanged in that case. A replacement inherits
    /// the replaced entry's visit count plus one. A fresh insertion first
    /// trims to make room; if that evicted anything, the newcomer starts at
    /// the cold-head rather than the hot-head.
    pub fn put(&self, key: K, value: V) -> bool {
        let size = (self.weigher)(&value).max(1);
        let mut ring = self.ring.write();

        if size > ring.max_size() {
            return false;
        }

        ring.insert(key, value, size);
        true
    }

    /// Remove an entry, poisoning its visit counter so a concurrent reader
    /// cannot resurrect it. Returns the removed value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.ring.write().remove(key)
    }

    /// Change capacity and hot share. Trims if the cache now exceeds its
    /// capacity.
    ///
    /// # Panics
    ///
    /// Panics when `max_size < 2` or `hot_percent` is outside `[0, 1)`.
    pub fn resize(&self, max_size: usize, hot_percent: f32) {
        self.ring.write().resize(max_size, hot_percent);
    }

    /// Evict cold-tail entries until the total weighted size is at most
    /// `target`, promoting revisited tails instead of evicting them.
    /// Returns whether anything was evicted.
    pub fn trim_to(&self, target: usize) -> bool {
        self.ring.write().trim_to_size(target)
    }

    /// Walk up to `max_count` entries backward from the cold tail and let
    /// `should_evict` decide their fate; see [`TrimOutcome`].
    ///
    /// An entry visited again since insertion (visit count ≥ 2) is
    /// re-promoted without consulting the predicate, mirroring the
    /// trim-time promotion rule of [`HotEndLru::trim_to`]. Retained entries
    /// are also re-promoted to the hot-head.
    pub fn traverse_trim<F>(&self, max_count: usize, should_evict: F) -> TrimOutcome<K, V>
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.ring.write().traverse(max_count, should_evict)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.ring.write().clear();
    }

    /// Total weighted size of all entries.
    pub fn size(&self) -> usize {
        self.ring.read().cur_size()
    }

    /// Weighted size of the hot region.
    pub fn hot_size(&self) -> usize {
        self.ring.read().hot_size()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.ring.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity in weighted units.
    pub fn max_size(&self) -> usize {
        self.ring.read().max_size()
    }

    /// Hot-region capacity in weighted units.
    pub fn max_hot_size(&self) -> usize {
        self.ring.read().max_hot_size()
    }

    /// Whether the key currently has an entry. Does not count as a visit.
    pub fn contains(&self, key: &K) -> bool {
        self.ring.read().contains(key)
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        self.ring.read().assert_invariants();
    }
}

impl<K, V> fmt::Debug for HotEndLru<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.read();
        f.debug_struct("HotEndLru")
            .field("len", &ring.len())
            .field("cur_size", &ring.cur_size())
            .field("max_size", &ring.max_size())
            .field("hot_size", &ring.hot_size())
            .field("max_hot_size", &ring.max_hot_size())
            .finish()
    }
}
