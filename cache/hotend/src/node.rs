//! Ring nodes and the atomic visit counter.
//!
//! Nodes live in the arena (see [`crate::ring`]) and are linked into a
//! circular list through `u32` slot indices. The visit counter is the only
//! field touched under the shared lock; everything else is written under the
//! exclusive lock.

use std::sync::atomic::{AtomicI32, Ordering};

/// Nil link value. A node pointing at itself is the sole node in the ring.
pub(crate) const NIL: u32 = u32::MAX;

/// Visit count at or above which a node is considered hot.
pub(crate) const HOT_COLD_BOUNDARY: i32 = 2;

/// Per-node visit counter.
///
/// Starts at 1 on insertion. Readers bump it with a CAS loop; a negative
/// value poisons the counter, which makes the CAS loop a no-op so a reader
/// racing with removal cannot resurrect the node's visit history.
#[derive(Debug)]
pub(crate) struct VisitCount(AtomicI32);

impl VisitCount {
    pub(crate) fn new() -> Self {
        Self(AtomicI32::new(1))
    }

    pub(crate) fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    /// Overwrite the counter. Callers hold the exclusive lock.
    pub(crate) fn set(&self, count: i32) {
        self.0.store(count, Ordering::Release);
    }

    /// Mark the counter as belonging to a removed node.
    pub(crate) fn poison(&self) {
        self.set(-1);
    }

    /// Increment unless poisoned.
    ///
    /// Runs under the shared lock, so several readers may race here; each
    /// CAS retry re-reads the current value and re-checks the poison mark.
    pub(crate) fn increase(&self) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return;
            }
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// A linked entry in the ring.
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    /// Weighted size in cache units, always at least 1.
    pub(crate) size: usize,
    pub(crate) visit_count: VisitCount,
    pub(crate) is_cold: bool,
    pub(crate) prev: u32,
    pub(crate) next: u32,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V, size: usize) -> Self {
        Self {
            key,
            value,
            size,
            visit_count: VisitCount::new(),
            is_cold: false,
            prev: NIL,
            next: NIL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_one() {
        let count = VisitCount::new();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn increase_increments() {
        let count = VisitCount::new();
        count.increase();
        count.increase();
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn poison_blocks_increase() {
        let count = VisitCount::new();
        count.poison();
        count.increase();
        assert_eq!(count.get(), -1);
    }

    #[test]
    fn set_overwrites_poison() {
        let count = VisitCount::new();
        count.poison();
        count.set(1);
        count.increase();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn concurrent_increases_all_land() {
        let count = Arc::new(VisitCount::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let count = count.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        count.increase();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("visit count thread panicked");
        }
        assert_eq!(count.get(), 1 + 4 * 1000);
    }
}
