//! Operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic per-cache operation counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups answered from the hard tier.
    pub hard_hits: AtomicU64,
    /// Lookups recovered from the weak tier and promoted back to hard.
    pub weak_promotions: AtomicU64,
    /// Lookups that invoked the controller's create hook.
    pub creates: AtomicU64,
    /// Lookups that returned nothing (no auto-create, nothing live).
    pub misses: AtomicU64,
    /// Entries demoted hard → weak by the trimmer.
    pub demotions: AtomicU64,
    /// Dead weak entries dropped by the trimmer.
    pub reclaimed: AtomicU64,
    /// Refresh notifications posted to the bus.
    pub refreshes_posted: AtomicU64,
    /// Completed hard-tier trim passes.
    pub trim_hard_runs: AtomicU64,
    /// Completed weak-tier trim passes.
    pub trim_weak_runs: AtomicU64,
}

impl CacheStats {
    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Copy the counters into a plain snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hard_hits: self.hard_hits.load(Ordering::Relaxed),
            weak_promotions: self.weak_promotions.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            refreshes_posted: self.refreshes_posted.load(Ordering::Relaxed),
            trim_hard_runs: self.trim_hard_runs.load(Ordering::Relaxed),
            trim_weak_runs: self.trim_weak_runs.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lookups answered from the hard tier.
    pub hard_hits: u64,
    /// Lookups recovered from the weak tier.
    pub weak_promotions: u64,
    /// Lookups that created a fresh value.
    pub creates: u64,
    /// Lookups that returned nothing.
    pub misses: u64,
    /// Entries demoted hard → weak.
    pub demotions: u64,
    /// Dead weak entries dropped.
    pub reclaimed: u64,
    /// Refresh notifications posted.
    pub refreshes_posted: u64,
    /// Hard-tier trim passes.
    pub trim_hard_runs: u64,
    /// Weak-tier trim passes.
    pub trim_weak_runs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = CacheStats::default();
        CacheStats::incr(&stats.hard_hits);
        CacheStats::incr(&stats.hard_hits);
        CacheStats::add(&stats.demotions, 5);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hard_hits, 2);
        assert_eq!(snapshot.demotions, 5);
        assert_eq!(snapshot.misses, 0);
    }
}
