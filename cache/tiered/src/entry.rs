//! Tier entries and the millisecond wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::key::CacheKey;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    let since_epoch = clocksource::precise::UnixInstant::now()
        .duration_since(clocksource::precise::UnixInstant::EPOCH);
    (since_epoch.as_nanos() / 1_000_000) as u64
}

/// A hard-tier entry: a key, a strong reference to the value, and the time
/// the value was last refreshed.
///
/// `last_refresh` is updated in place when the expiry window lapses, so the
/// refresh notification fires at most once per window however many threads
/// observe the stale entry. Nothing synchronizes through the timestamp; it
/// is only a millisecond reading.
pub struct CacheEntry<T> {
    key: CacheKey,
    value: Arc<T>,
    last_refresh: AtomicU64,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(key: CacheKey, value: Arc<T>) -> Self {
        Self {
            key,
            value,
            last_refresh: AtomicU64::new(now_millis()),
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The cached value.
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// Milliseconds since the epoch at the last refresh.
    pub fn last_refresh_millis(&self) -> u64 {
        self.last_refresh.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_refresh_millis(&self, millis: u64) {
        self.last_refresh.store(millis, Ordering::Relaxed);
    }
}

impl<T> PartialEq for CacheEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for CacheEntry<T> {}

impl<T> std::fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("last_refresh", &self.last_refresh_millis())
            .finish()
    }
}

/// A weak-tier entry: same shape as [`CacheEntry`], but the payload no
/// longer keeps the value alive.
pub(crate) struct WeakCacheEntry<T> {
    pub(crate) key: CacheKey,
    value: Weak<T>,
    last_refresh: AtomicU64,
}

impl<T> WeakCacheEntry<T> {
    /// Demote a hard entry, preserving its refresh time.
    pub(crate) fn demoted_from(entry: &CacheEntry<T>) -> Self {
        Self {
            key: entry.key.clone(),
            value: Arc::downgrade(&entry.value),
            last_refresh: AtomicU64::new(entry.last_refresh_millis()),
        }
    }

    /// Recover the value if it is still alive.
    pub(crate) fn upgrade(&self) -> Option<Arc<T>> {
        self.value.upgrade()
    }

    /// Whether the referent has been reclaimed.
    pub(crate) fn is_reclaimed(&self) -> bool {
        self.value.strong_count() == 0
    }

    /// Milliseconds since the epoch at the last refresh.
    pub(crate) fn last_refresh_millis(&self) -> u64 {
        self.last_refresh.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;

    #[test]
    fn entry_equality_is_key_equality() {
        let a = CacheEntry::new(cache_key!("k"), Arc::new(1u32));
        let b = CacheEntry::new(cache_key!("k"), Arc::new(2u32));
        let c = CacheEntry::new(cache_key!("other"), Arc::new(1u32));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn demotion_preserves_refresh_time() {
        let entry = CacheEntry::new(cache_key!("k"), Arc::new(7u32));
        entry.set_last_refresh_millis(12_345);
        let weak = WeakCacheEntry::demoted_from(&entry);
        assert_eq!(weak.last_refresh_millis(), 12_345);
    }

    #[test]
    fn weak_entry_dies_with_last_strong_ref() {
        let entry = CacheEntry::new(cache_key!("k"), Arc::new(7u32));
        let weak = WeakCacheEntry::demoted_from(&entry);
        assert!(!weak.is_reclaimed());
        assert_eq!(weak.upgrade().as_deref(), Some(&7));
        drop(entry);
        assert!(weak.is_reclaimed());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn now_millis_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
        // Sanity: after 2020-01-01 in milliseconds.
        assert!(a > 1_577_836_800_000);
    }
}
