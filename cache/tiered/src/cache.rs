//! The two-tier cache: a hard tier of strong references in front of a weak
//! tier of reclaimable ones, with periodic trims migrating between them.
//!
//! # Architecture
//!
//! ```text
//!   get/put ----> +--------------------------+
//!                 |  hard tier (HotEndLru)   |   Arc<CacheEntry<T>>
//!                 +------------+-------------+
//!        demote (trim_hard) |     ^ promote (lookup miss)
//!                           v     |
//!                 +--------------------------+
//!                 |  weak tier (HotEndLru)   |   Arc<WeakCacheEntry<T>>
//!                 +--------------------------+
//!                           | drop when reclaimed (trim_weak)
//!                           v
//!                        (gone)
//! ```
//!
//! Both tiers grow 1.5× whenever an insert would not fit, so a put never
//! fails and the LRU's own eviction never fires here; all shrinking is done
//! by the two trim passes the bus runs. The hard pass asks the controller
//! which values may leave and parks them in the weak tier; the weak pass
//! drops entries whose referent has been reclaimed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hotend_cache::HotEndLru;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::bus::{TaskHandle, TrimBus};
use crate::controller::CacheController;
use crate::entry::{CacheEntry, WeakCacheEntry, now_millis};
use crate::key::CacheKey;
use crate::stats::CacheStats;

const HARD_HOT_PERCENT: f32 = 0.75;
const WEAK_HOT_PERCENT: f32 = 0.6;

/// Growth factor applied when a tier is full at insert time.
const SIZE_GROWTH_STEP: f64 = 1.5;

/// Fraction of the hot capacity below which a trimmed tier shrinks back.
/// Kept strictly under the growth trigger so the two cannot oscillate.
const TRIM_SHRINK_PERCENT: f64 = 0.75;

const TRIM_HARD_INTERVAL: Duration = Duration::from_secs(90);
const TRIM_WEAK_INTERVAL: Duration = Duration::from_secs(270);

/// A weak pass with nothing over threshold still sweeps after this long.
const TRIM_WEAK_MAX_INTERVAL_MS: u64 = 360_000;

const TRIM_HARD_MAX_COUNT: usize = 1000;
const TRIM_WEAK_MAX_COUNT: usize = 2000;

/// Weak tier starts at this multiple of the hard tier's initial size.
const WEAK_SIZE_FACTOR: usize = 8;

const DEFAULT_EXPIRE_TIME: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MIN_HARD_SIZE: usize = 64;

struct Tiers<T> {
    hard: HotEndLru<CacheKey, Arc<CacheEntry<T>>>,
    weak: HotEndLru<CacheKey, Arc<WeakCacheEntry<T>>>,
}

struct TrimTasks {
    hard: Option<TaskHandle>,
    weak: Option<TaskHandle>,
}

/// Configures and builds a [`TieredCache`].
///
/// ```
/// use std::time::Duration;
/// use tiered_cache::{CacheBuilder, CacheController, CacheKey, TrimBus};
///
/// struct Sessions;
///
/// impl CacheController<String> for Sessions {
///     fn create(&self, key: &CacheKey) -> String {
///         format!("session for {key}")
///     }
/// }
///
/// let bus = TrimBus::new();
/// let cache = CacheBuilder::new(Sessions)
///     .min_hard_size(8)
///     .expire_time(Duration::from_secs(30))
///     .build(&bus);
/// let value = cache.get(&CacheKey::new(["user", "42"]));
/// assert_eq!(value.as_str(), "session for user,42");
/// ```
pub struct CacheBuilder<T> {
    controller: Arc<dyn CacheController<T>>,
    expire_time: Option<Duration>,
    min_hard_size: usize,
    max_hard_size: Option<usize>,
    name: Option<String>,
}

impl<T: Send + Sync + 'static> CacheBuilder<T> {
    /// Start a builder around the cache's controller.
    pub fn new<C>(controller: C) -> Self
    where
        C: CacheController<T> + 'static,
    {
        Self {
            controller: Arc::new(controller),
            expire_time: Some(DEFAULT_EXPIRE_TIME),
            min_hard_size: DEFAULT_MIN_HARD_SIZE,
            max_hard_size: None,
            name: None,
        }
    }

    /// How stale an entry may get before a refresh notification is posted.
    /// Default five minutes.
    pub fn expire_time(mut self, expire_time: Duration) -> Self {
        self.expire_time = Some(expire_time);
        self
    }

    /// Never post refresh notifications.
    pub fn never_expire(mut self) -> Self {
        self.expire_time = None;
        self
    }

    /// Initial (and minimum) hard-tier capacity. Default 64; must be at
    /// least 2.
    pub fn min_hard_size(mut self, min_hard_size: usize) -> Self {
        self.min_hard_size = min_hard_size;
        self
    }

    /// Cap on hard-tier growth. Unbounded by default; when set, the 1.5×
    /// enlargement stops at this capacity.
    pub fn max_hard_size(mut self, max_hard_size: usize) -> Self {
        self.max_hard_size = Some(max_hard_size);
        self
    }

    /// Name used in log records. Defaults to the value type's name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the cache and schedule its trim tasks on `bus`.
    pub fn build(self, bus: &TrimBus) -> Arc<TieredCache<T>> {
        let hard_init_size = self.min_hard_size;
        let weak_init_size = self.min_hard_size * WEAK_SIZE_FACTOR;
        let name = self
            .name
            .unwrap_or_else(|| std::any::type_name::<T>().to_string());

        let cache = Arc::new(TieredCache {
            name,
            tiers: RwLock::new(Tiers {
                hard: HotEndLru::new(hard_init_size, HARD_HOT_PERCENT),
                weak: HotEndLru::new(weak_init_size, WEAK_HOT_PERCENT),
            }),
            controller: self.controller,
            expire_time: self.expire_time,
            hard_init_size,
            weak_init_size,
            max_hard_size: self.max_hard_size,
            last_weak_trim: AtomicU64::new(now_millis()),
            bus: bus.clone(),
            tasks: Mutex::new(TrimTasks {
                hard: None,
                weak: None,
            }),
            released: AtomicBool::new(false),
            stats: CacheStats::default(),
        });

        schedule_trim_hard(&cache);
        schedule_trim_weak(&cache);

        cache
    }
}

/// A two-tier object cache.
///
/// Values are handed out as `Arc<T>`; the hard tier holds them strongly,
/// the weak tier holds only `Weak<T>` so a demoted value survives exactly
/// as long as somebody outside the cache still uses it.
pub struct TieredCache<T> {
    name: String,
    tiers: RwLock<Tiers<T>>,
    controller: Arc<dyn CacheController<T>>,
    expire_time: Option<Duration>,
    hard_init_size: usize,
    weak_init_size: usize,
    max_hard_size: Option<usize>,
    /// Millisecond timestamp of the last weak sweep.
    last_weak_trim: AtomicU64,
    bus: TrimBus,
    tasks: Mutex<TrimTasks>,
    released: AtomicBool,
    stats: CacheStats,
}

impl<T: Send + Sync + 'static> TieredCache<T> {
    /// Look up a key, creating the value through the controller when it is
    /// in neither tier.
    pub fn get(&self, key: &CacheKey) -> Arc<T> {
        let entry = self
            .entry_for_key(key, true)
            .expect("auto-create lookup always yields an entry");
        self.check_expiry(key, &entry);
        entry.value().clone()
    }

    /// Look up a key without creating anything. A value recovered live from
    /// the weak tier is still promoted back to hard.
    pub fn try_get(&self, key: &CacheKey) -> Option<Arc<T>> {
        let entry = self.entry_for_key(key, false);
        match entry {
            Some(entry) => {
                self.check_expiry(key, &entry);
                Some(entry.value().clone())
            }
            None => {
                CacheStats::incr(&self.stats.misses);
                None
            }
        }
    }

    /// Insert `value` unless the key already resolves to a live value, in
    /// which case that value is returned and the input is discarded.
    pub fn put_if_absent(&self, key: &CacheKey, value: Arc<T>) -> Option<Arc<T>> {
        {
            let tiers = self.tiers.read();
            if let Some(entry) = tiers.hard.get(key) {
                CacheStats::incr(&self.stats.hard_hits);
                return Some(entry.value().clone());
            }
        }

        let tiers = self.tiers.write();

        // The state may have changed between the locks.
        if let Some(entry) = tiers.hard.get(key) {
            CacheStats::incr(&self.stats.hard_hits);
            return Some(entry.value().clone());
        }

        let recovered = tiers
            .weak
            .remove(key)
            .and_then(|weak_entry| weak_entry.upgrade());

        match recovered {
            Some(live) => {
                CacheStats::incr(&self.stats.weak_promotions);
                self.put_to_hard(&tiers, key, Arc::new(CacheEntry::new(key.clone(), live.clone())));
                Some(live)
            }
            None => {
                self.put_to_hard(&tiers, key, Arc::new(CacheEntry::new(key.clone(), value)));
                None
            }
        }
    }

    /// Drop every entry in both tiers.
    pub fn clear(&self) {
        let tiers = self.tiers.write();
        tiers.hard.clear();
        tiers.weak.clear();
    }

    /// Clear the cache and cancel its scheduled trim tasks.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        self.clear();

        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks.hard.take() {
            self.bus.cancel(handle);
        }
        if let Some(handle) = tasks.weak.take() {
            self.bus.cancel(handle);
        }
    }

    /// The cache's log name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Entries currently held strongly.
    pub fn hard_size(&self) -> usize {
        self.tiers.read().hard.size()
    }

    /// Current hard-tier capacity.
    pub fn hard_max_size(&self) -> usize {
        self.tiers.read().hard.max_size()
    }

    /// Entries currently tracked weakly (live or not yet swept).
    pub fn weak_size(&self) -> usize {
        self.tiers.read().weak.size()
    }

    /// Current weak-tier capacity.
    pub fn weak_max_size(&self) -> usize {
        self.tiers.read().weak.max_size()
    }

    /// One hard-tier trim pass: offer up to 1000 cold-tail entries to the
    /// controller and park the accepted ones in the weak tier. Normally run
    /// by the bus every 90 seconds; public so embedders and tests can force
    /// a pass.
    pub fn trim_hard(&self) {
        let tiers = self.tiers.write();

        let max_size = tiers.hard.max_size();
        if max_size <= self.hard_init_size {
            return;
        }

        let cur_size = tiers.hard.size();
        let max_hot_size = tiers.hard.max_hot_size();
        let trim_threshold = (max_hot_size as f64 * TRIM_SHRINK_PERCENT) as usize;
        let max_trim_count = cur_size
            .saturating_sub(trim_threshold)
            .min(TRIM_HARD_MAX_COUNT);

        if max_trim_count == 0 {
            return;
        }

        let started = Instant::now();
        let controller = &self.controller;
        let outcome = tiers.hard.traverse_trim(max_trim_count, |key, entry| {
            controller.can_value_be_trimmed(key, entry.value())
        });

        let demoted = outcome.evicted.len();
        for (key, entry) in outcome.evicted {
            let weak_entry = Arc::new(WeakCacheEntry::demoted_from(&entry));
            if tiers.weak.size() + 1 > tiers.weak.max_size() {
                let new_max = (tiers.weak.max_size() as f64 * SIZE_GROWTH_STEP) as usize;
                debug!(cache = %self.name, new_max, "weak tier enlarged for demotions");
                tiers.weak.resize(new_max, WEAK_HOT_PERCENT);
            }
            tiers.weak.put(key, weak_entry);
        }
        CacheStats::add(&self.stats.demotions, demoted as u64);
        CacheStats::incr(&self.stats.trim_hard_runs);

        let cur_size = tiers.hard.size();
        if cur_size <= trim_threshold {
            let new_max = max_hot_size.max(self.hard_init_size);
            debug!(cache = %self.name, new_max, "hard tier shrunk after trim");
            tiers.hard.resize(new_max, HARD_HOT_PERCENT);
        }

        debug!(
            cache = %self.name,
            visited = outcome.visited,
            demoted,
            cur_size,
            max_size = tiers.hard.max_size(),
            cost_us = started.elapsed().as_micros() as u64,
            "trim_hard pass"
        );
    }

    /// One weak-tier trim pass: drop entries whose referent was reclaimed.
    /// Normally run by the bus every 270 seconds; a pass with nothing over
    /// threshold still sweeps the tier once six minutes have gone by since
    /// the previous sweep.
    pub fn trim_weak(&self) {
        let tiers = self.tiers.write();

        let max_size = tiers.weak.max_size();
        if max_size <= self.weak_init_size {
            return;
        }

        let cur_size = tiers.weak.size();
        let max_hot_size = tiers.weak.max_hot_size();
        let trim_threshold = (max_hot_size as f64 * TRIM_SHRINK_PERCENT) as usize;
        let mut max_trim_count = cur_size
            .saturating_sub(trim_threshold)
            .min(TRIM_WEAK_MAX_COUNT);

        let now = now_millis();

        if max_trim_count == 0 {
            // Referents die on their own out here, so even an under-threshold
            // tier deserves an occasional full sweep.
            let elapsed = now.saturating_sub(self.last_weak_trim.load(Ordering::Relaxed));
            if elapsed < TRIM_WEAK_MAX_INTERVAL_MS || cur_size == 0 {
                return;
            }
            max_trim_count = max_size - max_hot_size;
        }

        self.last_weak_trim.store(now, Ordering::Relaxed);

        let started = Instant::now();
        let outcome = tiers
            .weak
            .traverse_trim(max_trim_count, |_key, entry| entry.is_reclaimed());

        // No back-promotion of live entries here: moving nodes toward hard
        // mid-traversal would scramble the positions being walked.
        let dropped = outcome.evicted.len();
        CacheStats::add(&self.stats.reclaimed, dropped as u64);
        CacheStats::incr(&self.stats.trim_weak_runs);

        let cur_size = tiers.weak.size();
        if cur_size <= trim_threshold {
            let new_max = max_hot_size.max(self.weak_init_size);
            debug!(cache = %self.name, new_max, "weak tier shrunk after trim");
            tiers.weak.resize(new_max, WEAK_HOT_PERCENT);
        }

        debug!(
            cache = %self.name,
            visited = outcome.visited,
            dropped,
            cur_size,
            max_size = tiers.weak.max_size(),
            cost_us = started.elapsed().as_micros() as u64,
            "trim_weak pass"
        );
    }

    /// Hard-tier fast path under the read lock, then the full path under
    /// the write lock: re-check hard, recover from weak, create last.
    fn entry_for_key(&self, key: &CacheKey, auto_create: bool) -> Option<Arc<CacheEntry<T>>> {
        {
            let tiers = self.tiers.read();
            if let Some(entry) = tiers.hard.get(key) {
                CacheStats::incr(&self.stats.hard_hits);
                return Some(entry);
            }
        }

        let tiers = self.tiers.write();

        if let Some(entry) = tiers.hard.get(key) {
            CacheStats::incr(&self.stats.hard_hits);
            return Some(entry);
        }

        let recovered = tiers
            .weak
            .remove(key)
            .and_then(|weak_entry| weak_entry.upgrade());

        let entry = match recovered {
            Some(live) => {
                CacheStats::incr(&self.stats.weak_promotions);
                Arc::new(CacheEntry::new(key.clone(), live))
            }
            None if auto_create => {
                CacheStats::incr(&self.stats.creates);
                let value = Arc::new(self.controller.create(key));
                Arc::new(CacheEntry::new(key.clone(), value))
            }
            None => return None,
        };

        self.put_to_hard(&tiers, key, entry.clone());
        Some(entry)
    }

    /// Insert into the hard tier, enlarging it first when full. Growth is
    /// what keeps the LRU's own eviction from ever firing here.
    fn put_to_hard(&self, tiers: &Tiers<T>, key: &CacheKey, entry: Arc<CacheEntry<T>>) {
        if tiers.hard.size() + 1 > tiers.hard.max_size() {
            let grown = (tiers.hard.max_size() as f64 * SIZE_GROWTH_STEP) as usize;
            let new_max = match self.max_hard_size {
                Some(cap) => grown.min(cap.max(self.hard_init_size)),
                None => grown,
            };
            if new_max > tiers.hard.max_size() {
                debug!(cache = %self.name, new_max, "hard tier enlarged");
                tiers.hard.resize(new_max, HARD_HOT_PERCENT);
            }
        }

        tiers.hard.put(key.clone(), entry);
    }

    /// Post a refresh notification when the entry has outlived the expiry
    /// window. Runs outside both locks.
    fn check_expiry(&self, key: &CacheKey, entry: &Arc<CacheEntry<T>>) {
        let Some(expire_time) = self.expire_time else {
            return;
        };

        let now = now_millis();
        let last_refresh = entry.last_refresh_millis();
        if now.saturating_sub(last_refresh) < expire_time.as_millis() as u64 {
            return;
        }

        // Stamp first so concurrent observers post at most one notification
        // per window.
        entry.set_last_refresh_millis(now);
        CacheStats::incr(&self.stats.refreshes_posted);

        let controller = self.controller.clone();
        let key = key.clone();
        let entry = entry.clone();
        self.bus.post_delayed(Duration::ZERO, move || {
            controller.on_need_refresh(&key, entry);
        });
    }
}

impl<T> Drop for TieredCache<T> {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks.hard.take() {
            self.bus.cancel(handle);
        }
        if let Some(handle) = tasks.weak.take() {
            self.bus.cancel(handle);
        }
    }
}

fn schedule_trim_hard<T: Send + Sync + 'static>(cache: &Arc<TieredCache<T>>) {
    let weak = Arc::downgrade(cache);
    let handle = cache.bus.post_delayed(TRIM_HARD_INTERVAL, move || {
        if let Some(cache) = weak.upgrade() {
            if cache.released.load(Ordering::Acquire) {
                return;
            }
            cache.trim_hard();
            if !cache.released.load(Ordering::Acquire) {
                schedule_trim_hard(&cache);
            }
        }
    });
    cache.tasks.lock().hard = Some(handle);
}

fn schedule_trim_weak<T: Send + Sync + 'static>(cache: &Arc<TieredCache<T>>) {
    let weak = Arc::downgrade(cache);
    let handle = cache.bus.post_delayed(TRIM_WEAK_INTERVAL, move || {
        if let Some(cache) = weak.upgrade() {
            if cache.released.load(Ordering::Acquire) {
                return;
            }
            cache.trim_weak();
            if !cache.released.load(Ordering::Acquire) {
                schedule_trim_weak(&cache);
            }
        }
    });
    cache.tasks.lock().weak = Some(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;
    use std::sync::atomic::AtomicUsize;

    struct Tagger;

    impl CacheController<String> for Tagger {
        fn create(&self, key: &CacheKey) -> String {
            format!("created:{key}")
        }
    }

    struct KeepAll;

    impl CacheController<String> for KeepAll {
        fn create(&self, key: &CacheKey) -> String {
            key.to_string()
        }

        fn can_value_be_trimmed(&self, _key: &CacheKey, _value: &String) -> bool {
            false
        }
    }

    fn small_cache(controller: impl CacheController<String> + 'static) -> Arc<TieredCache<String>> {
        let bus = TrimBus::new();
        CacheBuilder::new(controller)
            .min_hard_size(2)
            .never_expire()
            .build(&bus)
    }

    #[test]
    fn put_if_absent_returns_prior() {
        let cache = small_cache(Tagger);
        let key = cache_key!("a");
        let first = Arc::new("one".to_string());
        assert!(cache.put_if_absent(&key, first.clone()).is_none());
        let prior = cache
            .put_if_absent(&key, Arc::new("two".to_string()))
            .expect("first insert should be visible");
        assert!(Arc::ptr_eq(&prior, &first));
    }

    #[test]
    fn try_get_does_not_create() {
        let cache = small_cache(Tagger);
        assert!(cache.try_get(&cache_key!("missing")).is_none());
        assert_eq!(cache.stats().snapshot().creates, 0);
        assert_eq!(cache.stats().snapshot().misses, 1);
    }

    #[test]
    fn get_creates_and_caches() {
        let cache = small_cache(Tagger);
        let key = cache_key!("user", 1);
        let value = cache.get(&key);
        assert_eq!(value.as_str(), "created:user,1");
        let again = cache.get(&key);
        assert!(Arc::ptr_eq(&value, &again));
        assert_eq!(cache.stats().snapshot().creates, 1);
    }

    #[test]
    fn key_lives_in_at_most_one_tier() {
        let cache = small_cache(Tagger);
        let keys: Vec<CacheKey> = (0..6).map(|i| cache_key!("k", i)).collect();
        let mut held = Vec::new();
        for key in &keys {
            held.push(cache.get(key));
        }

        for _ in 0..4 {
            cache.trim_hard();
            let tiers = cache.tiers.read();
            for key in &keys {
                assert!(
                    !(tiers.hard.contains(key) && tiers.weak.contains(key)),
                    "{key} is in both tiers"
                );
            }
        }
    }

    #[test]
    fn demotion_preserves_refresh_time_and_promotion_resets_it() {
        let cache = small_cache(Tagger);
        let key = cache_key!("stamped");
        let value = cache.get(&key);

        {
            let tiers = cache.tiers.read();
            // peek: a get here would raise the visit count and shield the
            // entry from the trim below.
            let entry = tiers.hard.peek(&key).expect("fresh entry is in hard");
            entry.set_last_refresh_millis(1_000);
        }

        // Push more keys so the stamped one becomes the cold tail, then
        // demote it.
        for i in 0..4 {
            cache.get(&cache_key!("filler", i));
        }
        cache.trim_hard();

        {
            let tiers = cache.tiers.read();
            assert!(!tiers.hard.contains(&key), "stamped entry should demote");
            let weak_entry = tiers.weak.peek(&key).expect("demoted entry is in weak");
            assert_eq!(weak_entry.last_refresh_millis(), 1_000);
            assert_eq!(
                weak_entry.upgrade().map(|v| Arc::ptr_eq(&v, &value)),
                Some(true)
            );
        }

        let recovered = cache.get(&key);
        assert!(Arc::ptr_eq(&recovered, &value));
        let tiers = cache.tiers.read();
        let entry = tiers.hard.peek(&key).expect("promoted entry is in hard");
        assert!(
            entry.last_refresh_millis() > 1_000,
            "promotion should restamp the refresh time"
        );
    }

    #[test]
    fn policy_can_pin_values_in_hard() {
        let cache = small_cache(KeepAll);
        let keys: Vec<CacheKey> = (0..8).map(|i| cache_key!("pinned", i)).collect();
        for key in &keys {
            cache.get(key);
        }
        for _ in 0..6 {
            cache.trim_hard();
        }
        let tiers = cache.tiers.read();
        for key in &keys {
            assert!(tiers.hard.contains(key), "{key} left the hard tier");
        }
        assert_eq!(cache.stats().snapshot().demotions, 0);
    }

    #[test]
    fn forced_weak_sweep_after_interval() {
        let cache = small_cache(Tagger);

        // Hold 20 values strongly and demote 19 of them, growing the weak
        // tier past its initial capacity (2 * 8 = 16).
        let keys: Vec<CacheKey> = (0..20).map(|i| cache_key!("w", i)).collect();
        let mut held: Vec<Arc<String>> = keys.iter().map(|key| cache.get(key)).collect();
        for _ in 0..12 {
            cache.trim_hard();
        }
        assert!(cache.weak_max_size() > cache.weak_init_size);

        // Promote ten entries back out of the weak tier so its population
        // drops below the sweep threshold.
        let mut promoted = 0;
        for key in &keys {
            if promoted == 10 {
                break;
            }
            if cache.tiers.read().weak.contains(key) {
                cache.get(key);
                promoted += 1;
            }
        }
        let below_threshold = cache.weak_size();
        assert!(below_threshold > 0);

        // Under threshold and inside the interval: the pass is a no-op.
        cache.trim_weak();
        assert_eq!(cache.weak_size(), below_threshold);

        // Kill the remaining weak referents, roll the sweep clock back past
        // the six-minute mark, and the forced sweep empties the tier.
        held.clear();
        cache
            .last_weak_trim
            .store(now_millis() - TRIM_WEAK_MAX_INTERVAL_MS - 1, Ordering::Relaxed);
        cache.trim_weak();

        assert_eq!(cache.weak_size(), 0, "all dead entries should be swept");
        assert_eq!(cache.weak_max_size(), cache.weak_init_size);
    }

    #[test]
    fn release_clears_both_tiers() {
        let cache = small_cache(Tagger);
        let held = cache.get(&cache_key!("x"));
        cache.release();
        assert_eq!(cache.hard_size(), 0);
        assert_eq!(cache.weak_size(), 0);
        // The caller's reference stays valid.
        assert_eq!(held.as_str(), "created:x");
    }

    #[test]
    fn expiry_posts_refresh_once_per_window() {
        struct CountingController {
            refreshes: Arc<AtomicUsize>,
        }

        impl CacheController<u32> for CountingController {
            fn create(&self, _key: &CacheKey) -> u32 {
                7
            }

            fn on_need_refresh(&self, _key: &CacheKey, _entry: Arc<CacheEntry<u32>>) {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
            }
        }

        let refreshes = Arc::new(AtomicUsize::new(0));
        let bus = TrimBus::new();
        let cache = CacheBuilder::new(CountingController {
            refreshes: refreshes.clone(),
        })
        .min_hard_size(2)
        .expire_time(Duration::from_millis(200))
        .build(&bus);

        let key = cache_key!("stale");
        cache.get(&key);
        std::thread::sleep(Duration::from_millis(250));
        cache.get(&key);
        cache.get(&key); // window restamped, no second post

        // Give the bus time to run the notification.
        for _ in 0..100 {
            if refreshes.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().snapshot().refreshes_posted, 1);
        bus.shutdown();
    }

    #[test]
    fn max_hard_size_caps_growth() {
        let bus = TrimBus::new();
        let cache: Arc<TieredCache<String>> = CacheBuilder::new(Tagger)
            .min_hard_size(2)
            .max_hard_size(4)
            .never_expire()
            .build(&bus);

        for i in 0..16 {
            cache.get(&cache_key!("capped", i));
        }
        assert!(cache.hard_max_size() <= 4);
        assert!(cache.hard_size() <= 4);
    }
}
