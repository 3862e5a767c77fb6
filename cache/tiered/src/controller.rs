//! Per-cache policy hooks.

use std::sync::Arc;

use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// Policy hooks bound to a cache at build time.
///
/// Only [`CacheController::create`] is required; the other hooks have
/// workable defaults.
pub trait CacheController<T>: Send + Sync {
    /// Construct the value for a key that is in neither tier.
    ///
    /// Runs under the cache's write lock: it must not call back into the
    /// same cache, and it should not block for long, because every other
    /// cache user is waiting behind it.
    fn create(&self, key: &CacheKey) -> T;

    /// An entry was observed past its expiry window. Runs on the trim bus,
    /// never on the reading thread. Typical use: kick off a server refresh
    /// and update the entry when it lands.
    fn on_need_refresh(&self, key: &CacheKey, entry: Arc<CacheEntry<T>>) {
        let _ = (key, entry);
    }

    /// Trim-time policy: may this value leave the hard tier?
    ///
    /// Returning false keeps the entry strongly retained for as long as the
    /// implementation keeps saying so. The default trims everything.
    fn can_value_be_trimmed(&self, key: &CacheKey, value: &T) -> bool {
        let _ = (key, value);
        true
    }
}
