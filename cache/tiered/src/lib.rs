//! tiered-cache: a two-tier in-process object cache.
//!
//! Expensive-to-construct values are held strongly in a small **hard tier**
//! for fast lookup; values trimmed out of it are parked in a larger **weak
//! tier** that no longer keeps them alive, so a later lookup can recover
//! the exact same instance as long as somebody else still uses it. Both
//! tiers are [`hotend_cache::HotEndLru`] instances, grown on demand so an
//! insert never fails; a background bus periodically trims them back down.
//!
//! # Architecture
//!
//! ```text
//!   +-------------------+       +---------------------------+
//!   |   CacheRegistry   |------>|       TieredCache<T>      |
//!   | (one per type T)  |       |  hard: HotEndLru (Arc<T>) |
//!   +-------------------+       |  weak: HotEndLru (Weak<T>)|
//!            |                  +------------+--------------+
//!            v                               |
//!   +-------------------+        trim_hard / trim_weak
//!   |      TrimBus      |<--------------------+
//!   |  (one thread)     |   reschedule after each pass
//!   +-------------------+
//! ```
//!
//! Lookups hit the hard tier under a shared lock; weak recovery, value
//! creation, and tier migration all happen under the cache's exclusive
//! lock. The [`CacheController`] supplied at build time decides
//! how values are created, which ones may be trimmed, and what to do when
//! an entry outlives its expiry window.
//!
//! # Example
//!
//! ```
//! use tiered_cache::{CacheController, CacheKey, CacheRegistry, cache_key};
//!
//! struct Profiles;
//!
//! impl CacheController<String> for Profiles {
//!     fn create(&self, key: &CacheKey) -> String {
//!         format!("profile #{}", key.part(1))
//!     }
//! }
//!
//! let registry = CacheRegistry::new();
//! let cache = registry.build_with_controller::<String, _>(Profiles);
//!
//! let profile = cache.get(&cache_key!("profile", 7));
//! assert_eq!(profile.as_str(), "profile #7");
//!
//! // Same key, same instance.
//! assert!(std::sync::Arc::ptr_eq(&profile, &cache.get(&cache_key!("profile", 7))));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bus;
mod cache;
mod controller;
mod entry;
mod key;
mod registry;
mod stats;

pub use bus::{TaskHandle, TrimBus};
pub use cache::{CacheBuilder, TieredCache};
pub use controller::CacheController;
pub use entry::CacheEntry;
pub use key::CacheKey;
pub use registry::CacheRegistry;
pub use stats::{CacheStats, StatsSnapshot};
