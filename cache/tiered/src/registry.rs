//! One cache per value type, built once.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bus::TrimBus;
use crate::cache::{CacheBuilder, TieredCache};
use crate::controller::CacheController;

/// Process-wide table mapping a value type to its single [`TieredCache`].
///
/// The registry is an owned object, not ambient global state: the host
/// creates one, hands it around, and can tear it down in tests. It owns the
/// [`TrimBus`] its caches schedule their trim passes on.
///
/// A cache is built at most once per type; building again without removing
/// first is a programmer error and panics.
pub struct CacheRegistry {
    caches: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    bus: TrimBus,
}

impl CacheRegistry {
    /// Create an empty registry with its own trim bus.
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            bus: TrimBus::new(),
        }
    }

    /// The bus this registry's caches are trimmed on.
    pub fn bus(&self) -> &TrimBus {
        &self.bus
    }

    /// Look up the cache for `T`, if one was built.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<TieredCache<T>>> {
        let caches = self.caches.read();
        caches
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|cache| cache.downcast::<TieredCache<T>>().ok())
    }

    /// Build the cache for `T` from `builder`.
    ///
    /// When two threads race here, one of them builds and the other
    /// receives the winner's cache.
    ///
    /// # Panics
    ///
    /// Panics when a cache for `T` already exists.
    pub fn build<T: Send + Sync + 'static>(
        &self,
        builder: CacheBuilder<T>,
    ) -> Arc<TieredCache<T>> {
        let type_id = TypeId::of::<T>();

        if self.caches.read().contains_key(&type_id) {
            panic!(
                "cache for {} already built, remove it before building again",
                type_name::<T>()
            );
        }

        let mut caches = self.caches.write();
        if let Some(existing) = caches.get(&type_id) {
            return existing
                .clone()
                .downcast::<TieredCache<T>>()
                .expect("registry entry matches its type key");
        }

        let cache = builder.build(&self.bus);
        caches.insert(type_id, cache.clone());
        cache
    }

    /// Build the cache for `T` with default options.
    ///
    /// # Panics
    ///
    /// Panics when a cache for `T` already exists.
    pub fn build_with_controller<T, C>(&self, controller: C) -> Arc<TieredCache<T>>
    where
        T: Send + Sync + 'static,
        C: CacheController<T> + 'static,
    {
        self.build(CacheBuilder::new(controller))
    }

    /// Remove the cache for `T`, releasing it if present.
    pub fn remove<T: Send + Sync + 'static>(&self) {
        let removed = self.caches.write().remove(&TypeId::of::<T>());
        if let Some(cache) = removed {
            if let Ok(cache) = cache.downcast::<TieredCache<T>>() {
                cache.release();
            }
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;
    use crate::key::CacheKey;

    struct Echo;

    impl CacheController<String> for Echo {
        fn create(&self, key: &CacheKey) -> String {
            key.to_string()
        }
    }

    impl CacheController<u64> for Echo {
        fn create(&self, key: &CacheKey) -> u64 {
            key.part_count() as u64
        }
    }

    #[test]
    fn get_before_build_is_none() {
        let registry = CacheRegistry::new();
        assert!(registry.get::<String>().is_none());
    }

    #[test]
    fn build_then_get_returns_same_cache() {
        let registry = CacheRegistry::new();
        let built = registry.build_with_controller::<String, _>(Echo);
        let fetched = registry.get::<String>().expect("cache was built");
        assert!(Arc::ptr_eq(&built, &fetched));
    }

    #[test]
    fn one_cache_per_type() {
        let registry = CacheRegistry::new();
        registry.build_with_controller::<String, _>(Echo);
        registry.build_with_controller::<u64, _>(Echo);
        assert!(registry.get::<String>().is_some());
        assert!(registry.get::<u64>().is_some());
        assert_eq!(
            registry.get::<u64>().expect("built").get(&cache_key!("a", "b")),
            Arc::new(2)
        );
    }

    #[test]
    #[should_panic(expected = "already built")]
    fn duplicate_build_panics() {
        let registry = CacheRegistry::new();
        registry.build_with_controller::<String, _>(Echo);
        registry.build_with_controller::<String, _>(Echo);
    }

    #[test]
    fn remove_releases_and_allows_rebuild() {
        let registry = CacheRegistry::new();
        let cache = registry.build_with_controller::<String, _>(Echo);
        cache.get(&cache_key!("warm"));
        registry.remove::<String>();
        assert_eq!(cache.hard_size(), 0);
        assert!(registry.get::<String>().is_none());
        registry.build_with_controller::<String, _>(Echo);
    }

    #[test]
    fn remove_missing_is_a_no_op() {
        let registry = CacheRegistry::new();
        registry.remove::<String>();
    }
}
