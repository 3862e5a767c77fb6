//! Cache keys built from ordered sub-identifiers.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An immutable cache key.
///
/// A key is an ordered sequence of sub-identifiers; its identity is the
/// canonical string formed by comma-joining their textual forms. Two keys
/// built from different part types compare equal when their canonical
/// strings match. Internals sit behind an `Arc`, so cloning a key is cheap
/// no matter how many tiers and entries hold it.
///
/// Heterogeneous parts are most convenient through [`crate::cache_key!`]:
///
/// ```
/// use tiered_cache::{CacheKey, cache_key};
///
/// let key = cache_key!("user", 42);
/// assert_eq!(key.as_str(), "user,42");
/// assert_eq!(key.part(1), "42");
/// assert_eq!(key, CacheKey::new(["user", "42"]));
/// ```
#[derive(Clone)]
pub struct CacheKey {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    parts: Box<[String]>,
    joined: String,
}

impl CacheKey {
    /// Build a key from textual parts, in order.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let parts: Box<[String]> = parts.into_iter().map(|part| part.to_string()).collect();
        let joined = parts.join(",");
        Self {
            inner: Arc::new(KeyInner { parts, joined }),
        }
    }

    /// The canonical comma-joined form.
    pub fn as_str(&self) -> &str {
        &self.inner.joined
    }

    /// The `index`-th sub-identifier.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range; callers know their key shapes.
    pub fn part(&self, index: usize) -> &str {
        &self.inner.parts[index]
    }

    /// Number of sub-identifiers.
    pub fn part_count(&self) -> usize {
        self.inner.parts.len()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.joined == other.inner.joined
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.joined.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.joined)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.inner.joined)
    }
}

/// Build a [`CacheKey`] from heterogeneous displayable parts.
#[macro_export]
macro_rules! cache_key {
    ($($part:expr),+ $(,)?) => {
        $crate::CacheKey::new([$(($part).to_string()),+])
    };
}
