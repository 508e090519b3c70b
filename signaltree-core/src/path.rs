//! Paths into the state tree.
//!
//! A [`Path`] is a list of object keys from the root. Dot-delimited strings
//! (`"user.profile.name"`) are parsed by a [`PathCache`], a bounded LRU owned
//! by each tree so parse results never leak between trees.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{Result, TreeError};

/// A location in the state tree, as a list of keys from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(SmallVec<[Arc<str>; 4]>);

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-delimited path without caching. Empty segments are
    /// skipped, so `""` and `"."` are both the root.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|segment| !segment.is_empty())
                .map(Arc::from)
                .collect(),
        )
    }

    pub fn from_segments<S: Into<Arc<str>>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[Arc<str>] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one key.
    pub fn child(&self, key: impl Into<Arc<str>>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.0.split_last()?;
        Some(Self(init.iter().cloned().collect()))
    }

    pub fn last(&self) -> Option<&Arc<str>> {
        self.0.last()
    }

    /// Whether `self` is `other` or lies underneath it.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Path::parse(path)
    }
}

/// Hit/miss counters for a [`PathCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Least-recently-used cache of parsed path strings.
///
/// Entries are kept in recency order (oldest first); a hit moves the entry
/// to the back, and inserting past capacity evicts from the front.
#[derive(Debug)]
pub struct PathCache {
    capacity: usize,
    entries: IndexMap<Arc<str>, Path>,
    stats: PathCacheStats,
}

impl PathCache {
    /// Default capacity used by [`crate::TreeConfig`].
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create a cache holding at most `capacity` paths.
    pub fn new(capacity: usize) -> Result<Self> {
        validate_capacity(capacity)?;
        Ok(Self {
            capacity,
            entries: IndexMap::with_capacity(capacity.min(64)),
            stats: PathCacheStats::default(),
        })
    }

    /// Parse a path, serving it from the cache when possible.
    pub fn parse(&mut self, path: &str) -> Path {
        if let Some(index) = self.entries.get_index_of(path) {
            self.stats.hits += 1;
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
            return self.entries[last].clone();
        }

        self.stats.misses += 1;
        let parsed = Path::parse(path);
        self.entries.insert(Arc::from(path), parsed.clone());
        self.evict_overflow();
        parsed
    }

    /// Change the capacity, evicting the oldest entries if it shrank.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        validate_capacity(capacity)?;
        self.capacity = capacity;
        self.evict_overflow();
        Ok(())
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
            self.stats.evictions += 1;
        }
    }

    /// Whether `path` is currently cached. Does not touch recency.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Cached path strings, least recently used first.
    pub fn cached_keys(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_ref()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PathCacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(TreeError::InvalidCapacity {
            what: "path cache",
            value: capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_dots() {
        let path = Path::parse("user.profile.name");
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), "user.profile.name");
        assert!(Path::parse("").is_root());
        assert_eq!(Path::parse("a..b"), Path::from_segments(["a", "b"]));
    }

    #[test]
    fn child_and_parent_are_inverse() {
        let path = Path::parse("a.b");
        assert_eq!(path.child("c").parent(), Some(path.clone()));
        assert_eq!(Path::root().parent(), None);
        assert!(path.child("c").starts_with(&path));
    }

    #[test]
    fn lru_of_two_keeps_the_two_most_recent() {
        let mut cache = PathCache::new(2).unwrap();
        cache.parse("a");
        cache.parse("b");
        cache.parse("c");

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn hit_refreshes_recency() {
        let mut cache = PathCache::new(2).unwrap();
        cache.parse("a");
        cache.parse("b");
        cache.parse("a");
        cache.parse("c");

        assert_eq!(cache.cached_keys(), vec!["a", "c"]);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            PathCache::new(0),
            Err(TreeError::InvalidCapacity { value: 0, .. })
        ));

        let mut cache = PathCache::new(3).unwrap();
        assert!(cache.resize(0).is_err());
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn shrinking_evicts_oldest() {
        let mut cache = PathCache::new(3).unwrap();
        for p in ["x", "y", "z"] {
            cache.parse(p);
        }
        cache.resize(1).unwrap();
        assert_eq!(cache.cached_keys(), vec!["z"]);
    }
}
