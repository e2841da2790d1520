//! Directory listing cache shared by every handle on a [`FileSystem`].
//!
//! A directory is either absent or present with its complete listing.
//! Invalidating a path always drops its parent's listing as well.
//!
//! Every change bumps a generation counter. A listing fetched remotely is
//! stored with [`PathCache::insert_if_current`] against the generation read
//! before the fetch, so a change made while the fetch was in flight is not
//! overwritten by the older result.
//!
//! [`FileSystem`]: crate::FileSystem

use std::collections::HashMap;
use std::sync::Mutex;

use lakestore_protocol::DirectoryEntry;

use crate::LakePath;

/// Result of looking a path up in its parent's cached listing.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Found(DirectoryEntry),
    /// The parent is cached and does not contain the path.
    Missing,
    /// The parent has not been listed.
    Uncached,
}

#[derive(Debug, Default)]
pub struct PathCache {
    inner: Mutex<Dirs>,
}

#[derive(Debug, Default)]
struct Dirs {
    listings: HashMap<LakePath, Vec<DirectoryEntry>>,
    generation: u64,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &LakePath) -> Option<Vec<DirectoryEntry>> {
        self.inner.lock().unwrap().listings.get(path).cloned()
    }

    pub fn contains(&self, path: &LakePath) -> bool {
        self.inner.lock().unwrap().listings.contains_key(path)
    }

    /// Current generation; read it before fetching a listing.
    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    /// Stores a complete listing for `path`.
    pub fn insert(&self, path: LakePath, entries: Vec<DirectoryEntry>) {
        let mut dirs = self.inner.lock().unwrap();
        dirs.generation += 1;
        dirs.listings.insert(path, entries);
    }

    /// Stores a listing for `path` unless the cache changed since
    /// `generation` was read. Returns whether it was stored.
    pub fn insert_if_current(
        &self,
        path: LakePath,
        entries: Vec<DirectoryEntry>,
        generation: u64,
    ) -> bool {
        let mut dirs = self.inner.lock().unwrap();
        if dirs.generation != generation {
            return false;
        }
        dirs.generation += 1;
        dirs.listings.insert(path, entries);
        true
    }

    /// Looks `path` up in its parent's listing.
    pub fn lookup(&self, path: &LakePath) -> CacheLookup {
        let dirs = self.inner.lock().unwrap();
        match dirs.listings.get(&path.parent()) {
            None => CacheLookup::Uncached,
            Some(entries) => entries
                .iter()
                .find(|e| e.name == path.as_str())
                .cloned()
                .map_or(CacheLookup::Missing, CacheLookup::Found),
        }
    }

    /// Replaces or adds `entry` in its parent's listing, but only when that
    /// listing is already cached. Returns whether the cache changed.
    pub fn upsert(&self, entry: DirectoryEntry) -> bool {
        let parent = LakePath::new(&entry.name).parent();
        let mut dirs = self.inner.lock().unwrap();
        let Some(entries) = dirs.listings.get_mut(&parent) else {
            return false;
        };
        match entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        dirs.generation += 1;
        true
    }

    /// Clears everything when `path` is `None`; otherwise drops `path` and
    /// its parent.
    pub fn invalidate(&self, path: Option<&LakePath>) {
        let mut dirs = self.inner.lock().unwrap();
        dirs.generation += 1;
        match path {
            None => dirs.listings.clear(),
            Some(path) => {
                dirs.listings.remove(path);
                dirs.listings.remove(&path.parent());
            }
        }
    }

    /// Drops `path`, its parent, and every cached descendant of `path`.
    pub fn invalidate_prefix(&self, path: &LakePath) {
        let parent = path.parent();
        let mut dirs = self.inner.lock().unwrap();
        dirs.generation += 1;
        dirs.listings.retain(|k, _| *k != parent && !k.starts_with(path));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> LakePath {
        LakePath::new(s)
    }

    #[test]
    fn invalidate_drops_path_and_parent() {
        let cache = PathCache::new();
        cache.insert(p("a"), vec![DirectoryEntry::directory("a/b")]);
        cache.insert(p("a/b"), vec![DirectoryEntry::file("a/b/f", 1)]);
        cache.insert(p("x"), vec![]);

        cache.invalidate(Some(&p("a/b")));
        assert!(!cache.contains(&p("a")));
        assert!(!cache.contains(&p("a/b")));
        assert!(cache.contains(&p("x")));
    }

    #[test]
    fn listing_fetched_before_a_change_is_dropped() {
        let cache = PathCache::new();
        let before = cache.generation();
        cache.invalidate(Some(&p("d/g")));

        assert!(!cache.insert_if_current(p("d"), vec![DirectoryEntry::file("d/f", 1)], before));
        assert!(!cache.contains(&p("d")));

        let now = cache.generation();
        assert!(cache.insert_if_current(p("d"), vec![DirectoryEntry::file("d/f", 1)], now));
        assert!(cache.contains(&p("d")));
    }

    #[test]
    fn upsert_into_cached_listing_bumps_generation() {
        let cache = PathCache::new();
        cache.insert(p("d"), vec![]);
        let before = cache.generation();
        assert!(!cache.upsert(DirectoryEntry::file("x/f", 1)));
        assert_eq!(cache.generation(), before);
        assert!(cache.upsert(DirectoryEntry::file("d/f", 1)));
        assert!(cache.generation() > before);
    }

    #[test]
    fn invalidate_uncached_path_is_noop() {
        let cache = PathCache::new();
        cache.insert(p("x"), vec![]);
        cache.invalidate(Some(&p("nope/deeper")));
        cache.invalidate(Some(&p("nope/deeper")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_all() {
        let cache = PathCache::new();
        cache.insert(p("a"), vec![]);
        cache.insert(p("b"), vec![]);
        cache.invalidate(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_prefix_drops_descendants() {
        let cache = PathCache::new();
        for dir in ["", "a", "a/b", "a/b/c", "ab"] {
            cache.insert(p(dir), vec![]);
        }
        cache.invalidate_prefix(&p("a/b"));
        assert!(!cache.contains(&p("a")));
        assert!(!cache.contains(&p("a/b")));
        assert!(!cache.contains(&p("a/b/c")));
        assert!(cache.contains(&p("ab")));
        assert!(cache.contains(&p("")));
    }

    #[test]
    fn lookup_distinguishes_missing_from_uncached() {
        let cache = PathCache::new();
        assert_eq!(cache.lookup(&p("d/f")), CacheLookup::Uncached);

        cache.insert(p("d"), vec![DirectoryEntry::file("d/f", 3)]);
        assert_eq!(
            cache.lookup(&p("d/f")),
            CacheLookup::Found(DirectoryEntry::file("d/f", 3))
        );
        assert_eq!(cache.lookup(&p("d/g")), CacheLookup::Missing);
    }

    #[test]
    fn upsert_only_touches_cached_parents() {
        let cache = PathCache::new();
        assert!(!cache.upsert(DirectoryEntry::file("d/f", 1)));
        assert!(!cache.contains(&p("d")));

        cache.insert(p("d"), vec![DirectoryEntry::file("d/f", 1)]);
        assert!(cache.upsert(DirectoryEntry::file("d/f", 9)));
        assert!(cache.upsert(DirectoryEntry::file("d/g", 2)));
        let listing = cache.get(&p("d")).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].length(), 9);
    }
}
