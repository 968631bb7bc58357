use lru::LruCache;

use crate::model::Entry;

/// Recency-ordered map from id to entry.
///
/// Capacity is enforced only by [`CacheStore::evict_if_over_capacity`], so
/// callers decide when the bound is restored.
pub struct CacheStore {
    entries: LruCache<String, Entry>,
    max_size: usize,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.entries.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl CacheStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace, marking the id most-recently-used.
    pub fn put(&mut self, id: String, entry: Entry) {
        self.entries.put(id, entry);
    }

    /// Mark an existing id most-recently-used. Returns false if absent.
    pub fn touch(&mut self, id: &str) -> bool {
        if self.entries.contains(id) {
            self.entries.promote(id);
            true
        } else {
            false
        }
    }

    /// Read with a recency bump.
    pub fn get(&mut self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    /// Read without a recency bump.
    pub fn peek(&self, id: &str) -> Option<&Entry> {
        self.entries.peek(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.pop(id).is_some()
    }

    /// Drop least-recently-used entries until `len <= max_size`.
    pub fn evict_if_over_capacity(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_size {
            match self.entries.pop_lru() {
                Some((id, _)) => evicted.push(id),
                None => break,
            }
        }
        evicted
    }

    /// Entries from least- to most-recently-used.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().rev().map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;

    fn entry(id: &str) -> Entry {
        Entry::new(id, None, None, Some(id.to_string()), Metadata::new())
    }

    fn put(store: &mut CacheStore, id: &str) {
        store.put(id.to_string(), entry(id));
    }

    fn order(store: &CacheStore) -> Vec<String> {
        store.iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn put_replaces_and_moves_to_most_recent() {
        let mut store = CacheStore::new(10);
        put(&mut store, "a");
        put(&mut store, "b");
        put(&mut store, "a");
        assert_eq!(store.len(), 2);
        assert_eq!(order(&store), vec!["b", "a"]);
    }

    #[test]
    fn touch_and_get_bump_recency_but_peek_does_not() {
        let mut store = CacheStore::new(10);
        put(&mut store, "a");
        put(&mut store, "b");
        put(&mut store, "c");

        assert!(store.touch("a"));
        assert_eq!(order(&store), vec!["b", "c", "a"]);

        assert!(store.get("b").is_some());
        assert_eq!(order(&store), vec!["c", "a", "b"]);

        assert!(store.peek("c").is_some());
        assert_eq!(order(&store), vec!["c", "a", "b"]);

        assert!(!store.touch("missing"));
    }

    #[test]
    fn eviction_removes_least_recent_first() {
        let mut store = CacheStore::new(2);
        put(&mut store, "a");
        put(&mut store, "b");
        put(&mut store, "c");
        put(&mut store, "d");
        assert_eq!(store.len(), 4);

        assert_eq!(store.evict_if_over_capacity(), vec!["a", "b"]);
        assert_eq!(order(&store), vec!["c", "d"]);
        assert!(store.evict_if_over_capacity().is_empty());
    }

    #[test]
    fn remove_reports_presence() {
        let mut store = CacheStore::new(2);
        put(&mut store, "a");
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn zero_capacity_evicts_everything() {
        let mut store = CacheStore::new(0);
        put(&mut store, "a");
        assert_eq!(store.evict_if_over_capacity(), vec!["a"]);
        assert!(store.is_empty());
    }
}
