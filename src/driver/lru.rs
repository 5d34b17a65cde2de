//! LRU Tracker Module
//!
//! Least Recently Used ordering for the in-memory driver's eviction.

use std::collections::VecDeque;

// == LRU Tracker ==
/// Tracks access order for LRU eviction.
///
/// Keys are stored in a VecDeque where:
/// - Front = Most recently used
/// - Back = Least recently used
#[derive(Debug)]
pub struct LruTracker<K> {
    /// Order of keys by access time
    order: VecDeque<K>,
}

impl<K> Default for LruTracker<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }
}

impl<K: PartialEq + Clone> LruTracker<K> {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as recently used (moves to front).
    pub fn touch(&mut self, key: &K) {
        self.remove(key);
        self.order.push_front(key.clone());
    }

    // == Remove ==
    pub fn remove(&mut self, key: &K) {
        self.order.retain(|k| k != key);
    }

    // == Retain ==
    /// Keeps only the keys matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&K) -> bool) {
        self.order.retain(keep);
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.order.clear();
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<K> {
        self.order.pop_back()
    }

    // == Peek Oldest ==
    pub fn peek_oldest(&self) -> Option<&K> {
        self.order.back()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_lru_new() {
        let lru: LruTracker<Vec<String>> = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_lru_touch_existing_key() {
        let mut lru = LruTracker::new();

        lru.touch(&key(&["a"]));
        lru.touch(&key(&["b"]));
        lru.touch(&key(&["c"]));

        // Touch "a" again - should move to front
        lru.touch(&key(&["a"]));

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.peek_oldest(), Some(&key(&["b"])));
    }

    #[test]
    fn test_lru_evict_order() {
        let mut lru = LruTracker::new();

        // touch(a): [a]; touch(b): [b, a]; touch(c): [c, b, a]
        // touch(a): [a, c, b]; touch(c): [c, a, b]; touch(b): [b, c, a]
        for k in ["a", "b", "c", "a", "c", "b"] {
            lru.touch(&key(&[k]));
        }

        assert_eq!(lru.evict_oldest(), Some(key(&["a"])));
        assert_eq!(lru.evict_oldest(), Some(key(&["c"])));
        assert_eq!(lru.evict_oldest(), Some(key(&["b"])));
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_retain_prefix() {
        let mut lru = LruTracker::new();

        lru.touch(&key(&["users", "1"]));
        lru.touch(&key(&["users", "2"]));
        lru.touch(&key(&["groups", "1"]));

        let prefix = key(&["users"]);
        lru.retain(|k| !k.starts_with(&prefix));

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.peek_oldest(), Some(&key(&["groups", "1"])));
    }

    #[test]
    fn test_lru_remove_nonexistent_key() {
        let mut lru = LruTracker::new();

        lru.touch(&key(&["a"]));
        lru.remove(&key(&["missing"]));

        assert_eq!(lru.len(), 1);
    }
}
