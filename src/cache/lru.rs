//! Per-Tier LRU Order
//!
//! Recency order of the entries living in one tier, least recently touched
//! at the head. Each tier owns its own lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::entry::Entry;

struct LruInner<V> {
    /// stamp -> entry; smallest stamp is the least recently touched
    order: BTreeMap<u64, Arc<Entry<V>>>,
    /// entry id -> stamp
    stamps: HashMap<u64, u64>,
    next_stamp: u64,
}

impl<V> LruInner<V> {
    fn unlink(&mut self, id: u64) -> Option<Arc<Entry<V>>> {
        let stamp = self.stamps.remove(&id)?;
        self.order.remove(&stamp)
    }

    fn append(&mut self, entry: Arc<Entry<V>>) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.stamps.insert(entry.id(), stamp);
        self.order.insert(stamp, entry);
    }
}

/// Recency-ordered set of entries
pub struct LruOrder<V> {
    inner: Mutex<LruInner<V>>,
}

impl<V> Default for LruOrder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LruOrder<V> {
    /// Create an empty order
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruInner {
                order: BTreeMap::new(),
                stamps: HashMap::new(),
                next_stamp: 0,
            }),
        }
    }

    /// Append at the tail (most recently used); moves it if already present
    pub fn push_back(&self, entry: Arc<Entry<V>>) {
        let mut inner = self.inner.lock();
        inner.unlink(entry.id());
        inner.append(entry);
    }

    /// Move an entry to the tail; returns false if it was not a member
    pub fn touch(&self, entry: &Arc<Entry<V>>) -> bool {
        let mut inner = self.inner.lock();
        match inner.unlink(entry.id()) {
            Some(linked) => {
                inner.append(linked);
                true
            }
            None => false,
        }
    }

    /// Unlink an entry; returns false if it was not a member
    pub fn remove(&self, entry: &Entry<V>) -> bool {
        self.inner.lock().unlink(entry.id()).is_some()
    }

    /// Least recently used entry
    pub fn peek_front(&self) -> Option<Arc<Entry<V>>> {
        self.inner.lock().order.values().next().cloned()
    }

    /// Up to `n` least recently used entries, head first
    pub fn front(&self, n: usize) -> Vec<Arc<Entry<V>>> {
        self.inner.lock().order.values().take(n).cloned().collect()
    }

    /// True if the entry is linked
    pub fn contains(&self, entry: &Entry<V>) -> bool {
        self.inner.lock().stamps.contains_key(&entry.id())
    }

    /// Number of linked entries
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// True if no entry is linked
    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }

    /// Unlink everything
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.stamps.clear();
    }

    /// Every linked entry, head first
    pub fn snapshot(&self) -> Vec<Arc<Entry<V>>> {
        self.inner.lock().order.values().cloned().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, key: &str) -> Arc<Entry<u32>> {
        Arc::new(Entry::new(id, key.to_string(), id as u32, None))
    }

    fn keys(lru: &LruOrder<u32>) -> Vec<String> {
        lru.snapshot().iter().map(|e| e.key().to_string()).collect()
    }

    #[test]
    fn test_push_back_orders_by_recency() {
        let lru = LruOrder::new();
        lru.push_back(entry(1, "a"));
        lru.push_back(entry(2, "b"));
        lru.push_back(entry(3, "c"));

        assert_eq!(keys(&lru), vec!["a", "b", "c"]);
        assert_eq!(lru.peek_front().unwrap().key(), "a");
    }

    #[test]
    fn test_touch_moves_to_tail() {
        let lru = LruOrder::new();
        let a = entry(1, "a");
        lru.push_back(a.clone());
        lru.push_back(entry(2, "b"));

        assert!(lru.touch(&a));
        assert_eq!(keys(&lru), vec!["b", "a"]);
    }

    #[test]
    fn test_touch_of_non_member_is_noop() {
        let lru = LruOrder::new();
        let a = entry(1, "a");
        assert!(!lru.touch(&a));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_same_key_distinct_entries() {
        let lru = LruOrder::new();
        let old = entry(1, "k");
        let new = entry(2, "k");
        lru.push_back(old.clone());
        lru.push_back(new.clone());

        assert_eq!(lru.len(), 2);
        assert!(lru.remove(&old));
        assert!(lru.contains(&new));
        assert!(!lru.contains(&old));
    }

    #[test]
    fn test_push_back_twice_keeps_single_membership() {
        let lru = LruOrder::new();
        let a = entry(1, "a");
        lru.push_back(a.clone());
        lru.push_back(entry(2, "b"));
        lru.push_back(a);

        assert_eq!(keys(&lru), vec!["b", "a"]);
    }

    #[test]
    fn test_front_takes_head_first() {
        let lru = LruOrder::new();
        for (id, key) in [(1, "a"), (2, "b"), (3, "c")] {
            lru.push_back(entry(id, key));
        }
        let front: Vec<_> = lru.front(2).iter().map(|e| e.id()).collect();
        assert_eq!(front, vec![1, 2]);
        assert_eq!(lru.front(10).len(), 3);

        lru.clear();
        assert!(lru.is_empty());
    }
}
