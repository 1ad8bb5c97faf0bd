//! In-Memory Backing Store
//!
//! Keeps externalized records in a [`DashMap`]. Used by default and in
//! tests; nothing survives the process.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::domain::{BackingStore, StoredRecord};
use crate::error::Result;

/// DashMap-backed store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<String, StoredRecord>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload bytes currently held
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// (reads, writes, deletes) served so far
    pub fn operation_counts(&self) -> (u64, u64, u64) {
        (
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
        )
    }
}

impl BackingStore for InMemoryStore {
    fn persist(&self, record: &StoredRecord) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let size = record.len() as u64;
        if let Some(old) = self.records.insert(record.key.clone(), record.clone()) {
            self.total_bytes
                .fetch_sub(old.len() as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<StoredRecord>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.get(key).map(|record| record.value().clone()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        match self.records.remove(key) {
            Some((_, old)) => {
                self.total_bytes
                    .fetch_sub(old.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_if(&self, key: &str, generation: u64) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        match self
            .records
            .remove_if(key, |_, record| record.generation == generation)
        {
            Some((_, old)) => {
                self.total_bytes
                    .fetch_sub(old.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }

    fn clear(&self) -> Result<()> {
        self.records.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TypeDescriptor;
    use bytes::Bytes;

    fn record(key: &str, payload: &'static [u8]) -> StoredRecord {
        StoredRecord {
            key: key.to_string(),
            generation: 0,
            descriptor: TypeDescriptor::of::<Vec<u8>>(),
            expires_at: None,
            bytes: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_persist_load_delete() {
        let store = InMemoryStore::new();
        store.persist(&record("a", b"hello")).unwrap();

        assert_eq!(store.load("a").unwrap(), Some(record("a", b"hello")));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.total_bytes(), 5);

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.load("a").unwrap(), None);
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_persist_replaces() {
        let store = InMemoryStore::new();
        store.persist(&record("a", b"hello")).unwrap();
        store.persist(&record("a", b"hi")).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.total_bytes(), 2);
        assert_eq!(store.load("a").unwrap().unwrap().bytes.as_ref(), b"hi");
    }

    #[test]
    fn test_delete_if_matches_generation() {
        let store = InMemoryStore::new();
        let newer = StoredRecord {
            generation: 7,
            ..record("a", b"newer")
        };
        store.persist(&newer).unwrap();

        assert!(!store.delete_if("a", 3).unwrap());
        assert_eq!(store.load("a").unwrap(), Some(newer));
        assert_eq!(store.total_bytes(), 5);

        assert!(store.delete_if("a", 7).unwrap());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.total_bytes(), 0);
        assert!(!store.delete_if("missing", 0).unwrap());
    }

    #[test]
    fn test_clear() {
        let store = InMemoryStore::new();
        store.persist(&record("a", b"1")).unwrap();
        store.persist(&record("b", b"2")).unwrap();
        store.clear().unwrap();

        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_operation_counts() {
        let store = InMemoryStore::new();
        store.persist(&record("a", b"1")).unwrap();
        store.load("a").unwrap();
        store.load("b").unwrap();
        store.delete("a").unwrap();

        assert_eq!(store.operation_counts(), (2, 1, 1));
    }
}
