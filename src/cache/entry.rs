//! Cache Entry Types
//!
//! An entry is a key plus exactly one residency: a live value on the heap,
//! a byte range in an off-heap page, or a record in the backing store.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use super::page::SlabRange;
use crate::domain::TypeDescriptor;

/// Tier an entry currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Live value in managed memory (hot)
    Heap,
    /// Serialized bytes in an off-heap page (warm)
    OffHeap,
    /// Serialized bytes in the backing store (cold)
    Externalized,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Heap => write!(f, "heap"),
            Tier::OffHeap => write!(f, "off-heap"),
            Tier::Externalized => write!(f, "disk"),
        }
    }
}

/// Where an entry's value currently lives
#[derive(Debug, Clone)]
pub enum Residency<V> {
    /// Live value
    Heap(V),
    /// Serialized value occupying exactly `range`
    OffHeap(SlabRange),
    /// Serialized value of `size` bytes held by the backing store
    Externalized { size: usize },
    /// Left the key index; holders of a stale handle must not touch it
    Removed,
}

impl<V> Residency<V> {
    /// Tier of a live residency
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Residency::Heap(_) => Some(Tier::Heap),
            Residency::OffHeap(_) => Some(Tier::OffHeap),
            Residency::Externalized { .. } => Some(Tier::Externalized),
            Residency::Removed => None,
        }
    }

    /// Serialized size, known once the value left the heap
    pub fn size(&self) -> Option<usize> {
        match self {
            Residency::OffHeap(range) => Some(range.len),
            Residency::Externalized { size } => Some(*size),
            _ => None,
        }
    }
}

/// Cached entry
///
/// Residency changes are serialized through the entry's own lock, so a
/// promotion and a concurrent demotion of the same entry never interleave.
pub struct Entry<V> {
    id: u64,
    key: String,
    expires_at: Option<DateTime<Utc>>,
    descriptor: TypeDescriptor,
    residency: Mutex<Residency<V>>,
}

impl<V> Entry<V> {
    /// Create a heap-resident entry
    pub fn new(id: u64, key: String, value: V, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        });
        Self {
            id,
            key,
            expires_at,
            descriptor: TypeDescriptor::of::<V>(),
            residency: Mutex::new(Residency::Heap(value)),
        }
    }

    /// Unique id, distinct for every entry ever created by one engine
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Entry key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Expiration instant (None = never)
    #[inline]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Declared type of the value
    #[inline]
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Check if the expiration instant has passed
    pub fn is_expired(&self) -> bool {
        self.expired_at(Utc::now())
    }

    /// Check expiration against a given instant
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    /// Current tier, or `None` once removed
    pub fn tier(&self) -> Option<Tier> {
        self.residency.lock().tier()
    }

    /// Serialized size once off the heap
    pub fn size(&self) -> Option<usize> {
        self.residency.lock().size()
    }

    /// Off-heap range, if currently off-heap
    pub fn range(&self) -> Option<SlabRange> {
        match &*self.residency.lock() {
            Residency::OffHeap(range) => Some(*range),
            _ => None,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Residency<V>> {
        self.residency.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, Residency<V>>> {
        self.residency.try_lock()
    }
}

impl<V: Clone> Entry<V> {
    /// Value if currently on the heap
    pub fn heap_value(&self) -> Option<V> {
        match &*self.residency.lock() {
            Residency::Heap(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<V> fmt::Debug for Entry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("tier", &self.tier())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// An entry taken out of the cache by `remove`
#[derive(Debug, Clone)]
pub struct RemovedEntry<V> {
    /// Key the entry was stored under
    pub key: String,
    /// Tier it lived in when removed
    pub tier: Tier,
    /// Its value; `None` only if the serialized copy could not be read back
    pub value: Option<V>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::page::PageId;

    #[test]
    fn test_new_entry_is_on_heap() {
        let entry = Entry::new(1, "k".to_string(), 42u32, None);
        assert_eq!(entry.tier(), Some(Tier::Heap));
        assert_eq!(entry.heap_value(), Some(42));
        assert_eq!(entry.size(), None);
        assert!(!entry.is_expired());
        assert_eq!(entry.descriptor(), &TypeDescriptor::of::<u32>());
    }

    #[test]
    fn test_expiration() {
        let entry = Entry::new(1, "k".to_string(), 1u8, Some(Duration::from_millis(50)));
        let expires_at = entry.expires_at().unwrap();

        assert!(!entry.expired_at(expires_at - chrono::Duration::milliseconds(1)));
        assert!(entry.expired_at(expires_at));
        assert!(entry.expired_at(expires_at + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_residency_size_and_tier() {
        let range = SlabRange::new(PageId(0), 16, 400);
        let off_heap: Residency<u8> = Residency::OffHeap(range);
        let disk: Residency<u8> = Residency::Externalized { size: 400 };

        assert_eq!(off_heap.tier(), Some(Tier::OffHeap));
        assert_eq!(off_heap.size(), Some(400));
        assert_eq!(disk.tier(), Some(Tier::Externalized));
        assert_eq!(disk.size(), Some(400));
        assert_eq!(Residency::<u8>::Removed.tier(), None);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(format!("{}", Tier::Heap), "heap");
        assert_eq!(format!("{}", Tier::OffHeap), "off-heap");
        assert_eq!(format!("{}", Tier::Externalized), "disk");
    }
}
