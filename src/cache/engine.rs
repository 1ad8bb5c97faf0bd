//! Tier Engine - Promotion/Demotion Orchestration
//!
//! Owns the key index, both LRU orders, the slab allocator and the
//! used-memory counter, and moves entries between tiers.
//!
//! # Transitions
//!
//! ```text
//!            read (deserialize, free range)         read (load, delete record)
//!   Heap ◀───────────────────────────── OffHeap      Heap ◀──────────── Externalized
//!   Heap ──────────────────────────────▶ OffHeap ───────────────────────▶ Externalized
//!         demotion (serialize, allocate)        demotion (persist, free range)
//! ```
//!
//! # Locking
//!
//! Lock order is index slot → entry → LRU order / free-slot index / page.
//! No index slot is taken while an entry lock is held. LRU membership only
//! changes while the entry's lock is held. Off-heap candidates picked while
//! a heap entry is locked are only `try_lock`ed and skipped when busy.
//!
//! Backing-store records carry the id of the entry that wrote them, and the
//! engine only ever deletes records of its own generation, so a superseded
//! entry can never delete the record of its replacement.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use dashmap::mapref::entry::Entry as IndexSlot;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::entry::{Entry, RemovedEntry, Residency, Tier};
use super::lru::LruOrder;
use super::metrics::CacheMetrics;
use super::page::SlabRange;
use super::slab::SlabAllocator;
use super::stats::CacheStats;
use crate::domain::{BackingStore, DisposalReport, OverflowDisposer, Serializer, StoredRecord};
use crate::error::{Error, Result};

/// Snapshot of a residency taken under the entry lock
enum Found<V> {
    Heap(V),
    OffHeap(SlabRange),
    Externalized,
    Removed,
}

/// Tiered storage engine
pub struct TierEngine<V> {
    config: CacheConfig,
    index: DashMap<String, Arc<Entry<V>>>,
    heap_lru: LruOrder<V>,
    off_heap_lru: LruOrder<V>,
    slab: SlabAllocator,
    used_memory: AtomicUsize,
    serializer: Arc<dyn Serializer<V>>,
    store: Arc<dyn BackingStore>,
    metrics: CacheMetrics,
    next_id: AtomicU64,
}

impl<V> TierEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an engine and eagerly allocate `config.initial_pages` pages
    pub fn new(
        config: CacheConfig,
        serializer: Arc<dyn Serializer<V>>,
        store: Arc<dyn BackingStore>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            entries_limit = ?config.entries_limit,
            page_size = config.page_size,
            max_pages = config.max_pages,
            serializer = serializer.name(),
            store = store.name(),
            "cache initialization started"
        );

        let slab = SlabAllocator::new(config.page_size, config.max_pages);
        for _ in 0..config.initial_pages {
            slab.allocate_page()?;
        }

        info!("cache initialization ok");
        Ok(Self {
            config,
            index: DashMap::new(),
            heap_lru: LruOrder::new(),
            off_heap_lru: LruOrder::new(),
            slab,
            used_memory: AtomicUsize::new(0),
            serializer,
            store,
            metrics: CacheMetrics::new(),
            next_id: AtomicU64::new(0),
        })
    }

    // =========================================================================
    // Key index operations
    // =========================================================================

    /// Store `value` on the heap under `key`, replacing any prior entry
    ///
    /// The replaced entry is released through the normal removal path while
    /// the key's index slot is held, so the new entry only becomes visible
    /// once the old one is gone. If that release fails in the backing store,
    /// nothing changes and the error is returned.
    pub fn insert(&self, key: String, value: V, ttl: Option<Duration>) -> Result<Arc<Entry<V>>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry::new(id, key.clone(), value, ttl));

        match self.index.entry(key) {
            IndexSlot::Occupied(mut slot) => {
                let previous = slot.get().clone();
                self.release(&previous, false)?;
                slot.insert(entry.clone());
            }
            IndexSlot::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }

        let residency = entry.lock();
        if matches!(*residency, Residency::Heap(_)) {
            self.heap_lru.push_back(entry.clone());
        }
        drop(residency);
        Ok(entry)
    }

    /// Current value of `key`, promoting it to the heap if needed
    ///
    /// Expired entries are removed and reported as absent.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        let Some(entry) = self.lookup(key) else {
            self.metrics.record_miss();
            return Ok(None);
        };

        if entry.is_expired() {
            debug!(key, "entry expired");
            self.detach(&entry, false)?;
            self.metrics.record_expiration();
            self.metrics.record_miss();
            return Ok(None);
        }

        let mut residency = entry.lock();
        let found = match &*residency {
            Residency::Heap(value) => Found::Heap(value.clone()),
            Residency::OffHeap(range) => Found::OffHeap(*range),
            Residency::Externalized { .. } => Found::Externalized,
            Residency::Removed => Found::Removed,
        };

        match found {
            Found::Heap(value) => {
                self.heap_lru.touch(&entry);
                self.metrics.record_hit(Tier::Heap);
                Ok(Some(value))
            }
            Found::OffHeap(range) => self
                .promote_from_off_heap(&entry, &mut residency, range)
                .map(Some),
            Found::Externalized => {
                let value = self.promote_from_store(&entry, &mut residency)?;
                if value.is_none() {
                    drop(residency);
                    self.index
                        .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, &entry));
                    self.metrics.record_miss();
                }
                Ok(value)
            }
            Found::Removed => {
                self.metrics.record_miss();
                Ok(None)
            }
        }
    }

    /// Remove `key` from every tier, returning the removed entry
    ///
    /// On a backing-store failure the entry stays indexed in its tier.
    pub fn remove(&self, key: &str) -> Result<Option<RemovedEntry<V>>> {
        loop {
            let Some(entry) = self.lookup(key) else {
                return Ok(None);
            };
            if let Some(removed) = self.detach(&entry, true)? {
                return Ok(Some(removed));
            }
            // Released concurrently; retry only if the key was put again
            match self.lookup(key) {
                Some(current) if !Arc::ptr_eq(&current, &entry) => continue,
                _ => return Ok(None),
            }
        }
    }

    /// Remove every entry whose expiration instant has passed
    pub fn dispose_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<Arc<Entry<V>>> = self
            .index
            .iter()
            .filter(|item| item.value().expired_at(now))
            .map(|item| item.value().clone())
            .collect();

        let mut removed = 0;
        for entry in expired {
            if self.detach(&entry, false)?.is_some() {
                self.metrics.record_expiration();
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "expired entries disposed");
        }
        Ok(removed)
    }

    /// Drop the least-recently-used heap entry
    pub fn remove_lru_heap(&self) -> Result<Option<RemovedEntry<V>>> {
        match self.heap_lru.peek_front() {
            Some(entry) => self.detach(&entry, true),
            None => Ok(None),
        }
    }

    /// Drop the least-recently-used off-heap entry
    pub fn remove_lru_off_heap(&self) -> Result<Option<RemovedEntry<V>>> {
        match self.off_heap_lru.peek_front() {
            Some(entry) => self.detach(&entry, true),
            None => {
                warn!("no lru entries in off-heap slots");
                Ok(None)
            }
        }
    }

    /// Clear all tiers
    ///
    /// Every allocated page becomes one free slot again and the backing
    /// store drops its records. Not atomic with respect to concurrent
    /// mutations.
    pub fn reset(&self) -> Result<()> {
        let entries: Vec<Arc<Entry<V>>> =
            self.index.iter().map(|item| item.value().clone()).collect();
        self.index.clear();
        for entry in &entries {
            *entry.lock() = Residency::Removed;
        }

        self.heap_lru.clear();
        self.off_heap_lru.clear();
        self.slab.reset();
        self.used_memory.store(0, Ordering::Release);
        self.store.clear()?;

        info!(dropped = entries.len(), pages = self.slab.page_count(), "cache reset");
        Ok(())
    }

    fn lookup(&self, key: &str) -> Option<Arc<Entry<V>>> {
        self.index.get(key).map(|item| item.value().clone())
    }

    /// Release `entry`, then take it out of the index if it is still the current one
    fn detach(&self, entry: &Arc<Entry<V>>, want_value: bool) -> Result<Option<RemovedEntry<V>>> {
        let removed = self.release(entry, want_value)?;
        self.index
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry));
        Ok(removed)
    }

    /// Free whatever `entry` holds in its current tier and mark it removed
    ///
    /// An externalized record is deleted first; if that fails the entry is
    /// left exactly as it was.
    fn release(&self, entry: &Arc<Entry<V>>, want_value: bool) -> Result<Option<RemovedEntry<V>>> {
        let mut residency = entry.lock();
        let mut stored_value = None;
        if matches!(*residency, Residency::Externalized { .. }) {
            if want_value {
                stored_value = self.decode_record(entry);
            }
            self.store.delete_if(entry.key(), entry.id())?;
        }
        let previous = std::mem::replace(&mut *residency, Residency::Removed);

        let (tier, value) = match previous {
            Residency::Removed => return Ok(None),
            Residency::Heap(value) => {
                self.heap_lru.remove(entry);
                (Tier::Heap, Some(value))
            }
            Residency::OffHeap(range) => {
                let value = if want_value {
                    self.decode_range(entry, range)
                } else {
                    None
                };
                self.off_heap_lru.remove(entry);
                self.used_memory.fetch_sub(range.len, Ordering::AcqRel);
                self.slab.release(range);
                (Tier::OffHeap, value)
            }
            Residency::Externalized { .. } => (Tier::Externalized, stored_value),
        };

        debug!(key = entry.key(), %tier, "entry removed");
        Ok(Some(RemovedEntry {
            key: entry.key().to_string(),
            tier,
            value,
        }))
    }

    fn decode_range(&self, entry: &Entry<V>, range: SlabRange) -> Option<V> {
        let decoded = self.slab.read(range).and_then(|bytes| {
            self.serializer
                .deserialize(&bytes)
                .map_err(|e| Error::serialization(entry.key(), e))
        });
        match decoded {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = entry.key(), error = %e, "cannot decode removed entry");
                None
            }
        }
    }

    fn decode_record(&self, entry: &Entry<V>) -> Option<V> {
        let decoded = self.load_record(entry).and_then(|record| match record {
            Some(record) => self.decode_stored(entry, &record).map(Some),
            None => Ok(None),
        });
        match decoded {
            Ok(value) => value,
            Err(e) => {
                warn!(key = entry.key(), error = %e, "cannot read back removed entry");
                None
            }
        }
    }

    /// The record written by `entry`, ignoring one left by another generation
    fn load_record(&self, entry: &Entry<V>) -> Result<Option<StoredRecord>> {
        let record = self.store.load(entry.key())?;
        Ok(record.filter(|record| record.generation == entry.id()))
    }

    fn decode_stored(&self, entry: &Entry<V>, record: &StoredRecord) -> Result<V> {
        if record.descriptor != *entry.descriptor() {
            return Err(Error::serialization(
                entry.key(),
                format!(
                    "stored type {} does not match {}",
                    record.descriptor,
                    entry.descriptor()
                ),
            ));
        }
        self.serializer
            .deserialize(&record.bytes)
            .map_err(|e| Error::serialization(entry.key(), e))
    }

    // =========================================================================
    // Promotion
    // =========================================================================

    fn promote_from_off_heap(
        &self,
        entry: &Arc<Entry<V>>,
        residency: &mut Residency<V>,
        range: SlabRange,
    ) -> Result<V> {
        let bytes = self.slab.read(range)?;
        let value = self
            .serializer
            .deserialize(&bytes)
            .map_err(|e| Error::serialization(entry.key(), e))?;

        *residency = Residency::Heap(value.clone());
        self.off_heap_lru.remove(entry);
        self.used_memory.fetch_sub(range.len, Ordering::AcqRel);
        self.slab.release(range);
        self.heap_lru.push_back(entry.clone());

        self.metrics.record_hit(Tier::OffHeap);
        self.metrics.record_promotion(Tier::OffHeap);
        debug!(key = entry.key(), size = range.len, "moved in heap from off-heap");
        Ok(value)
    }

    /// Load, decode and delete the externalized copy; `None` if the store lost it
    fn promote_from_store(
        &self,
        entry: &Arc<Entry<V>>,
        residency: &mut Residency<V>,
    ) -> Result<Option<V>> {
        let Some(record) = self.load_record(entry)? else {
            warn!(key = entry.key(), "externalized record missing from backing store");
            *residency = Residency::Removed;
            return Ok(None);
        };
        let value = self.decode_stored(entry, &record)?;
        self.store.delete_if(entry.key(), entry.id())?;

        *residency = Residency::Heap(value.clone());
        self.heap_lru.push_back(entry.clone());

        self.metrics.record_hit(Tier::Externalized);
        self.metrics.record_promotion(Tier::Externalized);
        debug!(key = entry.key(), size = record.len(), "moved in heap from disk");
        Ok(Some(value))
    }

    // =========================================================================
    // Demotion
    // =========================================================================

    /// Demote heap entries beyond `entries_limit`, least recently used first
    ///
    /// Entries that cannot be serialized or placed are left on the heap and
    /// counted as skipped. A value that serializes to zero bytes has no range
    /// to live in, so it always stays on the heap; each skip moves it to the
    /// tail so the next pass reaches the entries behind it.
    pub fn dispose_heap_overflow(&self) -> Result<DisposalReport> {
        let mut report = DisposalReport::default();
        let Some(limit) = self.config.entries_limit else {
            return Ok(report);
        };
        let excess = self.heap_lru.len().saturating_sub(limit);
        if excess == 0 {
            return Ok(report);
        }

        for candidate in self.heap_lru.front(excess) {
            if self.move_off_heap(&candidate)? {
                report.moved += 1;
            } else {
                report.skipped += 1;
            }
        }
        debug!(moved = report.moved, skipped = report.skipped, "heap overflow disposed");
        Ok(report)
    }

    /// Externalize off-heap entries while used memory exceeds page capacity
    pub fn dispose_off_heap_overflow(&self) -> Result<DisposalReport> {
        let used = self.used_memory();
        let capacity = self.slab.capacity();
        if used <= capacity {
            return Ok(DisposalReport::default());
        }
        self.move_entries_to_disk(used - capacity)
    }

    /// Smallest range of `size` bytes, growing the pool or externalizing
    /// off-heap entries when no free slot fits
    pub fn allocate_for(&self, size: usize) -> Result<SlabRange> {
        if size == 0 || size > self.slab.page_size() {
            return Err(Error::AllocationExhausted { requested: size });
        }
        if let Some(range) = self.slab.claim_or_grow(size) {
            return Ok(range);
        }

        let free = self.slab.free_slots();
        debug!(
            size,
            slots = free.len(),
            first = ?free.min_len(),
            last = ?free.max_len(),
            "cannot find a free slot"
        );
        self.move_entries_to_disk(size)?;
        self.slab
            .claim(size)
            .ok_or(Error::AllocationExhausted { requested: size })
    }

    /// Serialize a heap entry into an off-heap range; false if it stayed put
    fn move_off_heap(&self, entry: &Arc<Entry<V>>) -> Result<bool> {
        let mut residency = entry.lock();
        let serialized = match &*residency {
            Residency::Heap(value) => self.serializer.serialize(value),
            _ => return Ok(false),
        };
        let bytes = match serialized {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = entry.key(), error = %e, "cannot serialize entry, leaving it on heap");
                self.skip_demotion(entry);
                return Ok(false);
            }
        };

        if bytes.is_empty() {
            debug!(key = entry.key(), "empty value stays on heap");
            self.skip_demotion(entry);
            return Ok(false);
        }

        let range = match self.allocate_for(bytes.len()) {
            Ok(range) => range,
            Err(e) if e.is_recoverable() => {
                debug!(key = entry.key(), size = bytes.len(), "no room for entry - skipping");
                self.skip_demotion(entry);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.slab.write(range, &bytes) {
            self.slab.release(range);
            return Err(e);
        }

        *residency = Residency::OffHeap(range);
        self.heap_lru.remove(entry);
        self.off_heap_lru.push_back(entry.clone());
        self.used_memory.fetch_add(range.len, Ordering::AcqRel);

        self.metrics.record_demotion(Tier::OffHeap);
        debug!(key = entry.key(), slot = %range, "moved off heap");
        Ok(true)
    }

    fn skip_demotion(&self, entry: &Arc<Entry<V>>) {
        self.metrics.record_skipped_demotion();
        self.heap_lru.touch(entry);
    }

    /// Externalize off-heap entries, oldest first, until `bytes_to_free` bytes are freed
    fn move_entries_to_disk(&self, bytes_to_free: usize) -> Result<DisposalReport> {
        let mut report = DisposalReport::default();
        let candidates = self.off_heap_lru.snapshot();
        if candidates.is_empty() {
            warn!("no lru entries in off-heap slots");
            return Ok(report);
        }

        for candidate in candidates {
            if report.freed_bytes >= bytes_to_free {
                break;
            }
            match self.externalize(&candidate)? {
                Some(size) => {
                    report.moved += 1;
                    report.freed_bytes += size;
                }
                None => report.skipped += 1,
            }
        }

        if report.freed_bytes < bytes_to_free {
            warn!(
                freed = report.freed_bytes,
                requested = bytes_to_free,
                "nothing more can be freed from off-heap slots"
            );
        }
        Ok(report)
    }

    /// Persist an off-heap entry and free its range; `None` if busy or moved
    fn externalize(&self, entry: &Arc<Entry<V>>) -> Result<Option<usize>> {
        let Some(mut residency) = entry.try_lock() else {
            return Ok(None);
        };
        let range = match &*residency {
            Residency::OffHeap(range) => *range,
            _ => return Ok(None),
        };

        let record = StoredRecord {
            key: entry.key().to_string(),
            generation: entry.id(),
            descriptor: entry.descriptor().clone(),
            expires_at: entry.expires_at(),
            bytes: Bytes::from(self.slab.read(range)?),
        };
        self.store.persist(&record)?;

        *residency = Residency::Externalized { size: range.len };
        self.off_heap_lru.remove(entry);
        self.used_memory.fetch_sub(range.len, Ordering::AcqRel);
        self.slab.release(range);

        self.metrics.record_demotion(Tier::Externalized);
        debug!(key = entry.key(), size = range.len, "moved to disk");
        Ok(Some(range.len))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Off-heap bytes owned by entries
    pub fn used_memory(&self) -> usize {
        self.used_memory.load(Ordering::Acquire)
    }

    /// Keys in the index
    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    /// Entries in the heap LRU order
    pub fn heap_count(&self) -> usize {
        self.heap_lru.len()
    }

    /// Entries in the off-heap LRU order
    pub fn off_heap_count(&self) -> usize {
        self.off_heap_lru.len()
    }

    /// True if `key` is in the index (expired or not)
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Tier of the entry under `key`
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        self.lookup(key).and_then(|entry| entry.tier())
    }

    /// Ranges owned by off-heap entries
    pub fn off_heap_ranges(&self) -> Vec<SlabRange> {
        self.off_heap_lru
            .snapshot()
            .iter()
            .filter_map(|entry| entry.range())
            .collect()
    }

    /// Ranges currently in the free-slot index
    pub fn free_ranges(&self) -> Vec<SlabRange> {
        self.slab.free_slots().snapshot()
    }

    /// Heap keys, least recently used first
    pub fn heap_keys(&self) -> Vec<String> {
        self.heap_lru
            .snapshot()
            .iter()
            .map(|entry| entry.key().to_string())
            .collect()
    }

    /// Occupancy of every tier
    pub fn stats(&self) -> Result<CacheStats> {
        let free = self.slab.free_slots();
        Ok(CacheStats {
            entry_count: self.entry_count(),
            heap_count: self.heap_count(),
            off_heap_count: self.off_heap_count(),
            disk_count: self.store.count()?,
            used_memory: self.used_memory(),
            page_capacity: self.slab.capacity(),
            page_count: self.slab.page_count(),
            free_slot_count: free.len(),
            free_slot_min: free.min_len(),
            free_slot_max: free.max_len(),
            entries_limit: self.config.entries_limit,
        })
    }

    /// Metrics collector
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The slab allocator
    pub fn slab(&self) -> &SlabAllocator {
        &self.slab
    }
}

impl<V> OverflowDisposer for TierEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn dispose_heap_overflow(&self) -> Result<DisposalReport> {
        TierEngine::dispose_heap_overflow(self)
    }

    fn dispose_off_heap_overflow(&self) -> Result<DisposalReport> {
        TierEngine::dispose_off_heap_overflow(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
