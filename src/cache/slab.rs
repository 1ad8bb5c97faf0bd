//! Slab Allocator
//!
//! Carves variable-sized byte ranges out of fixed-size pages.
//!
//! # Architecture
//!
//! ```text
//! SlabAllocator
//!   ├─→ PagePool       → [page#0 (1MB)] [page#1 (1MB)] ... (≤ max_pages)
//!   └─→ FreeSlotIndex  → {(48B, page#0, 976)} {(512B, page#1, 0)} ...
//! ```
//!
//! A fresh page enters the index as one slot spanning the whole page.
//! Allocation is best-fit; the unused tail of the chosen slot goes back into
//! the index.

use tracing::debug;

use super::free_slots::{FreeSlot, FreeSlotIndex};
use super::page::{PagePool, SlabRange};
use crate::error::{Error, Result};

/// Page pool plus free-slot index
pub struct SlabAllocator {
    pages: PagePool,
    free: FreeSlotIndex,
}

impl SlabAllocator {
    /// Create an allocator without any page allocated
    pub fn new(page_size: usize, max_pages: usize) -> Self {
        Self {
            pages: PagePool::new(page_size, max_pages),
            free: FreeSlotIndex::new(),
        }
    }

    /// Allocate a new page and register its full extent as a free slot
    pub fn allocate_page(&self) -> Result<FreeSlot> {
        let page = self.pages.allocate().ok_or(Error::AllocationExhausted {
            requested: self.pages.page_size(),
        })?;
        let extent = page.extent();
        self.free.release(extent);
        Ok(FreeSlot::new(extent))
    }

    /// Smallest free slot of at least `size` bytes
    pub fn find_best_fit(&self, size: usize) -> Option<FreeSlot> {
        self.free.find_best_fit(size)
    }

    /// Take exactly `size` bytes from the front of `slot`
    pub fn slice(&self, slot: FreeSlot, size: usize) -> Option<SlabRange> {
        self.free.slice(slot, size)
    }

    /// Best-fit lookup and slice without a window for another caller
    pub fn claim(&self, size: usize) -> Option<SlabRange> {
        self.free.claim(size)
    }

    /// Claim from existing slots, growing the pool by one page if needed
    pub fn claim_or_grow(&self, size: usize) -> Option<SlabRange> {
        if let Some(range) = self.claim(size) {
            return Some(range);
        }
        if size > self.pages.page_size() {
            return None;
        }
        match self.allocate_page() {
            Ok(_) => self.claim(size),
            Err(_) => {
                debug!(size, "cannot grow page pool");
                // Another caller may have released or added a page meanwhile
                self.claim(size)
            }
        }
    }

    /// Return a range to the free-slot index
    pub fn release(&self, range: SlabRange) {
        self.free.release(range);
    }

    /// Copy bytes into a granted range
    pub fn write(&self, range: SlabRange, bytes: &[u8]) -> Result<()> {
        self.pages.write(range, bytes)
    }

    /// Copy bytes out of a range
    pub fn read(&self, range: SlabRange) -> Result<Vec<u8>> {
        self.pages.read(range)
    }

    /// Forget every carve-out: one free slot per allocated page
    pub fn reset(&self) {
        self.free.reset_to(self.pages.extents());
    }

    /// Bytes across allocated pages
    pub fn capacity(&self) -> usize {
        self.pages.capacity()
    }

    /// Number of allocated pages
    pub fn page_count(&self) -> usize {
        self.pages.page_count()
    }

    /// Configured page size
    pub fn page_size(&self) -> usize {
        self.pages.page_size()
    }

    /// The free-slot index
    pub fn free_slots(&self) -> &FreeSlotIndex {
        &self.free
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::page::PageId;
    use assert_matches::assert_matches;

    #[test]
    fn test_allocate_page_registers_full_slot() {
        let slab = SlabAllocator::new(1024, 1);
        let slot = slab.allocate_page().unwrap();

        assert_eq!(slot.range(), SlabRange::new(PageId(0), 0, 1024));
        assert_eq!(slab.free_slots().len(), 1);
        assert_matches!(
            slab.allocate_page(),
            Err(Error::AllocationExhausted { requested: 1024 })
        );
    }

    #[test]
    fn test_claim_or_grow_adds_page_on_demand() {
        let slab = SlabAllocator::new(1024, 2);
        slab.allocate_page().unwrap();

        let a = slab.claim_or_grow(800).unwrap();
        let b = slab.claim_or_grow(800).unwrap();
        assert_eq!(a.page, PageId(0));
        assert_eq!(b.page, PageId(1));
        assert_eq!(slab.page_count(), 2);
        assert!(slab.claim_or_grow(800).is_none());
    }

    #[test]
    fn test_oversized_request_never_grows() {
        let slab = SlabAllocator::new(128, 4);
        assert!(slab.claim_or_grow(129).is_none());
        assert_eq!(slab.page_count(), 0);
    }

    #[test]
    fn test_release_makes_range_reusable() {
        let slab = SlabAllocator::new(1024, 1);
        slab.allocate_page().unwrap();

        let a = slab.claim(400).unwrap();
        let _b = slab.claim(400).unwrap();
        slab.release(a);

        assert_eq!(slab.claim(400), Some(a));
    }

    #[test]
    fn test_reset_restores_one_slot_per_page() {
        let slab = SlabAllocator::new(256, 3);
        slab.allocate_page().unwrap();
        slab.allocate_page().unwrap();
        slab.claim(100).unwrap();
        slab.claim(30).unwrap();

        slab.reset();
        let snapshot = slab.free_slots().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|r| r.len == 256 && r.offset == 0));
    }
}
