//! Free-Slot Index
//!
//! Size-ordered set of unused byte ranges answering "smallest free range of
//! at least N bytes" in O(log n).
//!
//! # Design
//!
//! - Slots order by `(len, page, offset)`, so two distinct ranges of equal
//!   length never compare equal and never collapse into one set member
//! - Claiming a slot (remove, split, reinsert remainder) happens under one
//!   lock, so two allocations can never carve the same bytes
//! - Released ranges are inserted as-is; adjacent free ranges are not merged

use std::cmp::Ordering;
use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::debug;

use super::page::{PageId, SlabRange};

/// An unused byte range tracked by the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeSlot(SlabRange);

impl FreeSlot {
    /// Wrap a range
    pub fn new(range: SlabRange) -> Self {
        Self(range)
    }

    /// Smallest possible slot of `len` bytes, used as the lower bound of a ceiling search
    fn lower_bound(len: usize) -> Self {
        Self(SlabRange::new(PageId(0), 0, len))
    }

    /// Underlying range
    #[inline]
    pub fn range(&self) -> SlabRange {
        self.0
    }

    /// Slot length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len
    }

    /// True for a zero-length slot
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }
}

impl Ord for FreeSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len
            .cmp(&other.0.len)
            .then(self.0.page.cmp(&other.0.page))
            .then(self.0.offset.cmp(&other.0.offset))
    }
}

impl PartialOrd for FreeSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Concurrent size-ordered set of free slots
#[derive(Debug, Default)]
pub struct FreeSlotIndex {
    slots: Mutex<BTreeSet<FreeSlot>>,
}

impl FreeSlotIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `range` to the index unmodified
    ///
    /// Zero-length ranges carry no capacity and are dropped.
    pub fn release(&self, range: SlabRange) -> bool {
        if range.len == 0 {
            return false;
        }
        let inserted = self.slots.lock().insert(FreeSlot::new(range));
        if inserted {
            debug!(slot = %range, size = range.len, "added free slot");
        }
        inserted
    }

    /// Smallest slot of at least `size` bytes
    pub fn find_best_fit(&self, size: usize) -> Option<FreeSlot> {
        self.slots.lock().range(FreeSlot::lower_bound(size)..).next().copied()
    }

    /// Carve `size` bytes from the front of `slot`
    ///
    /// Fails (returns `None`) if `slot` is no longer in the index because a
    /// concurrent caller claimed it first, or if it is too small. A non-empty
    /// remainder goes back into the index.
    pub fn slice(&self, slot: FreeSlot, size: usize) -> Option<SlabRange> {
        if size == 0 || size > slot.len() {
            return None;
        }
        let mut slots = self.slots.lock();
        if !slots.remove(&slot) {
            return None;
        }
        Some(Self::split_into(&mut slots, slot, size))
    }

    /// Best-fit lookup and slice as one step
    pub fn claim(&self, size: usize) -> Option<SlabRange> {
        if size == 0 {
            return None;
        }
        let mut slots = self.slots.lock();
        let slot = slots.range(FreeSlot::lower_bound(size)..).next().copied()?;
        slots.remove(&slot);
        Some(Self::split_into(&mut slots, slot, size))
    }

    fn split_into(slots: &mut BTreeSet<FreeSlot>, slot: FreeSlot, size: usize) -> SlabRange {
        let (granted, remainder) = slot.range().split_at(size);
        if remainder.len > 0 {
            slots.insert(FreeSlot::new(remainder));
            debug!(slot = %remainder, size = remainder.len, "added sliced slot");
        } else {
            debug!(slot = %granted, "slot fully consumed");
        }
        granted
    }

    /// Number of free slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True if no slot is free
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Length of the smallest free slot
    pub fn min_len(&self) -> Option<usize> {
        self.slots.lock().first().map(FreeSlot::len)
    }

    /// Length of the largest free slot
    pub fn max_len(&self) -> Option<usize> {
        self.slots.lock().last().map(FreeSlot::len)
    }

    /// Total free bytes
    pub fn free_bytes(&self) -> usize {
        self.slots.lock().iter().map(FreeSlot::len).sum()
    }

    /// Copy of every free range, smallest first
    pub fn snapshot(&self) -> Vec<SlabRange> {
        self.slots.lock().iter().map(FreeSlot::range).collect()
    }

    /// Replace the whole index content
    pub fn reset_to(&self, ranges: impl IntoIterator<Item = SlabRange>) {
        let mut slots = self.slots.lock();
        slots.clear();
        slots.extend(ranges.into_iter().filter(|r| r.len > 0).map(FreeSlot::new));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn range(page: u32, offset: usize, len: usize) -> SlabRange {
        SlabRange::new(PageId(page), offset, len)
    }

    #[test]
    fn test_best_fit_picks_smallest_large_enough() {
        let index = FreeSlotIndex::new();
        index.release(range(0, 0, 100));
        index.release(range(0, 200, 50));
        index.release(range(0, 400, 300));

        assert_eq!(index.find_best_fit(40).unwrap().range(), range(0, 200, 50));
        assert_eq!(index.find_best_fit(50).unwrap().range(), range(0, 200, 50));
        assert_eq!(index.find_best_fit(51).unwrap().range(), range(0, 0, 100));
        assert!(index.find_best_fit(301).is_none());
    }

    #[test]
    fn test_equal_lengths_are_distinct() {
        let index = FreeSlotIndex::new();
        assert!(index.release(range(0, 0, 64)));
        assert!(index.release(range(0, 128, 64)));
        assert!(index.release(range(1, 0, 64)));

        assert_eq!(index.len(), 3);
        let first = index.claim(64).unwrap();
        let second = index.claim(64).unwrap();
        let third = index.claim(64).unwrap();
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&third));
        assert!(index.is_empty());
    }

    #[test]
    fn test_zero_length_not_inserted() {
        let index = FreeSlotIndex::new();
        assert!(!index.release(range(0, 10, 0)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_slice_keeps_remainder() {
        let index = FreeSlotIndex::new();
        index.release(range(0, 0, 1024));

        let slot = index.find_best_fit(400).unwrap();
        let granted = index.slice(slot, 400).unwrap();
        assert_eq!(granted, range(0, 0, 400));
        assert_eq!(index.snapshot(), vec![range(0, 400, 624)]);
    }

    #[test]
    fn test_slice_exact_drops_slot() {
        let index = FreeSlotIndex::new();
        index.release(range(0, 0, 400));

        let slot = index.find_best_fit(400).unwrap();
        assert_eq!(index.slice(slot, 400), Some(range(0, 0, 400)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_slice_of_claimed_slot_fails() {
        let index = FreeSlotIndex::new();
        index.release(range(0, 0, 100));

        let slot = index.find_best_fit(10).unwrap();
        assert!(index.slice(slot, 10).is_some());
        // Same descriptor again: already consumed
        assert!(index.slice(slot, 10).is_none());
    }

    #[test]
    fn test_release_does_not_coalesce() {
        let index = FreeSlotIndex::new();
        index.release(range(0, 0, 100));
        index.release(range(0, 100, 100));

        assert_eq!(index.len(), 2);
        assert!(index.find_best_fit(150).is_none());
        assert_eq!(index.free_bytes(), 200);
    }

    #[test]
    fn test_min_max_len() {
        let index = FreeSlotIndex::new();
        assert_eq!(index.min_len(), None);
        index.release(range(0, 0, 10));
        index.release(range(0, 50, 70));
        assert_eq!(index.min_len(), Some(10));
        assert_eq!(index.max_len(), Some(70));
    }

    #[test]
    fn test_concurrent_claims_never_overlap() {
        use std::sync::Arc;

        let index = Arc::new(FreeSlotIndex::new());
        index.release(range(0, 0, 64 * 1024));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || {
                    (0..64).filter_map(|_| index.claim(100)).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut granted: Vec<SlabRange> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        granted.sort_by_key(|r| r.offset);
        for pair in granted.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]));
        }
        assert_eq!(granted.len(), 512);
    }
}
