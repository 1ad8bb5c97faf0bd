//! Three-Tiered Object Cache
//!
//! Heap, off-heap slab pages, and an externalized backing store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        TierCache (facade)                                │
//! │                 put / get / remove → EvictionPolicy                      │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Heap (hot)           │ Off-heap (warm)       │ Backing store (cold)     │
//! │  ┌────────────────┐   │ ┌──────────────────┐  │ ┌────────────────────┐   │
//! │  │ live values    │   │ │ SlabAllocator    │  │ │ dyn BackingStore   │   │
//! │  │ heap LRU       │   │ │ pages + free     │  │ │ (memory, file)     │   │
//! │  │ ≤ entries_limit│   │ │ slots, LRU       │  │ │                    │   │
//! │  └────────────────┘   │ └──────────────────┘  │ └────────────────────┘   │
//! │         │             │          │            │           │              │
//! │         └─────────────┴──────────┴────────────┴───────────┘              │
//! │                       TierEngine (promotion/demotion)                    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads always promote to the heap. Demotion is driven by the disposal
//! passes, which the configured policy decides when to run.

mod config;
mod engine;
mod entry;
mod free_slots;
mod lru;
mod manager;
mod metrics;
mod page;
mod policy;
mod proptest;
mod slab;
mod stats;

pub use config::CacheConfig;
pub use engine::TierEngine;
pub use entry::{Entry, RemovedEntry, Residency, Tier};
pub use free_slots::{FreeSlot, FreeSlotIndex};
pub use lru::LruOrder;
pub use manager::{TierCache, TierCacheBuilder};
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use page::{Page, PageId, PagePool, SlabRange};
pub use policy::{BackgroundPolicy, BatchPolicy, ImmediatePolicy, NoopPolicy, TimedPolicy};
pub use slab::SlabAllocator;
pub use stats::CacheStats;

/// Default off-heap page size (1MB)
pub const DEFAULT_PAGE_SIZE: usize = mb(1);

/// Default upper bound on allocated pages
pub const DEFAULT_MAX_PAGES: usize = 64;

/// `n` kibibytes in bytes
pub const fn kb(n: usize) -> usize {
    n * 1024
}

/// `n` mebibytes in bytes
pub const fn mb(n: usize) -> usize {
    kb(n) * 1024
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_helpers() {
        assert_eq!(kb(1), 1024);
        assert_eq!(kb(4), 4096);
        assert_eq!(mb(1), 1_048_576);
        assert_eq!(DEFAULT_PAGE_SIZE, mb(1));
    }
}
