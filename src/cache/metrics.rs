//! Cache Metrics Collection
//!
//! Hit, movement and latency counters for monitoring tier health.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::entry::Tier;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookups
    heap_hits: AtomicU64,
    off_heap_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,

    // Tier movement
    promotions_off_heap_to_heap: AtomicU64,
    promotions_disk_to_heap: AtomicU64,
    demotions_heap_to_off_heap: AtomicU64,
    demotions_off_heap_to_disk: AtomicU64,
    skipped_demotions: AtomicU64,

    // Latencies (microseconds, exponential moving average)
    get_latency_us: AtomicU64,
    put_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit in the tier the entry was found in
    pub fn record_hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Heap => &self.heap_hits,
            Tier::OffHeap => &self.off_heap_hits,
            Tier::Externalized => &self.disk_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup that found nothing
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entry dropped because it expired
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a move to the heap from `from`
    pub fn record_promotion(&self, from: Tier) {
        match from {
            Tier::OffHeap => self
                .promotions_off_heap_to_heap
                .fetch_add(1, Ordering::Relaxed),
            Tier::Externalized => self.promotions_disk_to_heap.fetch_add(1, Ordering::Relaxed),
            Tier::Heap => return,
        };
    }

    /// Record a move down to `to`
    pub fn record_demotion(&self, to: Tier) {
        match to {
            Tier::OffHeap => self
                .demotions_heap_to_off_heap
                .fetch_add(1, Ordering::Relaxed),
            Tier::Externalized => self
                .demotions_off_heap_to_disk
                .fetch_add(1, Ordering::Relaxed),
            Tier::Heap => return,
        };
    }

    /// Record a demotion candidate left in place
    pub fn record_skipped_demotion(&self) {
        self.skipped_demotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Hits across all tiers
    pub fn hits(&self) -> u64 {
        self.heap_hits.load(Ordering::Relaxed)
            + self.off_heap_hits.load(Ordering::Relaxed)
            + self.disk_hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hits over hits plus misses (expired lookups count as misses)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    // Latency tracking
    /// Fold one `get` duration into the moving average
    pub fn record_get_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.get_latency_us, duration);
    }

    /// Fold one `put` duration into the moving average
    pub fn record_put_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.put_latency_us, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Smoothed `get` latency
    pub fn get_latency(&self) -> Duration {
        Duration::from_micros(self.get_latency_us.load(Ordering::Relaxed))
    }

    /// Smoothed `put` latency
    pub fn put_latency(&self) -> Duration {
        Duration::from_micros(self.put_latency_us.load(Ordering::Relaxed))
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            heap_hits: self.heap_hits.load(Ordering::Relaxed),
            off_heap_hits: self.off_heap_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses(),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),

            promotions_off_heap_to_heap: self.promotions_off_heap_to_heap.load(Ordering::Relaxed),
            promotions_disk_to_heap: self.promotions_disk_to_heap.load(Ordering::Relaxed),
            demotions_heap_to_off_heap: self.demotions_heap_to_off_heap.load(Ordering::Relaxed),
            demotions_off_heap_to_disk: self.demotions_off_heap_to_disk.load(Ordering::Relaxed),
            skipped_demotions: self.skipped_demotions.load(Ordering::Relaxed),

            get_latency: self.get_latency(),
            put_latency: self.put_latency(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.heap_hits,
            &self.off_heap_hits,
            &self.disk_hits,
            &self.misses,
            &self.expirations,
            &self.promotions_off_heap_to_heap,
            &self.promotions_disk_to_heap,
            &self.demotions_heap_to_off_heap,
            &self.demotions_off_heap_to_disk,
            &self.skipped_demotions,
            &self.get_latency_us,
            &self.put_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    // Lookups
    pub heap_hits: u64,
    pub off_heap_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub hit_ratio: f64,

    // Tier movement
    pub promotions_off_heap_to_heap: u64,
    pub promotions_disk_to_heap: u64,
    pub demotions_heap_to_off_heap: u64,
    pub demotions_off_heap_to_disk: u64,
    pub skipped_demotions: u64,

    // Latency
    pub get_latency: Duration,
    pub put_latency: Duration,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
