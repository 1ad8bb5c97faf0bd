//! Property-Based Tests for the Tier Engine
//!
//! Drives random operation sequences against a small engine and checks the
//! bookkeeping after every step.
//!
//! # Test Properties
//!
//! 1. **Accounting**: used memory equals the sum of off-heap entry lengths
//! 2. **Disjointness**: no two off-heap entries or free slots overlap
//! 3. **Fidelity**: every read returns exactly the last value put
//! 4. **Heap bound**: after a heap pass, heap size ≤ limit + skipped entries

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use super::config::CacheConfig;
use super::engine::TierEngine;
use crate::adapters::{BytesSerializer, InMemoryStore};
use crate::domain::BackingStore;

const PAGE_SIZE: usize = 512;

#[derive(Debug, Clone)]
enum Op {
    Put { key: u8, len: usize, fill: u8 },
    Get { key: u8 },
    Remove { key: u8 },
    DisposeHeap,
    DisposeOffHeap,
}

// =============================================================================
// Property Strategies
// =============================================================================

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..16, 1usize..=300, any::<u8>())
            .prop_map(|(key, len, fill)| Op::Put { key, len, fill }),
        3 => (0u8..16).prop_map(|key| Op::Get { key }),
        1 => (0u8..16).prop_map(|key| Op::Remove { key }),
        2 => Just(Op::DisposeHeap),
        1 => Just(Op::DisposeOffHeap),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..80)
}

fn engine(limit: usize, max_pages: usize) -> (TierEngine<Vec<u8>>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let config = CacheConfig::default()
        .with_entries_limit(limit)
        .with_pages(PAGE_SIZE, max_pages);
    let engine = TierEngine::new(config, Arc::new(BytesSerializer), store.clone())
        .expect("valid config");
    (engine, store)
}

fn check_bookkeeping(engine: &TierEngine<Vec<u8>>) -> Result<(), TestCaseError> {
    let ranges = engine.off_heap_ranges();
    let owned: usize = ranges.iter().map(|r| r.len).sum();
    prop_assert_eq!(owned, engine.used_memory());

    let mut all = ranges;
    all.extend(engine.free_ranges());
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            prop_assert!(!a.overlaps(b), "{} overlaps {}", a, b);
        }
    }
    Ok(())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: bookkeeping holds and reads match the model after every step.
    #[test]
    fn prop_random_operations_keep_invariants(
        limit in 0usize..4,
        max_pages in 1usize..=2,
        ops in ops_strategy(),
    ) {
        let (engine, store) = engine(limit, max_pages);
        let mut model: HashMap<u8, Vec<u8>> = HashMap::new();

        for op in ops {
            match op {
                Op::Put { key, len, fill } => {
                    let value = vec![fill; len];
                    engine.insert(key.to_string(), value.clone(), None)?;
                    model.insert(key, value);
                }
                Op::Get { key } => {
                    let got = engine.get(&key.to_string())?;
                    prop_assert_eq!(got.as_ref(), model.get(&key));
                }
                Op::Remove { key } => {
                    let removed = engine.remove(&key.to_string())?;
                    let expected = model.remove(&key);
                    prop_assert_eq!(removed.and_then(|r| r.value), expected);
                }
                Op::DisposeHeap => {
                    let report = engine.dispose_heap_overflow()?;
                    prop_assert!(engine.heap_count() <= limit + report.skipped);
                }
                Op::DisposeOffHeap => {
                    engine.dispose_off_heap_overflow()?;
                }
            }
            check_bookkeeping(&engine)?;
            prop_assert_eq!(engine.entry_count(), model.len());
        }

        let stats = engine.stats()?;
        prop_assert_eq!(
            stats.heap_count + stats.off_heap_count + store.count()? as usize,
            model.len()
        );

        for (key, value) in &model {
            let got = engine.get(&key.to_string())?;
            prop_assert_eq!(got.as_ref(), Some(value));
        }
    }

    /// Property: a reset always leaves one full free slot per page.
    #[test]
    fn prop_reset_restores_pages(
        limit in 0usize..3,
        ops in ops_strategy(),
    ) {
        let (engine, _store) = engine(limit, 2);
        for op in ops {
            if let Op::Put { key, len, fill } = op {
                engine.insert(key.to_string(), vec![fill; len], None)?;
                engine.dispose_heap_overflow()?;
            }
        }

        engine.reset()?;
        let stats = engine.stats()?;
        prop_assert_eq!(stats.used_memory, 0);
        prop_assert_eq!(stats.entry_count, 0);
        prop_assert_eq!(stats.disk_count, 0);
        prop_assert_eq!(stats.free_slot_count, stats.page_count);
        prop_assert!(engine.free_ranges().iter().all(|r| r.offset == 0 && r.len == PAGE_SIZE));
    }
}
