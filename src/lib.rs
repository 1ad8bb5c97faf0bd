//! Tiered Cache - Embedded Three-Tier Object Cache
//!
//! Keeps hot values live on the heap, spills warm ones as serialized bytes
//! into large pre-allocated off-heap pages, and pushes cold ones out to a
//! pluggable backing store. Reads transparently promote back to the heap.
//!
//! # Architecture
//!
//! ```text
//! put/get/remove → TierCache → TierEngine ─┬─→ heap (live values, LRU)
//!                      │                    ├─→ slab pages (ranges, LRU)
//!                      ▼                    └─→ BackingStore (records)
//!               EvictionPolicy
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Serializers and backing stores implementing domain ports
//! - [`cache`] - Tier engine, slab allocator, policies and the facade
//! - [`domain`] - Port traits and value objects
//! - [`error`] - Error types

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use adapters::{BytesSerializer, CompressedSerializer, FileStore, InMemoryStore, JsonSerializer};
pub use cache::{kb, mb, CacheConfig, CacheStats, RemovedEntry, Tier, TierCache};
pub use domain::{BackingStore, EvictionPolicy, Serializer};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
