//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the tier engine depends on. Adapters in [`crate::adapters`]
//! and policies in [`crate::cache::policy`] provide the implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Tier Engine                           │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  Serializer │ BackingStore │ EvictionPolicy         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  JsonSerializer │ CompressedSerializer │ FileStore │ ...    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Runtime type descriptor recorded next to every serialized copy.
///
/// Bytes written for one value type are never decoded as another: the
/// descriptor stored with the bytes must match the cache's value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor(String);

impl TypeDescriptor {
    /// Descriptor for the Rust type `T`
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    /// Descriptor from a stored name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An externalized entry as handed to and returned by a [`BackingStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Entry key
    pub key: String,
    /// Id of the entry that wrote the record; a key reused by a later
    /// `put` gets a new generation
    pub generation: u64,
    /// Type of the serialized value
    pub descriptor: TypeDescriptor,
    /// Expiration instant (None = never)
    pub expires_at: Option<DateTime<Utc>>,
    /// Serialized value
    pub bytes: Bytes,
}

impl StoredRecord {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of one disposal pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposalReport {
    /// Entries moved to the next tier
    pub moved: usize,
    /// Candidates left in place (serialization or allocation failure, busy)
    pub skipped: usize,
    /// Off-heap bytes returned to the free-slot index
    pub freed_bytes: usize,
}

impl DisposalReport {
    /// Combine two reports
    pub fn merge(self, other: DisposalReport) -> DisposalReport {
        DisposalReport {
            moved: self.moved + other.moved,
            skipped: self.skipped + other.skipped,
            freed_bytes: self.freed_bytes + other.freed_bytes,
        }
    }
}

/// Error raised by a [`Serializer`] on unencodable values or malformed bytes
#[derive(Error, Debug)]
#[error("{0}")]
pub struct CodecError(pub String);

impl CodecError {
    /// Wrap any displayable reason
    pub fn new(reason: impl ToString) -> Self {
        Self(reason.to_string())
    }
}

// =============================================================================
// Port: Serializer
// =============================================================================

/// Turns cached values into bytes and back.
///
/// Implementations must fail with [`CodecError`] on malformed input rather
/// than return a corrupt value.
pub trait Serializer<V>: Send + Sync {
    /// Encode `value`
    fn serialize(&self, value: &V) -> std::result::Result<Vec<u8>, CodecError>;

    /// Decode bytes previously produced by [`Serializer::serialize`]
    fn deserialize(&self, bytes: &[u8]) -> std::result::Result<V, CodecError>;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

// =============================================================================
// Port: Backing Store
// =============================================================================

/// Cold tier holding externalized entries keyed by entry key.
///
/// Calls are synchronous and may block on I/O.
pub trait BackingStore: Send + Sync {
    /// Write a record, replacing any prior record for the same key
    fn persist(&self, record: &StoredRecord) -> Result<()>;

    /// Read a record back without removing it
    fn load(&self, key: &str) -> Result<Option<StoredRecord>>;

    /// Remove a record, returning whether one was present
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove the record for `key` only if it was written by `generation`
    ///
    /// Returns whether a record was removed. A record from any other
    /// generation is left in place.
    fn delete_if(&self, key: &str, generation: u64) -> Result<bool>;

    /// Number of persisted records
    fn count(&self) -> Result<u64>;

    /// Drop every persisted record
    fn clear(&self) -> Result<()>;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

// =============================================================================
// Port: Eviction Policy
// =============================================================================

/// Overflow-disposal mechanics exposed by the engine to eviction policies
pub trait OverflowDisposer: Send + Sync {
    /// Demote least-recently-used heap entries beyond the entries limit
    fn dispose_heap_overflow(&self) -> Result<DisposalReport>;

    /// Externalize least-recently-used off-heap entries beyond page capacity
    fn dispose_off_heap_overflow(&self) -> Result<DisposalReport>;

    /// Heap pass followed by the off-heap pass
    fn dispose_overflow(&self) -> Result<DisposalReport> {
        let heap = self.dispose_heap_overflow()?;
        let off_heap = self.dispose_off_heap_overflow()?;
        Ok(heap.merge(off_heap))
    }
}

/// Decides when the engine sheds overflow.
///
/// Called after every `put`, `get` and `remove`. The engine never decides
/// the cadence itself.
pub trait EvictionPolicy: Send + Sync {
    /// React to one mutation; may dispose synchronously, defer or batch
    fn on_mutation(&self, disposer: &Arc<dyn OverflowDisposer>) -> Result<()>;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_descriptor_of() {
        let desc = TypeDescriptor::of::<Vec<u8>>();
        assert_eq!(desc, TypeDescriptor::of::<Vec<u8>>());
        assert_ne!(desc, TypeDescriptor::of::<String>());
        assert!(desc.name().contains("Vec"));
    }

    #[test]
    fn test_disposal_report_merge() {
        let a = DisposalReport {
            moved: 2,
            skipped: 1,
            freed_bytes: 100,
        };
        let b = DisposalReport {
            moved: 1,
            skipped: 0,
            freed_bytes: 50,
        };
        assert_eq!(
            a.merge(b),
            DisposalReport {
                moved: 3,
                skipped: 1,
                freed_bytes: 150
            }
        );
    }

    struct Counting(std::sync::atomic::AtomicUsize);

    impl OverflowDisposer for Counting {
        fn dispose_heap_overflow(&self) -> Result<DisposalReport> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(DisposalReport {
                moved: 1,
                ..Default::default()
            })
        }

        fn dispose_off_heap_overflow(&self) -> Result<DisposalReport> {
            self.0.fetch_add(10, std::sync::atomic::Ordering::SeqCst);
            Ok(DisposalReport {
                freed_bytes: 8,
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_dispose_overflow_runs_both_passes() {
        let disposer = Counting(std::sync::atomic::AtomicUsize::new(0));
        let report = disposer.dispose_overflow().unwrap();
        assert_eq!(disposer.0.load(std::sync::atomic::Ordering::SeqCst), 11);
        assert_eq!(report.moved, 1);
        assert_eq!(report.freed_bytes, 8);
    }
}
