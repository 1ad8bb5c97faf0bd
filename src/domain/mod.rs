//! Domain Layer
//!
//! Port traits and value objects shared by the tier engine and its adapters.
//!
//! # Usage
//!
//! ```ignore
//! use tiered_cache::domain::ports::{BackingStore, StoredRecord};
//!
//! fn externalize<S: BackingStore>(store: &S, record: &StoredRecord) -> Result<()> {
//!     store.persist(record)
//! }
//! ```

pub mod ports;

pub use ports::{
    // Port traits
    BackingStore,
    EvictionPolicy,
    OverflowDisposer,
    Serializer,
    // Value objects
    CodecError,
    DisposalReport,
    StoredRecord,
    TypeDescriptor,
};
