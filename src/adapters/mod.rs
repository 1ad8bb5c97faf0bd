//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │            Serializer<V>   │   BackingStore                 │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ JsonSerializer │ BytesSerializer │ CompressedSerializer    │ │
//! │  │ InMemoryStore │ FileStore                                  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tiered_cache::adapters::{FileStore, JsonSerializer};
//!
//! let cache = TierCache::builder(config)
//!     .serializer(JsonSerializer::new())
//!     .store(FileStore::open("/var/cache/app")?)
//!     .build()?;
//! ```

mod file_store;
mod memory_store;
mod serializer;

pub use file_store::FileStore;
pub use memory_store::InMemoryStore;
pub use serializer::{BytesSerializer, CompressedSerializer, CompressionAlgorithm, JsonSerializer};
