//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while moving entries between tiers
///
/// A missing or expired key is not an error: lookups report those as `None`.
#[derive(Error, Debug)]
pub enum Error {
    /// No free slot, no room for a new page and nothing freed by demotion
    #[error("No off-heap memory available for {requested} bytes")]
    AllocationExhausted { requested: usize },

    /// Value could not be turned into bytes or back
    #[error("Serialization failed for entry '{key}': {reason}")]
    SerializationFailed { key: String, reason: String },

    /// Backing store I/O failed on persist/load/delete
    #[error("Backing store {operation} failed for entry '{key}': {reason}")]
    BackingStoreFailed {
        key: String,
        operation: StoreOperation,
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Backing store operation that produced a [`Error::BackingStoreFailed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Persist,
    Load,
    Delete,
    Count,
    Clear,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreOperation::Persist => "persist",
            StoreOperation::Load => "load",
            StoreOperation::Delete => "delete",
            StoreOperation::Count => "count",
            StoreOperation::Clear => "clear",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Build a serialization failure for `key`
    pub fn serialization(key: impl Into<String>, reason: impl ToString) -> Self {
        Error::SerializationFailed {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a backing store failure for `key`
    pub fn store(key: impl Into<String>, operation: StoreOperation, reason: impl ToString) -> Self {
        Error::BackingStoreFailed {
            key: key.into(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// True for failures a disposal pass recovers from by skipping the entry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AllocationExhausted { .. } | Error::SerializationFailed { .. }
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
