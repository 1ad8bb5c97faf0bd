//! Value Serializers
//!
//! [`JsonSerializer`] for any serde type, [`BytesSerializer`] for raw
//! buffers, and [`CompressedSerializer`] which LZ4-compresses the output of
//! another serializer.
//!
//! # Example
//!
//! ```
//! use tiered_cache::adapters::{CompressedSerializer, JsonSerializer};
//! use tiered_cache::domain::Serializer;
//!
//! let serializer = CompressedSerializer::new(JsonSerializer::new());
//! let value = "repeat ".repeat(100);
//!
//! let bytes = Serializer::<String>::serialize(&serializer, &value).unwrap();
//! assert!(bytes.len() < value.len());
//!
//! let decoded: String = serializer.deserialize(&bytes).unwrap();
//! assert_eq!(decoded, value);
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{CodecError, Serializer};

// =============================================================================
// JSON
// =============================================================================

/// serde_json encoding for any `Serialize + DeserializeOwned` value
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Create a JSON serializer
    pub fn new() -> Self {
        Self
    }
}

impl<V> Serializer<V> for JsonSerializer
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::new)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<V, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::new)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

// =============================================================================
// Raw bytes
// =============================================================================

/// Identity encoding for byte buffers; serialized size equals value length
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "bytes"
    }
}

impl Serializer<Bytes> for BytesSerializer {
    fn serialize(&self, value: &Bytes) -> Result<Vec<u8>, CodecError> {
        Ok(value.to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn name(&self) -> &'static str {
        "bytes"
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Algorithm tag written as the first byte of a compressed payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// Stored as-is
    None,
    /// LZ4 block with prepended size
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Wraps another serializer and LZ4-compresses its output
///
/// Payloads under `min_size` bytes, or ones LZ4 cannot shrink, are stored
/// uncompressed behind the same one-byte tag.
pub struct CompressedSerializer<S> {
    inner: S,
    min_size: usize,
    level: i32,
}

impl<S> CompressedSerializer<S> {
    /// Default threshold below which payloads are stored uncompressed
    pub const DEFAULT_MIN_SIZE: usize = 64;

    /// Wrap `inner` with default settings
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            min_size: Self::DEFAULT_MIN_SIZE,
            level: 4,
        }
    }

    /// Set the compression threshold
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Set the LZ4 high-compression level
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    fn compress(&self, data: Vec<u8>) -> Vec<u8> {
        if data.len() >= self.min_size {
            let mode = lz4::block::CompressionMode::HIGHCOMPRESSION(self.level);
            match lz4::block::compress(&data, Some(mode), true) {
                Ok(compressed) if compressed.len() < data.len() => {
                    return tagged(CompressionAlgorithm::Lz4, &compressed);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "lz4 compression failed, storing uncompressed"),
            }
        }
        tagged(CompressionAlgorithm::None, &data)
    }

    fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| CodecError::new("empty compressed payload"))?;
        match CompressionAlgorithm::from_tag(tag) {
            Some(CompressionAlgorithm::None) => Ok(payload.to_vec()),
            Some(CompressionAlgorithm::Lz4) => lz4::block::decompress(payload, None)
                .map_err(|e| CodecError::new(format!("lz4 decompression failed: {}", e))),
            None => Err(CodecError::new(format!("unknown compression tag {}", tag))),
        }
    }
}

fn tagged(algorithm: CompressionAlgorithm, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(algorithm.tag());
    out.extend_from_slice(payload);
    out
}

impl<S, V> Serializer<V> for CompressedSerializer<S>
where
    S: Serializer<V>,
{
    fn serialize(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        Ok(self.compress(self.inner.serialize(value)?))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<V, CodecError> {
        self.inner.deserialize(&Self::decompress(bytes)?)
    }

    fn name(&self) -> &'static str {
        "lz4"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const TEST_DATA: &str = "Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        visits: u32,
    }

    #[test]
    fn test_json_struct() {
        let serializer = JsonSerializer::new();
        let session = Session {
            user: "ada".into(),
            visits: 3,
        };

        let bytes = serializer.serialize(&session).unwrap();
        let decoded: Session = serializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn test_json_rejects_malformed_bytes() {
        let serializer = JsonSerializer::new();
        let result: Result<Session, _> = serializer.deserialize(b"{\"user\": 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_bytes_serializer_is_identity() {
        let value = vec![1u8, 2, 3];
        let bytes = Serializer::<Vec<u8>>::serialize(&BytesSerializer, &value).unwrap();
        assert_eq!(bytes, value);

        let buffer: Bytes = BytesSerializer.deserialize(&bytes).unwrap();
        assert_eq!(buffer.as_ref(), &value[..]);
    }

    #[test]
    fn test_compressed_shrinks_repetitive_payload() {
        let serializer = CompressedSerializer::new(JsonSerializer::new());
        let value = TEST_DATA.repeat(4);

        let bytes = Serializer::<String>::serialize(&serializer, &value).unwrap();
        assert_eq!(bytes[0], CompressionAlgorithm::Lz4.tag());
        assert!(bytes.len() < value.len());

        let decoded: String = serializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_small_payload_stored_uncompressed() {
        let serializer = CompressedSerializer::new(BytesSerializer);
        let bytes = Serializer::<Vec<u8>>::serialize(&serializer, &b"tiny".to_vec()).unwrap();

        assert_eq!(bytes, b"\0tiny");
        let decoded: Vec<u8> = serializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded, b"tiny");
    }

    #[test]
    fn test_incompressible_payload_stored_uncompressed() {
        let serializer = CompressedSerializer::new(BytesSerializer).with_min_size(0);
        let value: Vec<u8> = (0..256u32).map(|i| (i.wrapping_mul(97) ^ 0x5a) as u8).collect();

        let bytes = Serializer::<Vec<u8>>::serialize(&serializer, &value).unwrap();
        let decoded: Vec<u8> = serializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert!(bytes.len() <= value.len() + 1);
    }

    #[test]
    fn test_compressed_rejects_bad_tag_and_empty_input() {
        let serializer = CompressedSerializer::new(BytesSerializer);
        let empty: Result<Vec<u8>, _> = serializer.deserialize(&[]);
        let unknown: Result<Vec<u8>, _> = serializer.deserialize(&[9, 1, 2]);
        let corrupt: Result<Vec<u8>, _> = serializer.deserialize(&[1, 10, 0, 0, 0, 0xff]);

        assert!(empty.is_err());
        assert!(unknown.unwrap_err().to_string().contains("unknown compression tag"));
        assert!(corrupt.is_err());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(CompressionAlgorithm::None.name(), "none");
        assert_eq!(CompressionAlgorithm::Lz4.to_string(), "lz4");
    }
}
