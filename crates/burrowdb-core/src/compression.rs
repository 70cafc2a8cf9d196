//! Byte-compression seam for pure-value blocks.
//!
//! Concrete block codecs are adapters supplied by the embedder; the engine
//! ships only the pass-through default.

use crate::Result;

/// Strategy deciding whether and how value blocks are compressed.
pub trait CompressionStrategy: Send + Sync {
    /// Try to compress `raw`. Returns `None` when the value should be
    /// stored as-is (not worth compressing, or the strategy declines).
    fn compress(&self, raw: &[u8]) -> Option<Vec<u8>>;

    /// Decompress a block previously produced by `compress`.
    fn decompress(&self, stored: &[u8], raw_len: usize) -> Result<Vec<u8>>;
}

/// Stores every value uncompressed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompression;

impl CompressionStrategy for NoCompression {
    fn compress(&self, _raw: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn decompress(&self, stored: &[u8], _raw_len: usize) -> Result<Vec<u8>> {
        Ok(stored.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_compression_roundtrip() {
        let c = NoCompression;
        assert!(c.compress(b"some bytes").is_none());
        assert_eq!(c.decompress(b"some bytes", 10).unwrap(), b"some bytes");
    }
}
