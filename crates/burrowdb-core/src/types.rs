//! Shared value and cursor types.

use serde::{Deserialize, Serialize};

/// Identifier of a file inside a file collection.
pub type FileId = u64;

/// Result of a `find` operation on the ordered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindResult {
    /// The key exists; the cursor sits on it.
    Exact,
    /// The key does not exist; the cursor sits on the largest key before it.
    Previous,
    /// The key does not exist; the cursor sits on the smallest key after it.
    Next,
    /// The index (or the prefix-scoped view of it) is empty.
    NotFound,
}

/// Where a value lives.
///
/// Small values are stored inline in index leaves and log records. Values
/// above the inline threshold are appended once to a pure-value file and
/// referenced by position, so rewriting the key into new tree generations
/// never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueRef {
    /// Value bytes held directly in the leaf.
    Inline(Vec<u8>),
    /// Value bytes stored in a pure-value file.
    External {
        /// File the block was appended to
        file_id: FileId,
        /// Byte offset of the block within the file
        offset: u64,
        /// Stored length (compressed length when compression applied)
        len: u32,
        /// Uncompressed length; equal to `len` when stored raw
        raw_len: u32,
    },
}

impl ValueRef {
    /// Uncompressed length of the value in bytes.
    pub fn raw_len(&self) -> usize {
        match self {
            ValueRef::Inline(v) => v.len(),
            ValueRef::External { raw_len, .. } => *raw_len as usize,
        }
    }

    /// Bytes this reference occupies in the given pure-value file, or 0.
    pub fn stored_len_in(&self, file: FileId) -> u64 {
        match self {
            ValueRef::External { file_id, len, .. } if *file_id == file => *len as u64,
            _ => 0,
        }
    }
}

/// Values at or below this many bytes are stored inline in leaves.
pub const INLINE_VALUE_LIMIT: usize = 64;
