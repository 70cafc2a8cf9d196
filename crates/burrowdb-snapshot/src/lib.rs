//! # BurrowDB Snapshot
//!
//! Key-value-index (KVI) snapshot files: a serialized B-tree root that
//! lets reopen skip full log replay.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of BurrowDB.**
//!
//! Users should depend on the main [`burrowdb`](https://crates.io/crates/burrowdb)
//! crate instead, which provides the stable public API. This crate's API may
//! change without notice between minor versions.
//!
//! ---
//!
//! File layout after the standard file header:
//!
//! ```text
//! [len: u32 LE] [bincode KviHeader]
//! [len: u32 LE] [bincode (key, ValueRef)]   (pair_count times)
//! [crc32: u32 LE]                           (over everything above)
//! ```
//!
//! A snapshot that fails validation is skipped with a warning; the engine
//! falls back to an older snapshot or to full log replay.

use burrowdb_core::{Error, FileId, Result, ValueRef};
use burrowdb_storage::{BTree, RateLimiter};
use burrowdb_wal::fileformat::{read_header, write_header, FileHeader, FileKind};
use burrowdb_wal::filecollection::{CollectionFile, FileCollection};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata stored at the front of every KVI file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KviHeader {
    /// Generation of the root this snapshot serializes
    pub generation: u64,
    /// Commit counter at that generation
    pub commit_ulong: u64,
    /// Ulong registers at that generation
    pub ulongs: Vec<u64>,
    /// Number of pairs that follow
    pub pair_count: u64,
    /// Log position replay continues from (file, offset); `None` when the
    /// snapshot was taken before any log existed
    pub replay_position: Option<(FileId, u64)>,
}

/// A snapshot loaded back into memory.
#[derive(Debug)]
pub struct LoadedKvi {
    pub header: KviHeader,
    pub tree: BTree,
}

// Appends go out in buffered chunks so a large tree does not serialize
// into one giant allocation.
const WRITE_CHUNK: usize = 256 * 1024;

/// Serialize `tree` into a new KVI file. Returns the file id and the
/// number of bytes written.
pub fn write_kvi(
    files: &Arc<dyn FileCollection>,
    tree: &BTree,
    header: &KviHeader,
    mut limiter: Option<&mut RateLimiter>,
) -> Result<(FileId, u64)> {
    debug_assert_eq!(header.pair_count, tree.len());

    let file = files.create_file()?;
    let file_id = file.id();
    let file_header = FileHeader {
        file_id,
        generation: header.generation,
        previous_log_file: None,
    };
    let header_size = write_header(file.as_ref(), FileKind::KeyValueIndex, &file_header)?;

    fn push_frame(buf: &mut Vec<u8>, hasher: &mut Hasher, body: Vec<u8>) {
        let len = (body.len() as u32).to_le_bytes();
        hasher.update(&len);
        hasher.update(&body);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(&body);
    }

    let mut hasher = Hasher::new();
    let mut buf: Vec<u8> = Vec::with_capacity(WRITE_CHUNK);
    let mut written = header_size;

    let header_body = bincode::serialize(header)
        .map_err(|e| Error::Serialization(format!("Failed to serialize KVI header: {}", e)))?;
    push_frame(&mut buf, &mut hasher, header_body);

    for (key, value) in tree.iter() {
        let body = bincode::serialize(&(key, value))
            .map_err(|e| Error::Serialization(format!("Failed to serialize KVI pair: {}", e)))?;
        push_frame(&mut buf, &mut hasher, body);

        if buf.len() >= WRITE_CHUNK {
            file.append(&buf)?;
            written += buf.len() as u64;
            if let Some(l) = limiter.as_mut() {
                l.throttle(buf.len() as u64);
            }
            buf.clear();
        }
    }

    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    file.append(&buf)?;
    written += buf.len() as u64;
    if let Some(l) = limiter.as_mut() {
        l.throttle(buf.len() as u64);
    }
    file.flush()?;

    tracing::debug!(
        file_id,
        pairs = header.pair_count,
        bytes = written,
        "wrote key-value-index snapshot"
    );
    Ok((file_id, written))
}

// Sequential reader pulling the file in large chunks.
struct ChunkedReader<'a> {
    file: &'a dyn CollectionFile,
    offset: u64,
    buf: Vec<u8>,
    pos: usize,
}

impl<'a> ChunkedReader<'a> {
    fn new(file: &'a dyn CollectionFile, offset: u64) -> Self {
        Self {
            file,
            offset,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn take(&mut self, len: usize) -> Result<Vec<u8>> {
        while self.buf.len() - self.pos < len {
            let chunk = self.file.read(self.offset, WRITE_CHUNK.max(len))?;
            if chunk.is_empty() {
                return Err(Error::Corrupt("Key-value index ends early".to_string()));
            }
            self.offset += chunk.len() as u64;
            self.buf.drain(..self.pos);
            self.pos = 0;
            self.buf.extend_from_slice(&chunk);
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }
}

/// Load and validate a KVI file, rebuilding the tree bottom-up.
pub fn read_kvi(file: &Arc<dyn CollectionFile>) -> Result<LoadedKvi> {
    let (kind, _, header_size) = read_header(file.as_ref())?;
    if kind != FileKind::KeyValueIndex {
        return Err(Error::InvalidOperation(format!(
            "File {} is not a key-value index",
            file.id()
        )));
    }

    fn read_frame(reader: &mut ChunkedReader<'_>, hasher: &mut Hasher) -> Result<Vec<u8>> {
        let len_bytes = reader.take(4)?;
        hasher.update(&len_bytes);
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        let body = reader.take(len as usize)?;
        hasher.update(&body);
        Ok(body)
    }

    let mut reader = ChunkedReader::new(file.as_ref(), header_size);
    let mut hasher = Hasher::new();

    let header_body = read_frame(&mut reader, &mut hasher)?;
    let header: KviHeader = bincode::deserialize(&header_body)
        .map_err(|e| Error::Corrupt(format!("Bad KVI header: {}", e)))?;

    let mut pairs: Vec<(Vec<u8>, ValueRef)> = Vec::with_capacity(header.pair_count as usize);
    for _ in 0..header.pair_count {
        let body = read_frame(&mut reader, &mut hasher)?;
        let pair: (Vec<u8>, ValueRef) = bincode::deserialize(&body)
            .map_err(|e| Error::Corrupt(format!("Bad KVI pair: {}", e)))?;
        if let Some((prev, _)) = pairs.last() {
            if prev.as_slice() >= pair.0.as_slice() {
                return Err(Error::Corrupt(
                    "KVI pairs are not strictly ordered".to_string(),
                ));
            }
        }
        pairs.push(pair);
    }

    let crc_bytes = reader.take(4)?;
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if hasher.finalize() != expected {
        return Err(Error::Corrupt(format!(
            "KVI file {} failed checksum validation",
            file.id()
        )));
    }

    let tree = BTree::bulk_load(pairs);
    Ok(LoadedKvi { header, tree })
}
