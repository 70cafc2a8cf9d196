// Pure-value store - append-only files holding value payloads above the
// inline threshold.
//
// Block format: [stored bytes] [crc32: u32 LE]. The index leaf keeps the
// block's position and both lengths, so the file itself needs no
// per-block framing beyond the checksum.

use burrowdb_core::{
    CompressionStrategy, Error, FileId, Result, ValueRef, INLINE_VALUE_LIMIT,
};
use burrowdb_wal::fileformat::{write_header, FileHeader, FileKind};
use burrowdb_wal::filecollection::{CollectionFile, FileCollection};
use crc32fast::Hasher;
use std::sync::Arc;

struct CurrentValueFile {
    file: Arc<dyn CollectionFile>,
    file_id: FileId,
    size: u64,
}

/// Appends large values to pure-value files and resolves references back
/// to bytes.
pub struct ValueStore {
    files: Arc<dyn FileCollection>,
    compression: Arc<dyn CompressionStrategy>,
    split_size: u64,
    current: Option<CurrentValueFile>,
}

impl ValueStore {
    pub fn new(
        files: Arc<dyn FileCollection>,
        compression: Arc<dyn CompressionStrategy>,
        split_size: u64,
    ) -> Self {
        Self {
            files,
            compression,
            split_size,
            current: None,
        }
    }

    /// Store `raw`, inline when small enough, otherwise as a block in the
    /// current pure-value file.
    pub fn store(&mut self, raw: &[u8], generation: u64) -> Result<ValueRef> {
        if raw.len() <= INLINE_VALUE_LIMIT {
            return Ok(ValueRef::Inline(raw.to_vec()));
        }

        // Keep the compressed form only when it actually shrinks
        let stored = match self.compression.compress(raw) {
            Some(c) if c.len() < raw.len() => c,
            _ => raw.to_vec(),
        };

        let mut hasher = Hasher::new();
        hasher.update(&stored);
        let crc = hasher.finalize();

        let block_len = stored.len() as u64 + 4;
        let needs_roll = match &self.current {
            None => true,
            Some(cur) => cur.size + block_len > self.split_size,
        };
        if needs_roll {
            self.roll(generation)?;
        }

        let cur = self.current.as_mut().expect("roll always sets current");
        let mut block = stored;
        block.extend_from_slice(&crc.to_le_bytes());
        let offset = cur.file.append(&block)?;
        cur.size = offset + block.len() as u64;

        Ok(ValueRef::External {
            file_id: cur.file_id,
            offset,
            len: (block.len() - 4) as u32,
            raw_len: raw.len() as u32,
        })
    }

    fn roll(&mut self, generation: u64) -> Result<()> {
        if let Some(cur) = &self.current {
            cur.file.flush()?;
        }
        let file = self.files.create_file()?;
        let file_id = file.id();
        let header = FileHeader {
            file_id,
            generation,
            previous_log_file: None,
        };
        let header_size = write_header(file.as_ref(), FileKind::PureValue, &header)?;
        tracing::debug!(file_id, generation, "opened pure-value file");
        self.current = Some(CurrentValueFile {
            file,
            file_id,
            size: header_size,
        });
        Ok(())
    }

    /// Resolve a reference back to the raw value bytes.
    pub fn resolve(&self, vref: &ValueRef) -> Result<Vec<u8>> {
        match vref {
            ValueRef::Inline(bytes) => Ok(bytes.clone()),
            ValueRef::External {
                file_id,
                offset,
                len,
                raw_len,
            } => {
                let file = self.files.get_file(*file_id).ok_or_else(|| {
                    Error::Corrupt(format!("Pure-value file {} is missing", file_id))
                })?;
                let block = file.read(*offset, *len as usize + 4)?;
                if block.len() < *len as usize + 4 {
                    return Err(Error::Corrupt(format!(
                        "Truncated value block in file {} at offset {}",
                        file_id, offset
                    )));
                }
                let (stored, crc_bytes) = block.split_at(*len as usize);

                let mut hasher = Hasher::new();
                hasher.update(stored);
                let expected =
                    u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
                if hasher.finalize() != expected {
                    return Err(Error::Corrupt(format!(
                        "Value block CRC mismatch in file {} at offset {}",
                        file_id, offset
                    )));
                }

                if *len == *raw_len {
                    Ok(stored.to_vec())
                } else {
                    self.compression.decompress(stored, *raw_len as usize)
                }
            }
        }
    }

    /// Make every stored block durable.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(cur) = &self.current {
            cur.file.flush()?;
        }
        Ok(())
    }

    /// File the next large value will land in, if one is open.
    pub fn current_file_id(&self) -> Option<FileId> {
        self.current.as_ref().map(|c| c.file_id)
    }

    /// Stop appending to the current file; the next store opens a new one.
    /// Used by compaction so relocated values land in a fresh file.
    pub fn close_current(&mut self) -> Result<()> {
        if let Some(cur) = self.current.take() {
            cur.file.flush()?;
        }
        Ok(())
    }
}
