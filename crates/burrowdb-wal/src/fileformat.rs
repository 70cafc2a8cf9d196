// File kind tags and headers.
//
// Every collection file starts with:
// [magic "BRWD"] [format version: u8] [kind: u8] [header len: u32 LE] [bincode FileHeader]
//
// Log files carry a continuation pointer to the previous log file so replay
// can walk the chain from the last snapshot forward.

use crate::filecollection::CollectionFile;
use burrowdb_core::format_version::{FILE_MAGIC, LOG_FORMAT_VERSION};
use burrowdb_core::{Error, FileId, Result};
use serde::{Deserialize, Serialize};

/// What a collection file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Sequence of transaction-log records
    TransactionLog,
    /// Raw value blocks referenced from index leaves
    PureValue,
    /// Serialized key-value-index snapshot
    KeyValueIndex,
    /// Unrecognized content; ignored by the engine
    Unknown,
}

impl FileKind {
    fn as_byte(self) -> u8 {
        match self {
            FileKind::TransactionLog => 1,
            FileKind::PureValue => 2,
            FileKind::KeyValueIndex => 3,
            FileKind::Unknown => 0xFF,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            1 => FileKind::TransactionLog,
            2 => FileKind::PureValue,
            3 => FileKind::KeyValueIndex,
            _ => FileKind::Unknown,
        }
    }
}

/// Structured part of the file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Id the collection assigned to this file
    pub file_id: FileId,
    /// First generation whose data this file can contain
    pub generation: u64,
    /// For log files: the log file that precedes this one in the chain
    pub previous_log_file: Option<FileId>,
}

/// Fixed prefix before the bincode header: magic + version + kind + len.
const FIXED_PREFIX_LEN: usize = 4 + 1 + 1 + 4;

/// Write a header to a freshly created file. Returns the header size.
pub fn write_header(
    file: &dyn CollectionFile,
    kind: FileKind,
    header: &FileHeader,
) -> Result<u64> {
    let body = bincode::serialize(header)
        .map_err(|e| Error::Serialization(format!("Failed to serialize file header: {}", e)))?;

    let mut buf = Vec::with_capacity(FIXED_PREFIX_LEN + body.len());
    buf.extend_from_slice(&FILE_MAGIC);
    buf.push(LOG_FORMAT_VERSION);
    buf.push(kind.as_byte());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);

    file.append(&buf)?;
    Ok(buf.len() as u64)
}

/// Read and validate the header of an existing file.
///
/// Returns the kind, the header, and the total header size (the offset of
/// the first content byte). Files that are too short or carry a foreign
/// magic are reported as `Unknown` with a zero-value header rather than as
/// an error, so open can classify and skip them.
pub fn read_header(file: &dyn CollectionFile) -> Result<(FileKind, FileHeader, u64)> {
    let prefix = file.read(0, FIXED_PREFIX_LEN)?;
    if prefix.len() < FIXED_PREFIX_LEN || prefix[0..4] != FILE_MAGIC {
        return Ok((
            FileKind::Unknown,
            FileHeader {
                file_id: file.id(),
                generation: 0,
                previous_log_file: None,
            },
            0,
        ));
    }

    let version = prefix[4];
    if !burrowdb_core::format_version::log_version().can_read(version) {
        return Err(Error::Corrupt(format!(
            "Unsupported file format version {} in file {}",
            version,
            file.id()
        )));
    }

    let kind = FileKind::from_byte(prefix[5]);
    let body_len = u32::from_le_bytes([prefix[6], prefix[7], prefix[8], prefix[9]]) as usize;

    let body = file.read(FIXED_PREFIX_LEN as u64, body_len)?;
    if body.len() < body_len {
        return Err(Error::Corrupt(format!(
            "Truncated header in file {}",
            file.id()
        )));
    }

    let header: FileHeader = bincode::deserialize(&body)
        .map_err(|e| Error::Corrupt(format!("Bad header in file {}: {}", file.id(), e)))?;

    Ok((kind, header, (FIXED_PREFIX_LEN + body_len) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filecollection::{FileCollection, InMemoryFileCollection};

    #[test]
    fn test_header_roundtrip() {
        let fc = InMemoryFileCollection::new();
        let file = fc.create_file().unwrap();

        let header = FileHeader {
            file_id: file.id(),
            generation: 42,
            previous_log_file: Some(3),
        };
        let written = write_header(file.as_ref(), FileKind::TransactionLog, &header).unwrap();

        let (kind, read, size) = read_header(file.as_ref()).unwrap();
        assert_eq!(kind, FileKind::TransactionLog);
        assert_eq!(read, header);
        assert_eq!(size, written);
    }

    #[test]
    fn test_foreign_file_is_unknown() {
        let fc = InMemoryFileCollection::new();
        let file = fc.create_file().unwrap();
        file.append(b"not a burrowdb file at all").unwrap();

        let (kind, _, offset) = read_header(file.as_ref()).unwrap();
        assert_eq!(kind, FileKind::Unknown);
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_empty_file_is_unknown() {
        let fc = InMemoryFileCollection::new();
        let file = fc.create_file().unwrap();

        let (kind, _, _) = read_header(file.as_ref()).unwrap();
        assert_eq!(kind, FileKind::Unknown);
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let fc = InMemoryFileCollection::new();
        let file = fc.create_file().unwrap();
        let header = FileHeader {
            file_id: file.id(),
            generation: 0,
            previous_log_file: None,
        };
        write_header(file.as_ref(), FileKind::PureValue, &header).unwrap();
        // Keep the fixed prefix intact but cut into the bincode body
        file.set_size(12).unwrap();

        assert!(read_header(file.as_ref()).is_err());
    }
}
