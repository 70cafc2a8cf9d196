// Transaction-log record format and encoding/decoding
//
// Record format (binary):
// [length: u32 LE] [type: u8] [payload bytes] [crc32: u32 LE]
//
// Types:
// - CREATE_OR_UPDATE (1): key upsert; value inline or an external reference
// - ERASE_ONE (2): single key deletion
// - ERASE_RANGE (3): deletion of an inclusive key range
// - SET_ULONG (4): write to one 64-bit register
// - SET_COMMIT_ULONG (5): write to the commit counter register
// - COMMIT (6): transaction commit marker with the persisted registers
// - ROLLBACK (7): explicit rollback marker; preceding ops are discarded

use burrowdb_core::{Error, Result, ValueRef};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Log record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    CreateOrUpdate = 1,
    EraseOne = 2,
    EraseRange = 3,
    SetUlong = 4,
    SetCommitUlong = 5,
    Commit = 6,
    Rollback = 7,
}

impl TryFrom<u8> for RecordType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordType::CreateOrUpdate),
            2 => Ok(RecordType::EraseOne),
            3 => Ok(RecordType::EraseRange),
            4 => Ok(RecordType::SetUlong),
            5 => Ok(RecordType::SetCommitUlong),
            6 => Ok(RecordType::Commit),
            7 => Ok(RecordType::Rollback),
            _ => Err(Error::InvalidOperation(format!(
                "Unknown log record type: {}",
                value
            ))),
        }
    }
}

/// One operation recorded in the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    CreateOrUpdate {
        key: Vec<u8>,
        value: ValueRef,
    },
    EraseOne {
        key: Vec<u8>,
    },
    EraseRange {
        first_key: Vec<u8>,
        last_key: Vec<u8>,
    },
    SetUlong {
        index: u32,
        value: u64,
    },
    SetCommitUlong {
        value: u64,
    },
    /// Commit marker; everything since the previous marker becomes durable.
    Commit {
        generation: u64,
        commit_ulong: u64,
        ulongs: Vec<u64>,
    },
    Rollback,
}

impl LogOp {
    pub fn record_type(&self) -> RecordType {
        match self {
            LogOp::CreateOrUpdate { .. } => RecordType::CreateOrUpdate,
            LogOp::EraseOne { .. } => RecordType::EraseOne,
            LogOp::EraseRange { .. } => RecordType::EraseRange,
            LogOp::SetUlong { .. } => RecordType::SetUlong,
            LogOp::SetCommitUlong { .. } => RecordType::SetCommitUlong,
            LogOp::Commit { .. } => RecordType::Commit,
            LogOp::Rollback => RecordType::Rollback,
        }
    }

    /// Encode with framing and CRC.
    /// Format: [length: u32 LE] [type: u8] [payload bytes] [crc32: u32 LE]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload_bytes = bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize log op: {}", e)))?;

        let type_byte = self.record_type() as u8;
        let content_len = 1 + payload_bytes.len();

        let mut hasher = Hasher::new();
        hasher.update(&[type_byte]);
        hasher.update(&payload_bytes);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(4 + content_len + 4);
        frame.extend_from_slice(&(content_len as u32).to_le_bytes());
        frame.push(type_byte);
        frame.extend_from_slice(&payload_bytes);
        frame.extend_from_slice(&crc.to_le_bytes());

        Ok(frame)
    }

    /// Decode one frame from `data`; returns the op and the frame size.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 9 {
            // Minimum: 4 (length) + 1 (type) + 0 (payload) + 4 (crc)
            return Err(Error::Serialization("Incomplete record frame".to_string()));
        }

        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let total_size = 4 + length + 4;
        if data.len() < total_size {
            return Err(Error::Serialization(format!(
                "Incomplete record: expected {} bytes, got {}",
                total_size,
                data.len()
            )));
        }

        let type_byte = data[4];
        RecordType::try_from(type_byte)?;
        let payload_bytes = &data[5..4 + length];

        let crc_offset = 4 + length;
        let expected_crc = u32::from_le_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);

        let mut hasher = Hasher::new();
        hasher.update(&[type_byte]);
        hasher.update(payload_bytes);
        if hasher.finalize() != expected_crc {
            return Err(Error::Storage(format!(
                "CRC mismatch in log record at type {}",
                type_byte
            )));
        }

        let op: LogOp = bincode::deserialize(payload_bytes)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize log op: {}", e)))?;

        if op.record_type() as u8 != type_byte {
            return Err(Error::Corrupt(
                "Record type byte does not match payload".to_string(),
            ));
        }

        Ok((op, total_size))
    }
}
