//! Compaction support - waste accounting, cancellation and write-rate
//! limiting.
//!
//! The compaction loop itself lives in the API crate next to the
//! transaction manager (it publishes roots through it); the pieces here
//! are pure bookkeeping over the index and the file collection.

use crate::index::BTree;
use burrowdb_core::{FileId, ValueRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation signal, checked between discrete steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Statistics for compaction
#[derive(Debug, Clone, Default)]
pub struct CompactionStats {
    /// Total bytes read while relocating values
    pub bytes_read: u64,
    /// Total bytes written to new pure-value files
    pub bytes_written: u64,
    /// Number of compaction passes that did work
    pub compaction_count: u64,
    /// Number of value blocks relocated
    pub values_relocated: u64,
    /// Number of files marked for deletion
    pub files_marked: u64,
}

/// Live bytes per pure-value file, from the viewpoint of one root.
///
/// Waste for a file is its size minus header minus these live bytes;
/// blocks superseded by later writes simply stop being counted.
pub fn live_bytes_per_value_file(tree: &BTree) -> HashMap<FileId, u64> {
    let mut live: HashMap<FileId, u64> = HashMap::new();
    for (_, vref) in tree.iter() {
        if let ValueRef::External { file_id, len, .. } = vref {
            // Block plus its trailing checksum
            *live.entry(*file_id).or_insert(0) += *len as u64 + 4;
        }
    }
    live
}

/// Sleep-based write throughput cap for background compaction I/O.
///
/// A limit of zero disables throttling.
pub struct RateLimiter {
    bytes_per_second: u64,
    window_start: Instant,
    written: u64,
}

impl RateLimiter {
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            window_start: Instant::now(),
            written: 0,
        }
    }

    /// Account for `bytes` just written, sleeping when ahead of the cap.
    pub fn throttle(&mut self, bytes: u64) {
        if self.bytes_per_second == 0 {
            return;
        }
        self.written += bytes;
        let allowed_elapsed =
            Duration::from_secs_f64(self.written as f64 / self.bytes_per_second as f64);
        let actual_elapsed = self.window_start.elapsed();
        if allowed_elapsed > actual_elapsed {
            std::thread::sleep(allowed_elapsed - actual_elapsed);
        }
    }
}
