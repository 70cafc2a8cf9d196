//! Configuration for opening a database.

use burrowdb_core::{CompressionStrategy, DbLogger, NoCompression, NullLogger};
use burrowdb_wal::{FileCollection, InMemoryFileCollection};
use std::sync::Arc;

/// Default maximum size of one transaction-log or pure-value file.
pub const DEFAULT_FILE_SPLIT_SIZE: u64 = 64 * 1024 * 1024;

/// Default cap on bytes the compactor buffers in RAM per relocation pass.
pub const DEFAULT_COMPACTOR_RAM_LIMIT_MB: u64 = 200;

/// Decides when background compaction runs.
///
/// The engine calls [`advise_running`](CompactorScheduler::advise_running)
/// after commits that may have created reclaimable waste. Implementations
/// may run the closure synchronously, hand it to their own thread, or
/// drop it; the closure returns whether any work was done and is always
/// safe to invoke concurrently with readers and writers.
pub trait CompactorScheduler: Send + Sync {
    fn advise_running(&self, compact: Box<dyn FnOnce() -> bool + Send>);
}

/// Runs every compaction advice synchronously on the committing thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl CompactorScheduler for ImmediateScheduler {
    fn advise_running(&self, compact: Box<dyn FnOnce() -> bool + Send>) {
        compact();
    }
}

/// Configuration for [`KeyValueDB::open`](crate::KeyValueDB::open).
pub struct KeyValueDBOptions {
    /// Where the database files live; defaults to an in-memory collection.
    pub file_collection: Arc<dyn FileCollection>,
    /// Compression applied to large value blocks.
    pub compression: Arc<dyn CompressionStrategy>,
    /// Maximum size of one log or pure-value file before a new one is
    /// chained on.
    pub file_split_size: u64,
    /// Background compaction trigger; `None` disables background
    /// compaction (explicit [`compact`](crate::KeyValueDB::compact) calls
    /// still work).
    pub compactor_scheduler: Option<Arc<dyn CompactorScheduler>>,
    /// Cap on compactor write throughput in bytes per second; 0 means
    /// unlimited.
    pub compactor_write_bytes_per_second_limit: u64,
    /// Cap on bytes of value data the compactor relocates per pass.
    pub compactor_ram_limit_in_mb: u64,
    /// Open the database as it existed at this commit counter, provided
    /// the history was retained.
    pub open_up_to_commit_ulong: Option<u64>,
    /// Keep enough history on disk to later reopen at this commit counter.
    pub preserve_history_up_to_commit_ulong: Option<u64>,
    /// On a broken log chain, recover the reachable suffix instead of
    /// opening empty.
    pub lenient_open: bool,
    /// Event sink for file lifecycle, compaction and leak reports.
    pub logger: Arc<dyn DbLogger>,
}

impl Default for KeyValueDBOptions {
    fn default() -> Self {
        Self {
            file_collection: Arc::new(InMemoryFileCollection::new()),
            compression: Arc::new(NoCompression),
            file_split_size: DEFAULT_FILE_SPLIT_SIZE,
            compactor_scheduler: None,
            compactor_write_bytes_per_second_limit: 0,
            compactor_ram_limit_in_mb: DEFAULT_COMPACTOR_RAM_LIMIT_MB,
            open_up_to_commit_ulong: None,
            preserve_history_up_to_commit_ulong: None,
            lenient_open: false,
            logger: Arc::new(NullLogger),
        }
    }
}

impl KeyValueDBOptions {
    /// Options for a fresh in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_file_collection(mut self, fc: Arc<dyn FileCollection>) -> Self {
        self.file_collection = fc;
        self
    }

    pub fn with_compression(mut self, compression: Arc<dyn CompressionStrategy>) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_file_split_size(mut self, size: u64) -> Self {
        self.file_split_size = size;
        self
    }

    pub fn with_compactor_scheduler(mut self, scheduler: Arc<dyn CompactorScheduler>) -> Self {
        self.compactor_scheduler = Some(scheduler);
        self
    }

    pub fn with_open_up_to_commit_ulong(mut self, value: u64) -> Self {
        self.open_up_to_commit_ulong = Some(value);
        self
    }

    pub fn with_preserve_history_up_to_commit_ulong(mut self, value: u64) -> Self {
        self.preserve_history_up_to_commit_ulong = Some(value);
        self
    }

    pub fn with_lenient_open(mut self, lenient: bool) -> Self {
        self.lenient_open = lenient;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn DbLogger>) -> Self {
        self.logger = logger;
        self
    }
}
