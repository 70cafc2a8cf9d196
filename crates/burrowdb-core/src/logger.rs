//! Observability callbacks for engine events.
//!
//! Embedders implement [`DbLogger`] to watch file lifecycle, compaction and
//! transaction-leak events programmatically. The API crate provides a
//! `tracing`-backed implementation; [`NullLogger`] discards everything.

use crate::types::FileId;
use std::time::Duration;

/// Callback sink for engine events.
///
/// All methods have empty default bodies so implementors only override
/// what they care about.
pub trait DbLogger: Send + Sync {
    /// A new transaction-log file was opened.
    fn transaction_log_created(&self, _file_id: FileId) {}

    /// A file was superseded and will be removed once no live transaction
    /// and no retained-history window needs it.
    fn file_marked_for_delete(&self, _file_id: FileId) {}

    /// A key-value-index snapshot finished writing.
    fn key_value_index_created(
        &self,
        _file_id: FileId,
        _pair_count: u64,
        _bytes: u64,
        _elapsed: Duration,
    ) {
    }

    /// Compaction started; `total_waste` is the reclaimable byte estimate.
    fn compaction_start(&self, _total_waste: u64) {}

    /// Compaction produced a new pure-value file.
    fn compaction_created_pure_value_file(&self, _file_id: FileId, _size: u64) {}

    /// A transaction outlived the diagnostic threshold without being
    /// committed or dropped.
    fn report_transaction_leak(&self, _description: &str, _age: Duration) {}

    /// A recoverable problem worth surfacing (truncated tail, skipped
    /// snapshot, lost history in lenient mode).
    fn log_warning(&self, _message: &str) {}
}

/// Logger that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl DbLogger for NullLogger {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_logger_accepts_all_events() {
        let logger = NullLogger;
        logger.transaction_log_created(1);
        logger.file_marked_for_delete(2);
        logger.key_value_index_created(3, 10, 1024, Duration::from_millis(5));
        logger.compaction_start(4096);
        logger.compaction_created_pure_value_file(4, 2048);
        logger.report_transaction_leak("test", Duration::from_secs(60));
        logger.log_warning("warning");
    }
}
