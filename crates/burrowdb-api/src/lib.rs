//! # BurrowDB
//!
//! An embedded, transactional, ordered key-value storage engine.
//!
//! ## Quick Start
//!
//! ```rust
//! use burrowdb::{KeyValueDB, KeyValueDBOptions};
//!
//! fn main() -> Result<(), burrowdb::Error> {
//!     let db = KeyValueDB::open(KeyValueDBOptions::in_memory())?;
//!
//!     // Write in a transaction
//!     let mut tx = db.start_transaction()?;
//!     tx.create_or_update_key_value(b"user:1:name", b"Alice")?;
//!     tx.create_or_update_key_value(b"user:1:email", b"alice@example.com")?;
//!     tx.commit()?;
//!
//!     // Read from a snapshot
//!     let mut read = db.start_read_only_transaction()?;
//!     assert_eq!(read.find(b"user:1:name"), burrowdb::FindResult::Exact);
//!     assert_eq!(read.get_value()?, b"Alice");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Durable databases
//!
//! ```rust,no_run
//! use burrowdb::{KeyValueDB, KeyValueDBOptions, OnDiskFileCollection};
//! use std::sync::Arc;
//!
//! let options = KeyValueDBOptions::default()
//!     .with_file_collection(Arc::new(OnDiskFileCollection::open("./data")?));
//! let db = KeyValueDB::open(options)?;
//! # Ok::<(), burrowdb::Error>(())
//! ```
//!
//! ## Model
//!
//! - **Single writer, many readers.** Exactly one transaction may mutate
//!   at a time; a second writer either fails fast with the retryable
//!   [`Error::WriteConflict`] or queues FIFO via
//!   [`KeyValueDB::start_writing_transaction`]. Readers run on immutable
//!   snapshots and never block anyone.
//! - **Copy-on-write index.** Every commit publishes a new tree root;
//!   snapshots held by readers stay valid for as long as they are held.
//! - **Write-ahead log.** Every mutation is logged before it is visible;
//!   reopen replays the log (from the newest key-value-index snapshot)
//!   up to the last well-formed commit.
//! - **Compaction.** [`KeyValueDB::compact`] reclaims superseded file
//!   content, bounded by the configured write-rate and RAM limits, and
//!   never deletes a file a live transaction or the retention window can
//!   still reach.

pub mod logging;
pub mod options;

mod compactor;
mod db;
mod open;
mod transaction;

// Re-export core types
pub use burrowdb_core::{
    CompressionStrategy, DbLogger, Error, FileId, FindResult, NoCompression, NullLogger, Result,
    ValueRef,
};

// File collection implementations
pub use burrowdb_storage::CancellationToken;
pub use burrowdb_wal::{
    CollectionFile, FileCollection, InMemoryFileCollection, OnDiskFileCollection,
};

pub use db::{KeyValueDB, TransactionInfo};
pub use logging::{LogConfig, TracingLogger};
pub use options::{CompactorScheduler, ImmediateScheduler, KeyValueDBOptions};
pub use transaction::{Transaction, WritingTransactionWait};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
