//! # BurrowDB WAL (Write-Ahead Log)
//!
//! Transaction log and file-collection layer for BurrowDB: every mutation
//! is appended here before it is reflected in the index, making commits
//! durable and crash-recoverable.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of BurrowDB.**
//!
//! Users should depend on the main [`burrowdb`](https://crates.io/crates/burrowdb)
//! crate instead, which provides the stable public API. This crate's API may
//! change without notice between minor versions.

pub mod filecollection;
pub mod fileformat;
pub mod record;
pub mod replay;
pub mod writer;

pub use filecollection::{
    CollectionFile, FileCollection, InMemoryFileCollection, OnDiskFileCollection,
};
pub use fileformat::{read_header, write_header, FileHeader, FileKind};
pub use record::{LogOp, RecordType};
pub use replay::{ChainFile, CommittedTransaction, LogReplayer, ReplayOutcome};
pub use writer::LogWriter;
