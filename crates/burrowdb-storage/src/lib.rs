//! # BurrowDB Storage
//!
//! Copy-on-write ordered index and pure-value store for BurrowDB.
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
//! This crate provides the storage structures under the transaction
//! manager:
//!
//! - **Index**: immutable, `Arc`-shared B-tree nodes; each mutation
//!   clones only the path to the touched leaf, so publishing a new root
//!   never invalidates readers of an old one
//! - **Value store**: append-only pure-value files for payloads above the
//!   inline threshold, referenced by position from index leaves
//! - **Compaction support**: per-file live-byte accounting, cooperative
//!   cancellation and write-rate limiting

pub mod compaction;
pub mod index;
pub mod valuestore;

pub use compaction::{
    live_bytes_per_value_file, CancellationToken, CompactionStats, RateLimiter,
};
pub use index::{compare_to_prefix, BTree, BRANCHING};
pub use valuestore::ValueStore;
