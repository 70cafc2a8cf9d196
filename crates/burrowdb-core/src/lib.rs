//! # BurrowDB Core
//!
//! Core types and traits shared by every BurrowDB crate.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of BurrowDB.**
//!
//! Users should depend on the main [`burrowdb`](https://crates.io/crates/burrowdb)
//! crate instead, which provides the stable public API. This crate's API may
//! change without notice between minor versions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compression;
pub mod error;
pub mod format_version;
pub mod logger;
pub mod types;

pub use compression::{CompressionStrategy, NoCompression};
pub use error::{Error, Result};
pub use logger::{DbLogger, NullLogger};
pub use types::{FileId, FindResult, ValueRef, INLINE_VALUE_LIMIT};
