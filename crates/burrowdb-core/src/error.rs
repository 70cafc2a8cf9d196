//! Error types for BurrowDB.

use std::fmt;

/// The main error type for BurrowDB operations.
#[derive(Debug)]
pub enum Error {
    /// A lock was poisoned (internal error)
    LockPoisoned,

    /// I/O error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serialization(String),

    /// Storage engine error
    Storage(String),

    /// Transaction error
    Transaction(String),

    /// Another transaction currently holds the writer token.
    ///
    /// Retryable: dispose the transaction and run it again once the
    /// current writer commits or is dropped.
    WriteConflict,

    /// Mutation attempted on a read-only transaction
    ReadOnly,

    /// A file is structurally invalid or shorter than the log chain expects
    Corrupt(String),

    /// Invalid operation
    InvalidOperation(String),

    /// Not found
    NotFound,
}

impl Error {
    /// Whether the caller is expected to retry the whole transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WriteConflict)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LockPoisoned => write!(f, "Lock poisoned"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Transaction(msg) => write!(f, "Transaction error: {}", msg),
            Error::WriteConflict => write!(f, "Write conflict: another writer is active"),
            Error::ReadOnly => write!(f, "Transaction is read-only"),
            Error::Corrupt(msg) => write!(f, "Corruption detected: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            Error::NotFound => write!(f, "Not found"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for BurrowDB operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_conflict_is_retryable() {
        assert!(Error::WriteConflict.is_retryable());
        assert!(!Error::ReadOnly.is_retryable());
        assert!(!Error::NotFound.is_retryable());
    }

    #[test]
    fn test_display() {
        let e = Error::Corrupt("bad header".to_string());
        assert!(e.to_string().contains("bad header"));
    }
}
