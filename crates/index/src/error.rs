//! Index Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// An index error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The storage engine failed; the whole operation was rolled back.
    #[display("storage error")]
    Storage,
    /// The record cannot be stored as given.
    #[display("invalid record: {_0}")]
    InvalidRecord(#[error(not(source))] &'static str),
    /// A stored entry could not be decoded.
    #[display("corrupt index entry: {_0}")]
    CorruptEntry(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
