//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The backing engine rejected or failed a statement.
    #[display("database error")]
    Database,
    /// Embedded migrations could not be applied.
    #[display("database migration error")]
    Migration,
    /// The database location cannot be used.
    #[display("invalid database path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// The transaction was already committed.
    #[display("transaction already closed")]
    TransactionClosed,
    /// The engine is refusing writes.
    #[display("storage unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Unavailable(_))
    }
}
