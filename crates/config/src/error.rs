//! Config Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("config file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Only YAML, TOML and JSON files are understood.
    #[display("unsupported config format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// The merged sources could not be deserialized.
    #[display("invalid configuration")]
    Invalid,
    #[display("duplicate provider name: {_0}")]
    DuplicateProvider(#[error(not(source))] String),
    #[display("missing required value: {_0}")]
    MissingValue(#[error(not(source))] &'static str),
    /// The configuration was not loaded from a file, so it cannot be reloaded.
    #[display("configuration has no file to reload from")]
    NoSource,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
