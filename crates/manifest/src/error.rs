//! Manifest Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Every error raised by this crate is a validation error:
//! the upstream content is unusable and retrying will not change that.

use derive_more::{Display, Error};

/// A manifest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The manifest bytes are not valid JSON.
    #[display("manifest is not valid JSON")]
    InvalidJson,
    /// The manifest parsed, but the top-level value is not an object.
    #[display("manifest is not a JSON object")]
    NotAnObject,
    /// A required field could not be found in the manifest.
    #[display("missing required field: {_0}")]
    MissingField(#[error(not(source))] &'static str),
    /// A field was found but holds an unusable value.
    #[display("invalid value for field '{field}', found value: {value}")]
    InvalidField {
        /// The field that failed validation.
        field: &'static str,
        /// The offending value, rendered as JSON.
        value: String,
    },
    /// The manifest could not be serialized back into bytes.
    #[display("manifest could not be serialized")]
    Serialize,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Manifests are either valid or they're not.
        false
    }
}
