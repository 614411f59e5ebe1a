//! Sync Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fetching the content of a single ref failed; that ref is skipped.
    #[display("upstream fetch failed")]
    Upstream,
    /// Enumerating refs failed; the rest of the provider's resync is abandoned.
    #[display("upstream listing failed")]
    Listing,
    /// The version index rejected a write; the operation was rolled back.
    #[display("storage error")]
    Storage,
    #[display("unknown provider: {_0}")]
    UnknownProvider(#[error(not(source))] String),
    /// The provider type has no implementation for the requested capability.
    #[display("unsupported provider: {_0}")]
    UnsupportedProvider(#[error(not(source))] String),
    #[display("missing webhook header: {_0}")]
    MissingHeader(#[error(not(source))] &'static str),
    /// The webhook signature or shared secret did not match.
    #[display("invalid webhook signature")]
    InvalidSignature,
    #[display("malformed webhook payload")]
    MalformedPayload,
    /// An upload or delete request did not carry the provider's secret.
    #[display("unauthorized request")]
    Unauthorized,
    /// The uploaded bytes are not a readable zip archive.
    #[display("invalid package archive")]
    InvalidArchive,
    /// The uploaded archive cannot be published as a package version.
    #[display("invalid package upload: {_0}")]
    InvalidUpload(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream | Self::Listing | Self::Storage)
    }
}
