//! Source Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Blob store failures are raised into
//! [`ErrorKind::Cache`], keeping the blob store's own error as a child in the
//! tree.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A source error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Key (or the local path behind it) does not exist
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Wrong kind of key for the operation, or a key value that escapes the
    /// source root
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
    /// Remote location is absent or unreachable
    #[display("backend unavailable: {_0}")]
    BackendUnavailable(#[error(not(source))] String),
    /// A request to the remote backend failed
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The blob cache failed to store, find or hash content
    #[display("blob cache error")]
    Cache,
    /// Serialized data had the wrong shape or version
    #[display("invalid data: {_0}")]
    InvalidData(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendUnavailable(_))
    }
}

/// An identification tool error.
pub type ToolError = exn::Exn<ToolErrorKind>;
/// Result type alias for identification tools.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Why a single tool produced nothing for a single file.
///
/// Never fatal to metadata collection; the tool's properties are omitted.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// Tool isn't installed or can't be started. Skipped, not a failure.
    #[display("tool unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// Tool ran but failed on this file.
    #[display("tool failed: {_0}")]
    Failed(#[error(not(source))] String),
}
