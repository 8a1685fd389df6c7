//! Error taxonomy for archive operations.
//!
//! Remote-transport failures keep their original `std::io::Error` and are
//! propagated to the caller verbatim via [`ZipError::Io`]; everything the
//! core itself detects maps onto one of the structured variants below.

use thiserror::Error;

/// Errors produced by archive sessions and the ZIP parsing layers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ZipError {
    /// Operation issued in a state where it is meaningless (archive not
    /// open, no member selected, member already selected).
    #[error("invalid operation: {0}")]
    InvalidOp(&'static str),

    /// Member does not exist in the archive directory.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Compression method outside stored (0) and deflate (8).
    #[error("unsupported compression method: {0}")]
    NotSupported(u16),

    /// An on-disk structure failed a signature or length check.
    #[error("data error: {0}")]
    DataError(String),

    /// Failure reported by the remote file client, passed through unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ZipError {
    pub(crate) fn data(msg: impl Into<String>) -> Self {
        ZipError::DataError(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T, E = ZipError> = std::result::Result<T, E>;
