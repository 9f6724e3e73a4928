//! Error types for the DecSync engine.

use decsync_fs::FsError;
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type DecsyncResult<T> = Result<T, DecsyncError>;

/// Errors that can occur in DecSync operations.
///
/// Construction-time errors (`InvalidInfo`, `UnsupportedVersion`,
/// `InsufficientAccess`) surface to the caller and no instance is created.
/// Runtime per-record failures are recovered locally: the engine logs them
/// and leaves the read cursor in place so the next pass retries.
#[derive(Debug, Error)]
pub enum DecsyncError {
    /// `.decsync-info` exists but is not a JSON object with an integer
    /// `version`.
    #[error("invalid .decsync-info: {message}")]
    InvalidInfo {
        /// Description of what was wrong with the file.
        message: String,
    },

    /// `.decsync-info` declares a version this implementation does not
    /// speak.
    #[error("unsupported DecSync version {found}, highest supported is {supported}")]
    UnsupportedVersion {
        /// The version found on disk.
        found: i64,
        /// The highest version this implementation supports.
        supported: i64,
    },

    /// The platform denies read or write access on the DecSync directory.
    #[error("insufficient access to the DecSync directory")]
    InsufficientAccess,

    /// A file-store operation failed.
    #[error("file store error: {0}")]
    Fs(#[from] FsError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON document could not be produced or parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// On-disk data violated the format in a way that cannot be skipped.
    #[error("corrupt data: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },
}

impl DecsyncError {
    /// Creates an invalid-info error.
    pub fn invalid_info(message: impl Into<String>) -> Self {
        Self::InvalidInfo {
            message: message.into(),
        }
    }

    /// Creates a corrupt-data error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Maps a store-open failure, surfacing permission problems as
    /// [`DecsyncError::InsufficientAccess`].
    pub fn from_open(err: FsError) -> Self {
        match &err {
            FsError::Io(io_err) if io_err.kind() == io::ErrorKind::PermissionDenied => {
                Self::InsufficientAccess
            }
            _ => Self::Fs(err),
        }
    }
}
