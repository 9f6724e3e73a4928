//! Error types for file-store operations.

use std::io;
use thiserror::Error;

/// Result type for file-store operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors that can occur during file-store operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A byte-level operation was attempted on a directory.
    #[error("is a directory: {path}")]
    IsADirectory {
        /// The offending path, joined with `/`.
        path: String,
    },

    /// A directory-level operation was attempted on a file.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The offending path, joined with `/`.
        path: String,
    },

    /// A path segment contained a separator or was empty.
    #[error("invalid path segment: {segment:?}")]
    InvalidSegment {
        /// The offending segment.
        segment: String,
    },
}

impl FsError {
    /// Creates an `IsADirectory` error for a segmented path.
    pub fn is_a_directory(path: &[String]) -> Self {
        Self::IsADirectory {
            path: path.join("/"),
        }
    }

    /// Creates a `NotADirectory` error for a segmented path.
    pub fn not_a_directory(path: &[String]) -> Self {
        Self::NotADirectory {
            path: path.join("/"),
        }
    }
}
