//! File-store trait definition.

use crate::error::FsResult;

/// The state of a path within a store.
///
/// Exactly one variant applies to any path at any moment. The engine
/// pattern-matches on this instead of probing with separate `is_file` /
/// `is_dir` calls, which would race against the external synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A regular file with readable bytes.
    File,
    /// A directory with enumerable children.
    Directory,
    /// Nothing exists at this path.
    Absent,
}

/// A low-level file store for DecSync.
///
/// Stores are **name-agnostic byte trees**: paths are slices of name
/// segments relative to the store root, already encoded for filesystem
/// safety. Stores perform no name encoding and no format interpretation.
///
/// # Invariants
///
/// - `read` returns all bytes from `offset` to the end of the file
/// - `write` materializes missing parent directories
/// - Segments never contain path separators; the caller guarantees this
///   by constructing them through the name codec
/// - Implementations must be `Send + Sync`; handles are shared through
///   `Arc`
///
/// # Implementors
///
/// - [`super::MemFileStore`] - for testing
/// - [`super::SysFileStore`] - for persistent storage
pub trait FileStore: Send + Sync {
    /// Returns the state of `path`.
    fn kind(&self, path: &[String]) -> FsResult<NodeKind>;

    /// Returns the length in bytes of the file at `path`.
    ///
    /// Returns 0 for an absent path.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is a directory or an I/O error occurs.
    fn length(&self, path: &[String]) -> FsResult<u64>;

    /// Reads all bytes from `offset` to the end of the file at `path`.
    ///
    /// Returns empty bytes for an absent path or an offset at or past the
    /// end of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is a directory or an I/O error occurs.
    fn read(&self, path: &[String], offset: u64) -> FsResult<Vec<u8>>;

    /// Writes `data` to the file at `path`, creating parent directories.
    ///
    /// With `append` set, `data` is appended to the existing content;
    /// otherwise the file is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is a directory or an I/O error occurs.
    fn write(&self, path: &[String], data: &[u8], append: bool) -> FsResult<()>;

    /// Deletes the node at `path`.
    ///
    /// Deleting an absent path is not an error. A directory must be empty.
    fn delete(&self, path: &[String]) -> FsResult<()>;

    /// Enumerates the child names of the directory at `path`.
    ///
    /// Returns an empty list unless `path` is a directory. The order is
    /// unspecified; each name appears at most once.
    fn children(&self, path: &[String]) -> FsResult<Vec<String>>;

    /// Invalidates any cached directory listings.
    ///
    /// The external synchronizer introduces and removes files at arbitrary
    /// moments; every entry point that enumerates peers calls this before
    /// scanning.
    fn reset_cache(&self);
}
