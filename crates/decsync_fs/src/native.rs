//! Value handle addressing one node of a file store.

use crate::backend::{FileStore, NodeKind};
use crate::error::{FsError, FsResult};
use std::fmt;
use std::sync::Arc;

/// A handle to one location in a [`FileStore`].
///
/// Handles are cheap to clone and address a location without performing
/// I/O; the store is only consulted by the operations that need it. The
/// same location may be addressed by many handles at once.
#[derive(Clone)]
pub struct NativeFile {
    store: Arc<dyn FileStore>,
    path: Vec<String>,
}

impl NativeFile {
    /// Creates a handle to the root of a store.
    #[must_use]
    pub fn root(store: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            path: Vec::new(),
        }
    }

    /// Returns a handle to the child `name`. Pure addressing, no I/O.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Self {
            store: Arc::clone(&self.store),
            path,
        }
    }

    /// Returns the path segments of this handle, relative to the store root.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Returns the final path segment, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// Returns the store this handle addresses into.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    /// Returns the current state of the addressed location.
    pub fn kind(&self) -> FsResult<NodeKind> {
        self.store.kind(&self.path)
    }

    /// Returns the file length, or 0 when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the location is a directory.
    pub fn length(&self) -> FsResult<u64> {
        match self.kind()? {
            NodeKind::File => self.store.length(&self.path),
            NodeKind::Absent => Ok(0),
            NodeKind::Directory => Err(FsError::is_a_directory(&self.path)),
        }
    }

    /// Reads all bytes from `offset` to the end of the file.
    ///
    /// An absent location yields empty bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the location is a directory.
    pub fn read(&self, offset: u64) -> FsResult<Vec<u8>> {
        match self.kind()? {
            NodeKind::File => self.store.read(&self.path, offset),
            NodeKind::Absent => Ok(Vec::new()),
            NodeKind::Directory => Err(FsError::is_a_directory(&self.path)),
        }
    }

    /// Writes `data`, materializing parent directories as needed.
    ///
    /// Writing empty `data` without `append` deletes the file instead:
    /// the engine treats absence and emptiness as the same state, and an
    /// empty file must never exist at rest.
    pub fn write(&self, data: &[u8], append: bool) -> FsResult<()> {
        if data.is_empty() && !append {
            return self.store.delete(&self.path);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.store.write(&self.path, data, append)
    }

    /// Enumerates child names; empty unless the location is a directory.
    pub fn children(&self) -> FsResult<Vec<String>> {
        self.store.children(&self.path)
    }

    /// Deletes this node and everything below it, post-order.
    pub fn delete_recursive(&self) -> FsResult<()> {
        match self.kind()? {
            NodeKind::Absent => Ok(()),
            NodeKind::File => self.store.delete(&self.path),
            NodeKind::Directory => {
                for name in self.children()? {
                    self.child(&name).delete_recursive()?;
                }
                self.store.delete(&self.path)
            }
        }
    }

    /// Invalidates cached directory listings of the underlying store.
    pub fn reset_cache(&self) {
        self.store.reset_cache();
    }
}

impl fmt::Debug for NativeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFile")
            .field("path", &self.path.join("/"))
            .finish()
    }
}
