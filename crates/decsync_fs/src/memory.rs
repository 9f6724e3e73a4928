//! In-memory file store for testing.

use crate::backend::{FileStore, NodeKind};
use crate::error::{FsError, FsResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};

/// An in-memory file store.
///
/// Files live in a sorted map from segmented paths to bytes; directories
/// exist implicitly as prefixes of stored files. Suitable for unit tests,
/// integration tests, and ephemeral instances. Two DecSync instances
/// sharing one `Arc<MemFileStore>` behave like two applications on an
/// already-synchronized directory.
///
/// The store records every byte-level `read` so tests can assert that the
/// sequence-skip optimization really avoids reopening unchanged files.
///
/// # Example
///
/// ```rust
/// use decsync_fs::{FileStore, MemFileStore};
///
/// let store = MemFileStore::new();
/// let path = vec!["dir".to_string(), "file".to_string()];
/// store.write(&path, b"hello", false).unwrap();
/// assert_eq!(store.read(&path, 0).unwrap(), b"hello");
/// assert_eq!(store.read_count(&path), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemFileStore {
    files: RwLock<BTreeMap<Vec<String>, Vec<u8>>>,
    reads: Mutex<Vec<Vec<String>>>,
}

impl MemFileStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many times the file at `path` has been read.
    #[must_use]
    pub fn read_count(&self, path: &[String]) -> usize {
        self.reads.lock().iter().filter(|p| p.as_slice() == path).count()
    }

    /// Forgets all recorded reads.
    pub fn clear_reads(&self) {
        self.reads.lock().clear();
    }

    /// Returns the paths of all stored files, sorted.
    #[must_use]
    pub fn file_paths(&self) -> Vec<Vec<String>> {
        self.files.read().keys().cloned().collect()
    }
}

impl FileStore for MemFileStore {
    fn kind(&self, path: &[String]) -> FsResult<NodeKind> {
        if path.is_empty() {
            return Ok(NodeKind::Directory);
        }
        let files = self.files.read();
        if files.contains_key(path) {
            return Ok(NodeKind::File);
        }
        let is_dir = files
            .keys()
            .any(|k| k.len() > path.len() && k.starts_with(path));
        if is_dir {
            Ok(NodeKind::Directory)
        } else {
            Ok(NodeKind::Absent)
        }
    }

    fn length(&self, path: &[String]) -> FsResult<u64> {
        match self.kind(path)? {
            NodeKind::Directory => Err(FsError::is_a_directory(path)),
            NodeKind::Absent => Ok(0),
            NodeKind::File => Ok(self.files.read()[path].len() as u64),
        }
    }

    fn read(&self, path: &[String], offset: u64) -> FsResult<Vec<u8>> {
        match self.kind(path)? {
            NodeKind::Directory => Err(FsError::is_a_directory(path)),
            NodeKind::Absent => Ok(Vec::new()),
            NodeKind::File => {
                self.reads.lock().push(path.to_vec());
                let files = self.files.read();
                let data = &files[path];
                let start = (offset as usize).min(data.len());
                Ok(data[start..].to_vec())
            }
        }
    }

    fn write(&self, path: &[String], data: &[u8], append: bool) -> FsResult<()> {
        if self.kind(path)? == NodeKind::Directory {
            return Err(FsError::is_a_directory(path));
        }
        let mut files = self.files.write();
        let entry = files.entry(path.to_vec()).or_default();
        if append {
            entry.extend_from_slice(data);
        } else {
            *entry = data.to_vec();
        }
        Ok(())
    }

    fn delete(&self, path: &[String]) -> FsResult<()> {
        // Implicit directories vanish with their last file.
        self.files.write().remove(path);
        Ok(())
    }

    fn children(&self, path: &[String]) -> FsResult<Vec<String>> {
        let files = self.files.read();
        let names: BTreeSet<String> = files
            .keys()
            .filter(|k| k.len() > path.len() && k.starts_with(path))
            .map(|k| k[path.len()].clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    fn reset_cache(&self) {
        // Nothing cached; listings always reflect the current tree.
    }
}
