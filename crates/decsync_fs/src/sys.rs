//! Real-filesystem file store.

use crate::backend::{FileStore, NodeKind};
use crate::error::{FsError, FsResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file store backed by the operating system, rooted at a directory.
///
/// Directory listings are cached: scanning a large peer tree touches the
/// same directories many times, and the external synchronizer only makes
/// listings stale between engine passes, never within one. Any mutation
/// through this store and any call to `reset_cache` drops the cache.
///
/// # Durability
///
/// Writes go through the OS page cache; the engine's correctness relies on
/// read-your-writes within one device, not on fsync. A torn write is
/// recovered on the next pass because cursors only advance after a fully
/// processed file.
#[derive(Debug)]
pub struct SysFileStore {
    root: PathBuf,
    listings: RwLock<HashMap<Vec<String>, Vec<String>>>,
}

impl SysFileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or accessed.
    /// A permission failure surfaces as `FsError::Io` with
    /// `ErrorKind::PermissionDenied`, which the engine maps to its
    /// insufficient-access error.
    pub fn open(root: &Path) -> FsResult<Self> {
        fs::create_dir_all(root)?;
        // Probe readability up front so a misconfigured mount fails at
        // construction instead of midway through a scan.
        fs::read_dir(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            listings: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &[String]) -> FsResult<PathBuf> {
        let mut out = self.root.clone();
        for segment in path {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains(['/', '\\'])
            {
                return Err(FsError::InvalidSegment {
                    segment: segment.clone(),
                });
            }
            out.push(segment);
        }
        Ok(out)
    }

    fn invalidate(&self) {
        self.listings.write().clear();
    }
}

impl FileStore for SysFileStore {
    fn kind(&self, path: &[String]) -> FsResult<NodeKind> {
        let full = self.resolve(path)?;
        match fs::metadata(&full) {
            Ok(meta) if meta.is_dir() => Ok(NodeKind::Directory),
            Ok(_) => Ok(NodeKind::File),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(NodeKind::Absent),
            Err(err) => Err(err.into()),
        }
    }

    fn length(&self, path: &[String]) -> FsResult<u64> {
        let full = self.resolve(path)?;
        match fs::metadata(&full) {
            Ok(meta) if meta.is_dir() => Err(FsError::is_a_directory(path)),
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self, path: &[String], offset: u64) -> FsResult<Vec<u8>> {
        let full = self.resolve(path)?;
        let mut file = match fs::File::open(&full) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if file.metadata()?.is_dir() {
            return Err(FsError::is_a_directory(path));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn write(&self, path: &[String], data: &[u8], append: bool) -> FsResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&full)?;
        file.write_all(data)?;
        self.invalidate();
        Ok(())
    }

    fn delete(&self, path: &[String]) -> FsResult<()> {
        let full = self.resolve(path)?;
        let result = match fs::metadata(&full) {
            Ok(meta) if meta.is_dir() => fs::remove_dir(&full),
            Ok(_) => fs::remove_file(&full),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        match result {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn children(&self, path: &[String]) -> FsResult<Vec<String>> {
        if let Some(cached) = self.listings.read().get(path) {
            return Ok(cached.clone());
        }
        let full = self.resolve(path)?;
        let entries = match fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(err)
                if err.kind() == std::io::ErrorKind::NotFound
                    || err.kind() == std::io::ErrorKind::NotADirectory =>
            {
                return Ok(Vec::new())
            }
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
            // Non-UTF-8 names cannot have been produced by the name codec;
            // they belong to some other program and are ignored.
        }
        self.listings.write().insert(path.to_vec(), names.clone());
        Ok(names)
    }

    fn reset_cache(&self) {
        self.invalidate();
    }
}
