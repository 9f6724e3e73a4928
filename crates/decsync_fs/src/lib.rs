//! # DecSync FS
//!
//! File abstraction for the DecSync engine.
//!
//! A DecSync directory is shared between applications through an external
//! file synchronizer, so the engine never talks to `std::fs` directly.
//! Instead it addresses files through [`NativeFile`] handles backed by a
//! [`FileStore`]:
//!
//! - [`SysFileStore`] - the real filesystem, rooted at a directory
//! - [`MemFileStore`] - an in-memory tree for tests and ephemeral use
//!
//! ## Design Principles
//!
//! - A path resolves to exactly one of three states ([`NodeKind`]):
//!   a file, a directory, or nothing at all
//! - Writing an empty byte array without append deletes the file, so an
//!   empty file never exists at rest
//! - Directory listings may be cached; `reset_cache` invalidates them so
//!   files introduced by the external synchronizer become visible
//!
//! ## Example
//!
//! ```rust
//! use decsync_fs::{MemFileStore, NativeFile};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemFileStore::new());
//! let file = NativeFile::root(store).child("dir").child("name");
//! file.write(b"content", false).unwrap();
//! assert_eq!(file.read(0).unwrap(), b"content");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod native;
mod sys;

pub use backend::{FileStore, NodeKind};
pub use error::{FsError, FsResult};
pub use memory::MemFileStore;
pub use native::NativeFile;
pub use sys::SysFileStore;
