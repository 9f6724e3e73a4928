//! # DecSync Core
//!
//! The DecSync synchronization engine.
//!
//! DecSync synchronizes key-value mappings between applications through a
//! shared directory, typically reconciled across devices by an external
//! file synchronizer such as Syncthing. Every application appends its
//! updates under its own appId; peers scan each other's logs with
//! persistent cursors and converge on the entry with the greatest
//! datetime per key. There is no server and no lock: the directory is the
//! protocol.
//!
//! This crate provides:
//! - The [`Decsync`] dispatcher: publish entries, observe peer updates
//!   through listeners, materialize state on a fresh install
//! - Both on-disk layouts (version 1's path-as-directory tree and
//!   version 2's hash buckets) and the upgrade between them
//! - The static discovery surface: [`check_decsync_info`],
//!   [`list_collections`], [`get_static_info`], [`get_active_apps`]
//! - A sorted-merge [`diff`](diff_sorted) helper for callers
//!   reconciling observed state with their own storage
//!
//! ## Example
//!
//! ```rust
//! use decsync_core::{Decsync, Extra};
//! use decsync_fs::MemFileStore;
//! use serde_json::json;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let dir = Arc::new(MemFileStore::new());
//!
//! // Application A publishes an update.
//! let a: Decsync<HashMap<String, String>> =
//!     Decsync::with_store(dir.clone(), "rss", None, "device1-app").unwrap();
//! a.set_entry(&["feeds".into()], json!("url"), json!("name")).unwrap();
//!
//! // Application B observes it.
//! let mut b: Decsync<HashMap<String, String>> =
//!     Decsync::with_store(dir, "rss", None, "device2-app").unwrap();
//! b.add_listener(vec!["feeds".into()], |_, entry, extra| {
//!     if let Extra::WithExtra(feeds) = extra {
//!         feeds.insert(entry.key.to_string(), entry.value.to_string());
//!     }
//!     true
//! });
//! let mut feeds = HashMap::new();
//! b.execute_all_new_entries(&mut feeds, true).unwrap();
//! assert_eq!(feeds.get("\"url\"").map(String::as_str), Some("\"name\""));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod dir;
mod entry;
mod error;
mod file;
mod info;
mod instance;
mod v1;
mod v2;

pub use diff::{diff_sorted, Diff};
pub use dir::get_default_dir;
pub use entry::{
    current_date, current_datetime, AppData, Entry, EntryWithPath, JsonKey, StoredEntry,
};
pub use error::{DecsyncError, DecsyncResult};
pub use file::DecsyncFile;
pub use info::SUPPORTED_VERSION;
pub use instance::{
    check_decsync_info, check_decsync_info_in, get_active_apps, get_active_apps_in,
    get_static_info, get_static_info_in, list_collections, list_collections_in, Decsync, Extra,
};
