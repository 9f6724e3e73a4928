//! The `.decsync-info` version gate and per-instance local state.

use crate::error::{DecsyncError, DecsyncResult};
use crate::file::DecsyncFile;
use serde_json::{json, Map, Value};
use tracing::warn;

/// The highest on-disk layout version this implementation speaks.
pub const SUPPORTED_VERSION: i64 = 2;

/// Name of the version gate at the root of a DecSync directory, stored as
/// the hidden file `.decsync-info`.
const INFO_NAME: &str = "decsync-info";

/// Parsed content of `.decsync-info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecsyncInfo {
    /// The layout version every application in this directory writes.
    pub version: i64,
}

/// Reads `.decsync-info` at `root`, creating `{"version":1}` if absent.
///
/// # Errors
///
/// - [`DecsyncError::InvalidInfo`] when the file is not a JSON object
///   with an integer `version`
/// - [`DecsyncError::UnsupportedVersion`] when the version lies outside
///   the supported range
pub fn read_or_create_info(root: &DecsyncFile) -> DecsyncResult<DecsyncInfo> {
    let file = root.hidden_child(INFO_NAME);
    let data = file.native().read(0)?;
    if data.is_empty() {
        let info = DecsyncInfo { version: 1 };
        file.write_text(&json!({ "version": info.version }).to_string())?;
        return Ok(info);
    }
    let value: Value = serde_json::from_slice(&data)
        .map_err(|err| DecsyncError::invalid_info(format!("not valid JSON: {err}")))?;
    let Some(object) = value.as_object() else {
        return Err(DecsyncError::invalid_info("not a JSON object"));
    };
    let Some(version) = object.get("version").and_then(Value::as_i64) else {
        return Err(DecsyncError::invalid_info("missing integer \"version\""));
    };
    if !(1..=SUPPORTED_VERSION).contains(&version) {
        return Err(DecsyncError::UnsupportedVersion {
            found: version,
            supported: SUPPORTED_VERSION,
        });
    }
    Ok(DecsyncInfo { version })
}

/// Returns the working subdirectory `decsyncDir/syncType[/collection]`.
#[must_use]
pub fn sync_subdir(root: &DecsyncFile, sync_type: &str, collection: Option<&str>) -> DecsyncFile {
    let dir = root.child(sync_type);
    match collection {
        Some(collection) => dir.child(collection),
        None => dir,
    }
}

/// Per-instance state in the caller's local directory, persisted as the
/// JSON file `info`.
///
/// Nothing here is shared with peers; it only remembers what this
/// instance has already done (selected version, published heartbeats).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalInfo {
    /// The layout version this instance committed to.
    pub version: Option<i64>,
    /// Day of the most recently published `last-active` heartbeat.
    pub last_active: Option<String>,
    /// The `supported-version` value most recently published.
    pub supported_version: Option<i64>,
}

impl LocalInfo {
    /// Reads the local info file; unreadable content counts as empty.
    #[must_use]
    pub fn read(local_dir: &DecsyncFile) -> Self {
        let file = local_dir.child("info");
        let data = match file.native().read(0) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "unreadable local info, starting fresh");
                return Self::default();
            }
        };
        if data.is_empty() {
            return Self::default();
        }
        let value: Value = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "corrupt local info, starting fresh");
                return Self::default();
            }
        };
        Self {
            version: value.get("version").and_then(Value::as_i64),
            last_active: value
                .get("last-active")
                .and_then(Value::as_str)
                .map(str::to_string),
            supported_version: value.get("supported-version").and_then(Value::as_i64),
        }
    }

    /// Persists the local info file.
    pub fn write(&self, local_dir: &DecsyncFile) -> DecsyncResult<()> {
        let mut object = Map::new();
        if let Some(version) = self.version {
            object.insert("version".to_string(), json!(version));
        }
        if let Some(last_active) = &self.last_active {
            object.insert("last-active".to_string(), json!(last_active));
        }
        if let Some(supported) = self.supported_version {
            object.insert("supported-version".to_string(), json!(supported));
        }
        local_dir
            .child("info")
            .write_text(&Value::Object(object).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decsync_fs::{MemFileStore, NativeFile};
    use std::sync::Arc;

    fn root() -> DecsyncFile {
        DecsyncFile::new(NativeFile::root(Arc::new(MemFileStore::new())))
    }

    #[test]
    fn absent_info_creates_version_one() {
        let root = root();
        let info = read_or_create_info(&root).unwrap();
        assert_eq!(info.version, 1);

        let written = root.hidden_child(INFO_NAME).read_text().unwrap();
        assert_eq!(written.as_deref(), Some(r#"{"version":1}"#));
    }

    #[test]
    fn existing_version_is_read() {
        let root = root();
        root.hidden_child(INFO_NAME)
            .write_text(r#"{"version":2}"#)
            .unwrap();
        assert_eq!(read_or_create_info(&root).unwrap().version, 2);
    }

    #[test]
    fn malformed_info_rejected() {
        let root = root();
        root.hidden_child(INFO_NAME).write_text("{oops").unwrap();
        assert!(matches!(
            read_or_create_info(&root),
            Err(DecsyncError::InvalidInfo { .. })
        ));

        root.hidden_child(INFO_NAME)
            .write_text(r#"{"version":"two"}"#)
            .unwrap();
        assert!(matches!(
            read_or_create_info(&root),
            Err(DecsyncError::InvalidInfo { .. })
        ));
    }

    #[test]
    fn unknown_version_rejected() {
        let root = root();
        root.hidden_child(INFO_NAME)
            .write_text(r#"{"version":3}"#)
            .unwrap();
        assert!(matches!(
            read_or_create_info(&root),
            Err(DecsyncError::UnsupportedVersion {
                found: 3,
                supported: SUPPORTED_VERSION,
            })
        ));
    }

    #[test]
    fn subdir_layout() {
        let root = root();
        let plain = sync_subdir(&root, "rss", None);
        assert_eq!(plain.native().path(), &["rss".to_string()]);

        let scoped = sync_subdir(&root, "calendars", Some("col/1"));
        assert_eq!(
            scoped.native().path(),
            &["calendars".to_string(), "col%2F1".to_string()]
        );
    }

    #[test]
    fn local_info_roundtrip() {
        let root = root();
        let local = root.child("local").child("app-1");

        assert_eq!(LocalInfo::read(&local), LocalInfo::default());

        let info = LocalInfo {
            version: Some(2),
            last_active: Some("2020-08-23".to_string()),
            supported_version: Some(2),
        };
        info.write(&local).unwrap();
        assert_eq!(LocalInfo::read(&local), info);
    }

    #[test]
    fn corrupt_local_info_counts_as_empty() {
        let root = root();
        let local = root.child("local").child("app-1");
        local.child("info").write_text("not json").unwrap();
        assert_eq!(LocalInfo::read(&local), LocalInfo::default());
    }
}
