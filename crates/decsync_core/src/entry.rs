//! The entry model: datetimes, keys, values and the supersede rule.

use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::warn;

/// An immutable `(datetime, key, value)` triple.
///
/// The datetime is an ISO-8601 local string (`YYYY-MM-DDThh:mm:ss`) whose
/// lexicographic order is the causality token: when the same key is
/// updated independently, the entry with the greater datetime wins
/// everywhere. Key and value are arbitrary JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// ISO-8601 local datetime, the causality token.
    pub datetime: String,
    /// The key within its map, any JSON value.
    pub key: Value,
    /// The associated value, any JSON value.
    pub value: Value,
}

impl Entry {
    /// Creates an entry with an explicit datetime.
    #[must_use]
    pub fn new(datetime: impl Into<String>, key: Value, value: Value) -> Self {
        Self {
            datetime: datetime.into(),
            key,
            value,
        }
    }

    /// Creates an entry stamped with the current local datetime.
    #[must_use]
    pub fn now(key: Value, value: Value) -> Self {
        Self::new(current_datetime(), key, value)
    }

    /// Renders the on-disk line form `[datetime, key, value]`.
    #[must_use]
    pub fn to_line(&self) -> String {
        Value::Array(vec![
            Value::String(self.datetime.clone()),
            self.key.clone(),
            self.value.clone(),
        ])
        .to_string()
    }

    /// Parses one log line. Returns `None` for anything malformed;
    /// callers skip such lines and keep going.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        let Value::Array(items) = value else {
            return None;
        };
        let [datetime, key, value] = <[Value; 3]>::try_from(items).ok()?;
        let Value::String(datetime) = datetime else {
            return None;
        };
        Some(Self {
            datetime,
            key,
            value,
        })
    }

    /// Whether this entry replaces `old` under last-writer-wins.
    ///
    /// Greater datetime wins; an exact datetime tie is broken by
    /// lexicographic comparison of the serialized values, so every peer
    /// resolves the same conflict the same way.
    #[must_use]
    pub fn supersedes(&self, old: &Entry) -> bool {
        match self.datetime.cmp(&old.datetime) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.value.to_string() > old.value.to_string(),
        }
    }
}

/// An [`Entry`] together with the path of the map it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryWithPath {
    /// Ordered path segments, arbitrary strings.
    pub path: Vec<String>,
    /// The entry itself.
    pub entry: Entry,
}

impl EntryWithPath {
    /// Creates an entry with its path.
    #[must_use]
    pub fn new(path: Vec<String>, entry: Entry) -> Self {
        Self { path, entry }
    }

    /// Renders the on-disk line form `[[path…], datetime, key, value]`.
    #[must_use]
    pub fn to_line(&self) -> String {
        Value::Array(vec![
            Value::Array(
                self.path
                    .iter()
                    .map(|s| Value::String(s.clone()))
                    .collect(),
            ),
            Value::String(self.entry.datetime.clone()),
            self.entry.key.clone(),
            self.entry.value.clone(),
        ])
        .to_string()
    }

    /// Parses one log line; `None` for anything malformed.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        let Value::Array(items) = value else {
            return None;
        };
        let [path, datetime, key, value] = <[Value; 4]>::try_from(items).ok()?;
        let Value::Array(segments) = path else {
            return None;
        };
        let path = segments
            .into_iter()
            .map(|s| match s {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        let Value::String(datetime) = datetime else {
            return None;
        };
        Some(Self {
            path,
            entry: Entry {
                datetime,
                key,
                value,
            },
        })
    }
}

/// The identity of a stored entry: its path and key, value unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Ordered path segments.
    pub path: Vec<String>,
    /// The key within the map at `path`.
    pub key: Value,
}

impl StoredEntry {
    /// Creates a stored-entry identity.
    #[must_use]
    pub fn new(path: Vec<String>, key: Value) -> Self {
        Self { path, key }
    }
}

/// Summary of one peer application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppData {
    /// The peer's appId.
    pub app_id: String,
    /// Last day the peer was seen active (`YYYY-MM-DD`), if published.
    pub last_active: Option<String>,
    /// The layout version the peer writes.
    pub version: i64,
}

/// A JSON value usable as a hash-map key.
///
/// Hashes by the serialized form, which is deterministic because
/// `serde_json` keeps object members sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonKey(pub Value);

impl Hash for JsonKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_string().hash(state);
    }
}

impl fmt::Display for JsonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery callback shared by the engines: a path plus the deduplicated
/// entries that changed under it. Returns whether the batch was handled,
/// which gates cursor movement.
pub(crate) type EntrySink<'a> = dyn FnMut(&[String], Vec<Entry>) -> bool + 'a;

/// Collapses a batch to one entry per key, keeping the superseding one.
/// First-appearance order of the surviving keys is preserved.
pub(crate) fn dedup_by_key(entries: Vec<Entry>) -> Vec<Entry> {
    let mut out: Vec<Entry> = Vec::new();
    for incoming in entries {
        match out.iter_mut().find(|entry| entry.key == incoming.key) {
            Some(existing) => {
                if incoming.supersedes(existing) {
                    *existing = incoming;
                }
            }
            None => out.push(incoming),
        }
    }
    out
}

/// Parses log lines into entries, warning about and skipping malformed
/// ones.
pub(crate) fn parse_entry_lines(lines: &[String], origin: &str) -> Vec<Entry> {
    lines
        .iter()
        .filter_map(|line| {
            let parsed = Entry::from_line(line);
            if parsed.is_none() {
                warn!(origin, line, "skipping malformed entry line");
            }
            parsed
        })
        .collect()
}

/// Returns the current local datetime as `YYYY-MM-DDThh:mm:ss`.
#[must_use]
pub fn current_datetime() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Returns the current local date as `YYYY-MM-DD`.
#[must_use]
pub fn current_date() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
