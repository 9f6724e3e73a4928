//! The version 2 engine: hash-bucketed layout.
//!
//! Every application keeps its entries in at most 257 files:
//!
//! ```text
//! v2/<appId>/sequences      JSON { bucket -> integer }
//! v2/<appId>/<bucket>       append log, EntryWithPath per line
//! ```
//!
//! A path hashes into one of 256 buckets; the path `["info"]` gets the
//! reserved `info` bucket so global info writes never compete with hashed
//! ones. Readers track the per-bucket sequence numbers of every peer in a
//! local file and re-read a bucket in full whenever its number moves,
//! which keeps the hot path at one small file per peer per pass.

use crate::entry::{Entry, EntrySink, EntryWithPath};
use crate::error::DecsyncResult;
use crate::file::DecsyncFile;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

const SEQUENCES: &str = "sequences";
const INFO_BUCKET: &str = "info";

/// Returns the bucket name for a path.
pub(crate) fn bucket_for_path(path: &[String]) -> String {
    if path.len() == 1 && path[0] == "info" {
        return INFO_BUCKET.to_string();
    }
    let mut combined: u32 = 0;
    for segment in path {
        let mut hash: u32 = 0;
        for byte in segment.bytes() {
            hash = (hash * 19 + u32::from(byte)) % 256;
        }
        combined = (combined * 199 + hash) % 256;
    }
    format!("{combined:02x}")
}

/// The V2 engine over one sync subdirectory.
#[derive(Debug)]
pub(crate) struct V2Engine {
    own_app_id: String,
    dir: DecsyncFile,
    local_dir: DecsyncFile,
}

impl V2Engine {
    pub fn new(subdir: &DecsyncFile, local_dir: &DecsyncFile, own_app_id: &str) -> Self {
        Self {
            own_app_id: own_app_id.to_string(),
            dir: subdir.child("v2"),
            local_dir: local_dir.clone(),
        }
    }

    fn app_dir(&self, app_id: &str) -> DecsyncFile {
        self.dir.child(app_id)
    }

    fn read_bucket(&self, app_id: &str, bucket: &str) -> DecsyncResult<Vec<EntryWithPath>> {
        let lines = self.app_dir(app_id).child(bucket).read_lines(0)?;
        Ok(lines
            .iter()
            .filter_map(|line| {
                let parsed = EntryWithPath::from_line(line);
                if parsed.is_none() {
                    warn!(app_id, bucket, line, "skipping malformed entry line");
                }
                parsed
            })
            .collect())
    }

    fn read_sequences(&self, app_id: &str) -> BTreeMap<String, i64> {
        let file = self.app_dir(app_id).child(SEQUENCES);
        match file.native().read(0) {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(map) => map,
                Err(err) => {
                    // Treated as empty, which forces a full re-read of
                    // every bucket on the next pass.
                    warn!(app_id, error = %err, "corrupt sequences file");
                    BTreeMap::new()
                }
            },
            Err(err) => {
                warn!(app_id, error = %err, "unreadable sequences file");
                BTreeMap::new()
            }
        }
    }

    fn bump_sequence(&self, bucket: &str) -> DecsyncResult<()> {
        let mut sequences = self.read_sequences(&self.own_app_id);
        *sequences.entry(bucket.to_string()).or_insert(0) += 1;
        let file = self.app_dir(&self.own_app_id).child(SEQUENCES);
        file.write_text(&serde_json::to_string(&sequences)?)
    }

    pub fn set_entries(&self, entries: Vec<EntryWithPath>) -> DecsyncResult<()> {
        let mut buckets: BTreeMap<String, Vec<EntryWithPath>> = BTreeMap::new();
        for entry in entries {
            buckets
                .entry(bucket_for_path(&entry.path))
                .or_default()
                .push(entry);
        }
        for (bucket, batch) in buckets {
            let survivors = self.merge_into_own_bucket(&bucket, batch, true)?;
            if !survivors.is_empty() {
                self.bump_sequence(&bucket)?;
            }
        }
        Ok(())
    }

    /// Merges a batch into the own log of one bucket.
    ///
    /// Entries already present with a superseding `(path, key)` row are
    /// dropped; superseded rows are removed and the survivors appended.
    /// Returns the survivors in batch order.
    fn merge_into_own_bucket(
        &self,
        bucket: &str,
        batch: Vec<EntryWithPath>,
        require_new_value: bool,
    ) -> DecsyncResult<Vec<EntryWithPath>> {
        let mut batch = dedup_by_path_key(batch);
        if batch.is_empty() {
            return Ok(batch);
        }
        let mut stored = self.read_bucket(&self.own_app_id, bucket)?;
        batch.retain(|incoming| {
            match stored
                .iter()
                .find(|s| s.path == incoming.path && s.entry.key == incoming.entry.key)
            {
                Some(old) => {
                    incoming.entry.supersedes(&old.entry)
                        && !(require_new_value && incoming.entry.value == old.entry.value)
                }
                None => true,
            }
        });
        if batch.is_empty() {
            return Ok(batch);
        }
        let file = self.app_dir(&self.own_app_id).child(bucket);
        let len_before = stored.len();
        stored.retain(|old| {
            !batch
                .iter()
                .any(|incoming| incoming.path == old.path && incoming.entry.key == old.entry.key)
        });
        if stored.len() != len_before {
            file.write_lines(stored.iter().map(EntryWithPath::to_line), false)?;
        }
        file.write_lines(batch.iter().map(EntryWithPath::to_line), true)?;
        Ok(batch)
    }

    pub fn execute_all_new_entries(&self, sink: &mut EntrySink<'_>) -> DecsyncResult<()> {
        self.dir.reset_cache();
        let local_file = self.local_dir.child(SEQUENCES);
        let mut local: BTreeMap<String, BTreeMap<String, i64>> =
            match local_file.native().read(0) {
                Ok(data) if data.is_empty() => BTreeMap::new(),
                Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|err| {
                    warn!(error = %err, "corrupt local sequences, re-reading everything");
                    BTreeMap::new()
                }),
                Err(err) => {
                    warn!(error = %err, "unreadable local sequences, re-reading everything");
                    BTreeMap::new()
                }
            };
        for app_id in self.dir.decoded_children()? {
            if app_id == self.own_app_id {
                continue;
            }
            for (bucket, sequence) in self.read_sequences(&app_id) {
                let known = local.get(&app_id).and_then(|m| m.get(&bucket)).copied();
                if known == Some(sequence) {
                    continue;
                }
                let handled = match self.execute_bucket(&app_id, &bucket, sink) {
                    Ok(handled) => handled,
                    Err(err) => {
                        warn!(app_id, bucket, error = %err,
                              "failed to process peer bucket, will retry");
                        false
                    }
                };
                if handled {
                    local
                        .entry(app_id.clone())
                        .or_default()
                        .insert(bucket, sequence);
                }
            }
        }
        if local.is_empty() {
            Ok(())
        } else {
            local_file.write_text(&serde_json::to_string(&local)?)
        }
    }

    /// Reads one changed peer bucket in full, merges it into the own log
    /// and delivers the survivors grouped by path, in log order.
    fn execute_bucket(
        &self,
        app_id: &str,
        bucket: &str,
        sink: &mut EntrySink<'_>,
    ) -> DecsyncResult<bool> {
        let incoming = self.read_bucket(app_id, bucket)?;
        let survivors = self.merge_into_own_bucket(bucket, incoming, false)?;
        let mut handled = true;
        for (path, entries) in group_by_path(survivors) {
            if !sink(&path, entries) {
                handled = false;
            }
        }
        Ok(handled)
    }

    pub fn execute_stored_entries_exact(
        &self,
        path: &[String],
        keys: Option<&[Value]>,
        sink: &mut EntrySink<'_>,
    ) -> DecsyncResult<()> {
        let bucket = bucket_for_path(path);
        let entries: Vec<Entry> = self
            .read_bucket(&self.own_app_id, &bucket)?
            .into_iter()
            .filter(|e| e.path == path)
            .map(|e| e.entry)
            .filter(|entry| keys.is_none_or(|keys| keys.contains(&entry.key)))
            .collect();
        if !entries.is_empty() {
            sink(path, entries);
        }
        Ok(())
    }

    pub fn execute_stored_entries_prefix(
        &self,
        prefix: &[String],
        keys: Option<&[Value]>,
        sink: &mut EntrySink<'_>,
    ) -> DecsyncResult<()> {
        for bucket in self.own_buckets()? {
            let matching: Vec<EntryWithPath> = self
                .read_bucket(&self.own_app_id, &bucket)?
                .into_iter()
                .filter(|e| e.path.starts_with(prefix))
                .filter(|e| keys.is_none_or(|keys| keys.contains(&e.entry.key)))
                .collect();
            for (path, entries) in group_by_path(matching) {
                sink(&path, entries);
            }
        }
        Ok(())
    }

    fn own_buckets(&self) -> DecsyncResult<Vec<String>> {
        Ok(self
            .app_dir(&self.own_app_id)
            .decoded_children()?
            .into_iter()
            .filter(|name| name != SEQUENCES)
            .collect())
    }

    /// The appId that stored the most recent entry anywhere; ties favor
    /// the own application. `None` when the V2 tree is empty.
    pub fn latest_app_id(&self) -> DecsyncResult<Option<String>> {
        let mut best: Option<(String, String)> = None;
        for app_id in self.dir.decoded_children()? {
            for bucket in self.app_dir(&app_id).decoded_children()? {
                if bucket == SEQUENCES {
                    continue;
                }
                for entry in self.read_bucket(&app_id, &bucket)? {
                    let datetime = entry.entry.datetime;
                    let replace = match &best {
                        None => true,
                        Some((_, current)) => {
                            datetime > *current
                                || (datetime == *current && app_id == self.own_app_id)
                        }
                    };
                    if replace {
                        best = Some((app_id.clone(), datetime));
                    }
                }
            }
        }
        Ok(best.map(|(app_id, _)| app_id))
    }

    /// Adopts the bucket files of `app_id` as the own ones. Used on a
    /// fresh install.
    pub fn copy_from_app(&self, app_id: &str) -> DecsyncResult<()> {
        let src = self.app_dir(app_id);
        let dst = self.app_dir(&self.own_app_id);
        for name in src.native().children()? {
            let data = src.native().child(&name).read(0)?;
            dst.native().child(&name).write(&data, false)?;
        }
        Ok(())
    }
}

/// Merges the `["info"]` buckets of every application in `subdir` into
/// `map`, newest entry per key.
pub(crate) fn collect_static_info(
    subdir: &DecsyncFile,
    map: &mut BTreeMap<String, Entry>,
) -> DecsyncResult<()> {
    let dir = subdir.child("v2");
    for app_id in dir.decoded_children()? {
        let lines = dir.child(&app_id).child(INFO_BUCKET).read_lines(0)?;
        for line in &lines {
            let Some(entry_with_path) = EntryWithPath::from_line(line) else {
                warn!(app_id, line, "skipping malformed entry line");
                continue;
            };
            if entry_with_path.path.len() == 1 && entry_with_path.path[0] == "info" {
                crate::v1::merge_newest(map, entry_with_path.entry);
            }
        }
    }
    Ok(())
}

/// All appIds with a V2 presence in `subdir`.
pub(crate) fn app_ids(subdir: &DecsyncFile) -> DecsyncResult<Vec<String>> {
    let mut ids = subdir.child("v2").decoded_children()?;
    ids.sort();
    Ok(ids)
}

/// Collapses a batch to one entry per `(path, key)`, keeping the
/// superseding one; first-appearance order is preserved.
fn dedup_by_path_key(entries: Vec<EntryWithPath>) -> Vec<EntryWithPath> {
    let mut out: Vec<EntryWithPath> = Vec::new();
    for incoming in entries {
        match out
            .iter_mut()
            .find(|e| e.path == incoming.path && e.entry.key == incoming.entry.key)
        {
            Some(existing) => {
                if incoming.entry.supersedes(&existing.entry) {
                    existing.entry = incoming.entry;
                }
            }
            None => out.push(incoming),
        }
    }
    out
}

/// Groups entries by path, preserving first-appearance order.
fn group_by_path(entries: Vec<EntryWithPath>) -> Vec<(Vec<String>, Vec<Entry>)> {
    let mut groups: Vec<(Vec<String>, Vec<Entry>)> = Vec::new();
    for EntryWithPath { path, entry } in entries {
        match groups.iter_mut().find(|(p, _)| *p == path) {
            Some((_, group)) => group.push(entry),
            None => groups.push((path, vec![entry])),
        }
    }
    groups
}
