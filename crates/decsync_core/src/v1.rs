//! The version 1 engine: path-as-directory layout.
//!
//! Each application owns four partitions under the sync subdirectory:
//!
//! ```text
//! info/<appId>/latest-stored-entry           most recent datetime stored
//! new-entries/<appId>/<path…>                append-only log, Entry per line
//! read-bytes/<ownAppId>/<appId>/<path…>      bytes of that peer log consumed
//! stored-entries/<ownAppId>/<path…>          current snapshot, Entry per line
//! ```
//!
//! Writers only touch their own partitions; consuming a peer is a pure
//! read plus own-side bookkeeping, so no locking is needed across
//! applications. Hidden `decsync-sequence` counters in every log
//! directory let readers skip subtrees that have not changed.

use crate::entry::{dedup_by_key, parse_entry_lines, Entry, EntrySink, EntryWithPath};
use crate::error::DecsyncResult;
use crate::file::DecsyncFile;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

const LATEST_STORED_ENTRY: &str = "latest-stored-entry";

/// The V1 engine over one sync subdirectory.
#[derive(Debug)]
pub(crate) struct V1Engine {
    own_app_id: String,
    info_dir: DecsyncFile,
    new_entries_dir: DecsyncFile,
    read_bytes_dir: DecsyncFile,
    stored_entries_dir: DecsyncFile,
}

/// The three files involved in processing one path of one application:
/// its log, the own snapshot, and the own read cursor into that log.
struct EntriesLocation {
    path: Vec<String>,
    new_entries: DecsyncFile,
    stored_entries: DecsyncFile,
    read_bytes: DecsyncFile,
}

impl V1Engine {
    pub fn new(subdir: &DecsyncFile, own_app_id: &str) -> Self {
        Self {
            own_app_id: own_app_id.to_string(),
            info_dir: subdir.child("info"),
            new_entries_dir: subdir.child("new-entries"),
            read_bytes_dir: subdir.child("read-bytes"),
            stored_entries_dir: subdir.child("stored-entries"),
        }
    }

    /// Whether this application has written a snapshot before.
    pub fn has_own_data(&self) -> DecsyncResult<bool> {
        let dir = self.stored_entries_dir.child(&self.own_app_id);
        Ok(dir.native().kind()? == decsync_fs::NodeKind::Directory)
    }

    fn location(&self, path: &[String], app_id: &str) -> EntriesLocation {
        EntriesLocation {
            path: path.to_vec(),
            new_entries: self.new_entries_dir.child(app_id).child_path(path),
            stored_entries: self.stored_entries_dir.child(&self.own_app_id).child_path(path),
            read_bytes: self
                .read_bytes_dir
                .child(&self.own_app_id)
                .child(app_id)
                .child_path(path),
        }
    }

    pub fn set_entries(&self, entries: Vec<EntryWithPath>) -> DecsyncResult<()> {
        let mut groups: Vec<(Vec<String>, Vec<Entry>)> = Vec::new();
        for EntryWithPath { path, entry } in entries {
            match groups.iter_mut().find(|(p, _)| *p == path) {
                Some((_, group)) => group.push(entry),
                None => groups.push((path, vec![entry])),
            }
        }
        for (path, group) in groups {
            self.set_entries_for_path(&path, group)?;
        }
        Ok(())
    }

    pub fn set_entries_for_path(
        &self,
        path: &[String],
        entries: Vec<Entry>,
    ) -> DecsyncResult<()> {
        let location = self.location(path, &self.own_app_id);
        let mut entries = dedup_by_key(entries);
        // Self-update of the snapshot; same-value rewrites are dropped so
        // the log carries only real changes.
        self.update_stored_entries(&location, &mut entries, true)?;
        if entries.is_empty() {
            return Ok(());
        }
        location
            .new_entries
            .write_lines(entries.iter().map(Entry::to_line), true)?;
        self.update_sequences(path)
    }

    /// Merges `entries` into the own snapshot at `location`.
    ///
    /// Entries that do not supersede the stored row for their key are
    /// removed from the batch; superseded stored rows are dropped from
    /// the snapshot. With `require_new_value`, an entry whose value
    /// equals the stored one is dropped even when its datetime is newer.
    fn update_stored_entries(
        &self,
        location: &EntriesLocation,
        entries: &mut Vec<Entry>,
        require_new_value: bool,
    ) -> DecsyncResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let lines = location.stored_entries.read_lines(0)?;
        let mut stored = parse_entry_lines(&lines, "stored-entries");
        entries.retain(|entry| match stored.iter().find(|s| s.key == entry.key) {
            Some(old) => {
                entry.supersedes(old) && !(require_new_value && entry.value == old.value)
            }
            None => true,
        });
        if entries.is_empty() {
            return Ok(());
        }
        let len_before = stored.len();
        stored.retain(|old| !entries.iter().any(|entry| entry.key == old.key));
        if stored.len() != len_before {
            location
                .stored_entries
                .write_lines(stored.iter().map(Entry::to_line), false)?;
        }
        location
            .stored_entries
            .write_lines(entries.iter().map(Entry::to_line), true)?;
        self.update_latest_stored_entry(entries)
    }

    /// Moves `info/own/latest-stored-entry` forward to the newest
    /// datetime in `entries`.
    fn update_latest_stored_entry(&self, entries: &[Entry]) -> DecsyncResult<()> {
        let Some(newest) = entries.iter().map(|e| e.datetime.as_str()).max() else {
            return Ok(());
        };
        let file = self
            .info_dir
            .child(&self.own_app_id)
            .child(LATEST_STORED_ENTRY);
        match file.read_text_tolerant() {
            Some(current) if current.as_str() >= newest => Ok(()),
            _ => file.write_text(newest),
        }
    }

    /// Bumps the sequence counter of every log directory on the way to
    /// `path`, from the application root down. Peers compare these
    /// against their mirrored copies to skip unchanged subtrees.
    fn update_sequences(&self, path: &[String]) -> DecsyncResult<()> {
        let own_dir = self.new_entries_dir.child(&self.own_app_id);
        for depth in 0..path.len() {
            let file = own_dir.child_path(&path[..depth]).sequence_file();
            let next = file.read_int_or_zero() + 1;
            file.write_text(&next.to_string())?;
        }
        Ok(())
    }

    pub fn execute_all_new_entries(&self, sink: &mut EntrySink<'_>) -> DecsyncResult<()> {
        // Peers add files through the external synchronizer at any time.
        self.new_entries_dir.reset_cache();
        for app_id in self.new_entries_dir.decoded_children()? {
            if app_id == self.own_app_id {
                continue;
            }
            let app_dir = self.new_entries_dir.child(&app_id);
            let read_bytes_dir = self.read_bytes_dir.child(&self.own_app_id).child(&app_id);
            app_dir.list_files_recursive_relative(Some(&read_bytes_dir), &|_| true, &mut |path| {
                let location = self.location(path, &app_id);
                match self.execute_entries_location(&location, sink) {
                    Ok(ok) => ok,
                    Err(err) => {
                        warn!(app_id, path = path.join("/"), error = %err,
                              "failed to process peer log, will retry");
                        false
                    }
                }
            })?;
        }
        Ok(())
    }

    /// Consumes the unread tail of one peer log file.
    ///
    /// The cursor only advances when the whole tail was processed and
    /// delivered, so a failure is retried on the next pass; replays are
    /// harmless because the snapshot merge discards already-known
    /// entries.
    fn execute_entries_location(
        &self,
        location: &EntriesLocation,
        sink: &mut EntrySink<'_>,
    ) -> DecsyncResult<bool> {
        let size = location.new_entries.length()?;
        let cursor = location.read_bytes.read_int_or_zero();
        if cursor >= size {
            return Ok(true);
        }
        // Cap at the observed size: bytes appended mid-read belong to the
        // next pass.
        let mut data = location.new_entries.native().read(cursor)?;
        data.truncate((size - cursor) as usize);
        let lines = crate::file::split_lines(&data);
        let mut entries = dedup_by_key(parse_entry_lines(&lines, "new-entries"));
        self.update_stored_entries(location, &mut entries, false)?;
        if !entries.is_empty() && !sink(&location.path, entries) {
            return Ok(false);
        }
        location.read_bytes.write_text(&size.to_string())?;
        Ok(true)
    }

    pub fn execute_stored_entries_exact(
        &self,
        path: &[String],
        keys: Option<&[Value]>,
        sink: &mut EntrySink<'_>,
    ) -> DecsyncResult<()> {
        let file = self.stored_entries_dir.child(&self.own_app_id).child_path(path);
        let entries = read_stored_file(&file, keys)?;
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
        let root = self.stored_entries_dir.child(&self.own_app_id).child_path(prefix);
        root.list_files_recursive_relative(None, &|_| true, &mut |relative| {
            let mut path = prefix.to_vec();
            path.extend_from_slice(relative);
            let file = root.child_path(relative);
            match read_stored_file(&file, keys) {
                Ok(entries) => {
                    if !entries.is_empty() {
                        sink(&path, entries);
                    }
                    true
                }
                Err(err) => {
                    warn!(path = path.join("/"), error = %err, "skipping unreadable snapshot file");
                    true
                }
            }
        })?;
        Ok(())
    }

    /// Returns the full snapshot of `app_id` as entries with paths.
    pub fn stored_entries_of(&self, app_id: &str) -> DecsyncResult<Vec<EntryWithPath>> {
        let root = self.stored_entries_dir.child(app_id);
        let mut out = Vec::new();
        root.list_files_recursive_relative(None, &|_| true, &mut |relative| {
            match read_stored_file(&root.child_path(relative), None) {
                Ok(entries) => {
                    out.extend(
                        entries
                            .into_iter()
                            .map(|entry| EntryWithPath::new(relative.to_vec(), entry)),
                    );
                    true
                }
                Err(err) => {
                    warn!(error = %err, "skipping unreadable snapshot file");
                    true
                }
            }
        })?;
        Ok(out)
    }

    /// The appId with the most recent `latest-stored-entry`; ties favor
    /// the own application. `None` when no application has stored
    /// anything.
    pub fn latest_app_id(&self) -> DecsyncResult<Option<String>> {
        let mut best: Option<(String, String)> = None;
        for app_id in self.info_dir.decoded_children()? {
            let Some(datetime) = self
                .info_dir
                .child(&app_id)
                .child(LATEST_STORED_ENTRY)
                .read_text_tolerant()
            else {
                continue;
            };
            let replace = match &best {
                None => true,
                Some((_, current)) => {
                    datetime > *current || (datetime == *current && app_id == self.own_app_id)
                }
            };
            if replace {
                best = Some((app_id, datetime));
            }
        }
        Ok(best.map(|(app_id, _)| app_id))
    }

    /// Adopts the snapshot of `app_id` as the own one: stored entries,
    /// read cursors and the latest-stored-entry marker. Used on a fresh
    /// install so the new application starts where the most up-to-date
    /// one left off.
    pub fn copy_from_app(&self, app_id: &str) -> DecsyncResult<()> {
        copy_tree(
            &self.stored_entries_dir.child(app_id),
            &self.stored_entries_dir.child(&self.own_app_id),
        )?;
        copy_tree(
            &self.read_bytes_dir.child(app_id),
            &self.read_bytes_dir.child(&self.own_app_id),
        )?;
        if let Some(datetime) = self
            .info_dir
            .child(app_id)
            .child(LATEST_STORED_ENTRY)
            .read_text_tolerant()
        {
            self.info_dir
                .child(&self.own_app_id)
                .child(LATEST_STORED_ENTRY)
                .write_text(&datetime)?;
        }
        Ok(())
    }

    /// Removes every partition owned by this application. Used as
    /// cleanup after the data moved to a newer layout.
    pub fn delete_own(&self) -> DecsyncResult<()> {
        self.info_dir.child(&self.own_app_id).delete_recursive()?;
        self.new_entries_dir.child(&self.own_app_id).delete_recursive()?;
        self.read_bytes_dir.child(&self.own_app_id).delete_recursive()?;
        self.stored_entries_dir.child(&self.own_app_id).delete_recursive()?;
        Ok(())
    }
}

/// Merges the `["info"]` snapshots of every application in `subdir` into
/// `map`, newest entry per key.
pub(crate) fn collect_static_info(
    subdir: &DecsyncFile,
    map: &mut BTreeMap<String, Entry>,
) -> DecsyncResult<()> {
    let stored_entries_dir = subdir.child("stored-entries");
    for app_id in stored_entries_dir.decoded_children()? {
        let file = stored_entries_dir.child(&app_id).child("info");
        for entry in parse_entry_lines(&file.read_lines(0)?, "stored-entries/info") {
            merge_newest(map, entry);
        }
    }
    Ok(())
}

/// All appIds with a V1 presence in `subdir`.
pub(crate) fn app_ids(subdir: &DecsyncFile) -> DecsyncResult<Vec<String>> {
    let mut ids: Vec<String> = subdir.child("info").decoded_children()?;
    for app_id in subdir.child("new-entries").decoded_children()? {
        if !ids.contains(&app_id) {
            ids.push(app_id);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Keeps the superseding entry per key in a serialized-key map.
pub(crate) fn merge_newest(map: &mut BTreeMap<String, Entry>, entry: Entry) {
    let key = entry.key.to_string();
    match map.get(&key) {
        Some(current) if !entry.supersedes(current) => {}
        _ => {
            map.insert(key, entry);
        }
    }
}

fn read_stored_file(file: &DecsyncFile, keys: Option<&[Value]>) -> DecsyncResult<Vec<Entry>> {
    let mut entries = parse_entry_lines(&file.read_lines(0)?, "stored-entries");
    if let Some(keys) = keys {
        entries.retain(|entry| keys.contains(&entry.key));
    }
    Ok(entries)
}

/// Recursively copies one subtree onto another, hidden files included.
fn copy_tree(src: &DecsyncFile, dst: &DecsyncFile) -> DecsyncResult<()> {
    match src.native().kind()? {
        decsync_fs::NodeKind::Absent => Ok(()),
        decsync_fs::NodeKind::File => {
            let data = src.native().read(0)?;
            dst.native().write(&data, false)?;
            Ok(())
        }
        decsync_fs::NodeKind::Directory => {
            for name in src.native().children()? {
                copy_tree(
                    &DecsyncFile::new(src.native().child(&name)),
                    &DecsyncFile::new(dst.native().child(&name)),
                )?;
            }
            Ok(())
        }
    }
}
