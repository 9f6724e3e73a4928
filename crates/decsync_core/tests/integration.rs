//! End-to-end scenarios over a shared in-memory directory.
//!
//! Each test models several applications (distinct appIds) operating on
//! one DecSync directory, the way an external file synchronizer would
//! present it after reconciliation.

use decsync_core::{
    get_active_apps_in, get_static_info_in, list_collections_in, Decsync, Entry, Extra, JsonKey,
};
use decsync_fs::{FileStore, MemFileStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

type Observed = HashMap<(Vec<String>, String), String>;

fn shared_dir() -> (Arc<MemFileStore>, Arc<dyn FileStore>) {
    let mem = Arc::new(MemFileStore::new());
    let store: Arc<dyn FileStore> = mem.clone();
    (mem, store)
}

fn open(store: &Arc<dyn FileStore>, app_id: &str) -> Decsync<Observed> {
    Decsync::with_store(Arc::clone(store), "rss", None, app_id).unwrap()
}

fn observe_everything(decsync: &mut Decsync<Observed>) {
    decsync.add_listener(vec![], |path, entry, extra| {
        if let Extra::WithExtra(observed) = extra {
            observed.insert(
                (path.to_vec(), entry.key.to_string()),
                entry.value.to_string(),
            );
        }
        true
    });
}

fn stored_values(decsync: &mut Decsync<Observed>, path: &[String]) -> Observed {
    let mut observed = Observed::new();
    decsync
        .execute_stored_entries_for_path_exact(path, &mut observed, None)
        .unwrap();
    observed
}

fn segments(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[test]
fn basic_set_and_execute() {
    let (_, store) = shared_dir();
    let path = segments(&["path", "unicode ☺"]);

    let a = open(&store, "app-a");
    a.set_entry(&path, json!("k"), json!("v")).unwrap();

    let mut b = open(&store, "app-b");
    observe_everything(&mut b);
    let mut observed = Observed::new();
    b.execute_all_new_entries(&mut observed, true).unwrap();

    let key = (path.clone(), "\"k\"".to_string());
    assert_eq!(observed.get(&key).map(String::as_str), Some("\"v\""));
    assert_eq!(observed.len(), 1);

    // Idempotent: a second pass changes nothing.
    let before = observed.clone();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert_eq!(observed, before);
}

#[test]
fn basic_set_and_execute_on_v2() {
    let (mem, store) = shared_dir();
    mem.write(&segments(&[".decsync-info"]), br#"{"version":2}"#, false)
        .unwrap();
    let path = segments(&["path", "unicode ☺"]);

    let a = open(&store, "app-a");
    assert_eq!(a.version(), 2);
    a.set_entry(&path, json!("k"), json!("v")).unwrap();

    let mut b = open(&store, "app-b");
    observe_everything(&mut b);
    let mut observed = Observed::new();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert_eq!(
        observed.get(&(path, "\"k\"".to_string())).map(String::as_str),
        Some("\"v\"")
    );
}

#[test]
fn conflicting_writes_converge_on_newest_datetime() {
    let (_, store) = shared_dir();
    let path = segments(&["p"]);

    let mut a = open(&store, "app-a");
    let mut b = open(&store, "app-b");
    a.set_entries_for_path(
        &path,
        vec![Entry::new("2020-08-23T00:00:00", json!("k"), json!("older"))],
    )
    .unwrap();
    b.set_entries_for_path(
        &path,
        vec![Entry::new("2020-08-23T00:00:01", json!("k"), json!("newer"))],
    )
    .unwrap();

    let mut scratch = Observed::new();
    a.execute_all_new_entries(&mut scratch, true).unwrap();
    b.execute_all_new_entries(&mut scratch, true).unwrap();

    for decsync in [&mut a, &mut b] {
        let stored = stored_values(decsync, &path);
        assert_eq!(
            stored
                .get(&(path.clone(), "\"k\"".to_string()))
                .map(String::as_str),
            Some("\"newer\"")
        );
    }
}

#[test]
fn equal_datetimes_converge_on_larger_value() {
    let (_, store) = shared_dir();
    let path = segments(&["p"]);
    let datetime = "2020-08-23T00:00:00";

    let mut a = open(&store, "app-a");
    let mut b = open(&store, "app-b");
    a.set_entries_for_path(&path, vec![Entry::new(datetime, json!("k"), json!("apple"))])
        .unwrap();
    b.set_entries_for_path(&path, vec![Entry::new(datetime, json!("k"), json!("zebra"))])
        .unwrap();

    let mut scratch = Observed::new();
    a.execute_all_new_entries(&mut scratch, true).unwrap();
    b.execute_all_new_entries(&mut scratch, true).unwrap();

    for decsync in [&mut a, &mut b] {
        let stored = stored_values(decsync, &path);
        assert_eq!(
            stored
                .get(&(path.clone(), "\"k\"".to_string()))
                .map(String::as_str),
            Some("\"zebra\"")
        );
    }
}

#[test]
fn equal_write_is_idempotent() {
    let (mem, store) = shared_dir();
    let path = segments(&["p"]);
    let entry = Entry::new("2020-08-23T00:00:00", json!("k"), json!("v"));

    let a = open(&store, "app-a");
    a.set_entries_for_path(&path, vec![entry.clone()]).unwrap();
    a.set_entries_for_path(&path, vec![entry]).unwrap();

    // One log line, not two.
    let log = mem
        .read(&segments(&["rss", "new-entries", "app-a", "p"]), 0)
        .unwrap();
    assert_eq!(String::from_utf8(log).unwrap().lines().count(), 1);

    // And a single delivery on the peer.
    let mut b = open(&store, "app-b");
    observe_everything(&mut b);
    let mut observed = Observed::new();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert_eq!(observed.len(), 1);
}

#[test]
fn list_collections_discovers_info_writers() {
    let (_, store) = shared_dir();
    assert!(list_collections_in(&store, "contacts").unwrap().is_empty());

    for collection in ["foo", "bar"] {
        let decsync: Decsync<Observed> =
            Decsync::with_store(Arc::clone(&store), "contacts", Some(collection), "app-a")
                .unwrap();
        decsync
            .set_entry(&segments(&["info"]), json!("name"), json!(collection))
            .unwrap();
    }

    let mut collections = list_collections_in(&store, "contacts").unwrap();
    collections.sort();
    assert_eq!(collections, vec!["bar", "foo"]);
}

#[test]
fn static_info_merges_across_apps() {
    let (_, store) = shared_dir();
    let info = segments(&["info"]);

    let a = open(&store, "app-a");
    let b = open(&store, "app-b");
    a.set_entries_for_path(
        &info,
        vec![Entry::new("2020-08-23T00:00:00", json!("name"), json!("foo"))],
    )
    .unwrap();
    b.set_entries_for_path(
        &info,
        vec![Entry::new("2020-08-23T00:00:00", json!("color"), json!("bar"))],
    )
    .unwrap();

    let map = get_static_info_in(&store, "rss", None).unwrap();
    assert_eq!(map.get(&JsonKey(json!("name"))), Some(&json!("foo")));
    assert_eq!(map.get(&JsonKey(json!("color"))), Some(&json!("bar")));
}

#[test]
fn upgrade_to_v2_retains_values() {
    let (mem, store) = shared_dir();
    let path = segments(&["p"]);

    // Legacy state: version 1 with one entry from app-a.
    let mut a = open(&store, "app-a");
    assert_eq!(a.version(), 1);
    a.set_entries_for_path(
        &path,
        vec![Entry::new("2020-08-23T00:00:00", json!("k"), json!("v1"))],
    )
    .unwrap();

    // The directory moves to version 2.
    mem.write(&segments(&[".decsync-info"]), br#"{"version":2}"#, false)
        .unwrap();

    // A fresh install picks V2, bootstraps from the legacy data and
    // observes the old value.
    let mut b = open(&store, "app-b");
    assert_eq!(b.version(), 2);
    observe_everything(&mut b);
    b.init_stored_entries().unwrap();
    let mut observed = Observed::new();
    b.execute_stored_entry(&path, json!("k"), &mut observed).unwrap();
    assert_eq!(
        observed
            .get(&(path.clone(), "\"k\"".to_string()))
            .map(String::as_str),
        Some("\"v1\"")
    );

    // Legacy app-a still writes V1 until its own maintenance runs. Its
    // later info write stays visible through the static surface...
    a.set_entries_for_path(
        &segments(&["info"]),
        vec![Entry::new("2020-08-23T00:00:10", json!("name"), json!("v3"))],
    )
    .unwrap();
    let map = get_static_info_in(&store, "rss", None).unwrap();
    assert_eq!(map.get(&JsonKey(json!("name"))), Some(&json!("v3")));

    // ...but is not delivered to the V2-only reader.
    let mut observed = Observed::new();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert!(observed.is_empty());

    // Once app-a's maintenance runs, it migrates its own data to V2.
    let mut scratch = Observed::new();
    a.execute_all_new_entries(&mut scratch, false).unwrap();
    assert_eq!(a.version(), 2);
    let stored = stored_values(&mut a, &path);
    assert_eq!(
        stored
            .get(&(path.clone(), "\"k\"".to_string()))
            .map(String::as_str),
        Some("\"v1\"")
    );

    // The V1 partitions of app-a are gone after the cleanup.
    assert!(!mem
        .file_paths()
        .iter()
        .any(|p| p.starts_with(&segments(&["rss", "new-entries", "app-a"]))));
}

#[test]
fn sequence_skip_avoids_reopening_unchanged_files() {
    let (mem, store) = shared_dir();
    let path = segments(&["sub", "leaf"]);
    let log_path = segments(&["rss", "new-entries", "app-a", "sub", "leaf"]);

    let a = open(&store, "app-a");
    a.set_entries_for_path(
        &path,
        vec![Entry::new("2020-08-23T00:00:00", json!("k"), json!("v1"))],
    )
    .unwrap();

    let mut b = open(&store, "app-b");
    observe_everything(&mut b);
    let mut observed = Observed::new();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert_eq!(observed.len(), 1);

    // Modify the log behind the sequence counters' back.
    mem.write(
        &log_path,
        b"[\"2020-08-23T00:00:10\",\"k\",\"v2\"]\n",
        true,
    )
    .unwrap();
    mem.clear_reads();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert_eq!(
        mem.read_count(&log_path),
        0,
        "unchanged sequences must short-circuit the subtree"
    );
    assert_eq!(
        observed
            .get(&(path.clone(), "\"k\"".to_string()))
            .map(String::as_str),
        Some("\"v1\"")
    );

    // Bump the sequence counters the way a writer would; the next pass
    // must open the file and deliver the update.
    for dir in [
        segments(&["rss", "new-entries", "app-a"]),
        segments(&["rss", "new-entries", "app-a", "sub"]),
    ] {
        let mut sequence_path = dir;
        sequence_path.push(".decsync-sequence".to_string());
        mem.write(&sequence_path, b"2\n", false).unwrap();
    }
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert!(mem.read_count(&log_path) > 0);
    assert_eq!(
        observed
            .get(&(path, "\"k\"".to_string()))
            .map(String::as_str),
        Some("\"v2\"")
    );
}

#[test]
fn concurrent_append_is_consumed_next_pass() {
    let (_, store) = shared_dir();
    let path = segments(&["p"]);

    let a = open(&store, "app-a");
    let mut b = open(&store, "app-b");
    observe_everything(&mut b);

    a.set_entries_for_path(
        &path,
        vec![Entry::new("2020-08-23T00:00:00", json!("k"), json!("v1"))],
    )
    .unwrap();
    let mut observed = Observed::new();
    b.execute_all_new_entries(&mut observed, true).unwrap();

    a.set_entries_for_path(
        &path,
        vec![Entry::new("2020-08-23T00:00:01", json!("k"), json!("v2"))],
    )
    .unwrap();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert_eq!(
        observed
            .get(&(path, "\"k\"".to_string()))
            .map(String::as_str),
        Some("\"v2\"")
    );
}

#[test]
fn no_empty_files_at_rest() {
    let (mem, store) = shared_dir();

    let mut a = open(&store, "app-a");
    a.set_entry(&segments(&["p"]), json!("k"), json!("v")).unwrap();
    let mut scratch = Observed::new();
    a.execute_all_new_entries(&mut scratch, false).unwrap();

    let mut b = open(&store, "app-b");
    b.execute_all_new_entries(&mut scratch, false).unwrap();

    for file in mem.file_paths() {
        let length = mem.length(&file).unwrap();
        assert!(length > 0, "zero-length file at rest: {}", file.join("/"));
    }
}

#[test]
fn works_on_the_real_filesystem() {
    let temp = tempfile::tempdir().unwrap();
    let path = segments(&["path", "unicode ☺"]);

    let a: Decsync<Observed> = Decsync::new(temp.path(), "rss", None, "app-a").unwrap();
    a.set_entry(&path, json!("k"), json!("v")).unwrap();

    // The on-disk names are the encoded forms.
    assert!(temp
        .path()
        .join("rss")
        .join("new-entries")
        .join("app-a")
        .join("path")
        .join("unicode%20%E2%98%BA")
        .is_file());
    assert!(temp.path().join(".decsync-info").is_file());

    let mut b: Decsync<Observed> = Decsync::new(temp.path(), "rss", None, "app-b").unwrap();
    observe_everything(&mut b);
    let mut observed = Observed::new();
    b.execute_all_new_entries(&mut observed, true).unwrap();
    assert_eq!(
        observed
            .get(&(path, "\"k\"".to_string()))
            .map(String::as_str),
        Some("\"v\"")
    );
}

#[test]
fn active_apps_span_both_layouts() {
    let (mem, store) = shared_dir();

    let mut a = open(&store, "app-a");
    let mut scratch = Observed::new();
    a.execute_all_new_entries(&mut scratch, false).unwrap();

    mem.write(&segments(&[".decsync-info"]), br#"{"version":2}"#, false)
        .unwrap();
    let mut b = open(&store, "app-b");
    assert_eq!(b.version(), 2);
    b.execute_all_new_entries(&mut scratch, false).unwrap();

    let (version, apps) = get_active_apps_in(&store, "rss", None).unwrap();
    assert_eq!(version, 2);
    let ids: Vec<&str> = apps.iter().map(|app| app.app_id.as_str()).collect();
    assert_eq!(ids, vec!["app-a", "app-b"]);
    assert_eq!(apps[0].version, 1);
    assert_eq!(apps[1].version, 2);
}
