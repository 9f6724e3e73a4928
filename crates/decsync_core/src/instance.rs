//! The `Decsync` dispatcher: listeners, version routing, maintenance.

use crate::entry::{current_date, AppData, Entry, EntryWithPath, JsonKey, StoredEntry};
use crate::error::{DecsyncError, DecsyncResult};
use crate::file::DecsyncFile;
use crate::info::{read_or_create_info, sync_subdir, LocalInfo, SUPPORTED_VERSION};
use crate::v1::V1Engine;
use crate::v2::V2Engine;
use decsync_fs::{FileStore, NativeFile, NodeKind, SysFileStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Marker telling a listener why it is being invoked.
///
/// During the first-install replay of [`Decsync::init_stored_entries`]
/// there is no caller context yet; live deliveries carry the context the
/// caller passed into the executing method.
#[derive(Debug)]
pub enum Extra<'a, T> {
    /// Replay of the own snapshot on a fresh install.
    NoExtra,
    /// Live delivery with the caller's context.
    WithExtra(&'a mut T),
}

type OnEntriesUpdate<T> = Box<dyn FnMut(&[String], &[Entry], Extra<'_, T>) -> bool>;

struct Listener<T> {
    subpath: Vec<String>,
    on_entries_update: OnEntriesUpdate<T>,
}

enum Engine {
    V1(V1Engine),
    V2(V2Engine),
}

/// An interface to the synchronized key-value mappings of one application.
///
/// A `Decsync` instance is a sequential state machine over the shared
/// directory: callers must serialize access to it, while instances with
/// different appIds (usually in different processes or on different
/// devices) operate on the same directory concurrently without
/// coordination.
///
/// `T` is the caller's context type, threaded through to listeners on
/// every live delivery.
///
/// # Example
///
/// ```rust
/// use decsync_core::{Decsync, Extra};
/// use decsync_fs::MemFileStore;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let store = Arc::new(MemFileStore::new());
/// let mut decsync: Decsync<Vec<String>> =
///     Decsync::with_store(store, "rss", None, "app-1").unwrap();
/// decsync.add_listener(vec![], |_path, entry, extra| {
///     if let Extra::WithExtra(log) = extra {
///         log.push(entry.value.to_string());
///     }
///     true
/// });
/// decsync.set_entry(&["feeds".into()], json!("url"), json!(true)).unwrap();
/// ```
pub struct Decsync<T = ()> {
    own_app_id: String,
    root: DecsyncFile,
    subdir: DecsyncFile,
    local_dir: DecsyncFile,
    local_info: LocalInfo,
    version: i64,
    engine: Engine,
    listeners: Vec<Listener<T>>,
    is_in_init: bool,
}

impl<T> Decsync<T> {
    /// Opens an instance over the real filesystem.
    ///
    /// # Errors
    ///
    /// - [`DecsyncError::InvalidInfo`] / [`DecsyncError::UnsupportedVersion`]
    ///   when `.decsync-info` is unusable
    /// - [`DecsyncError::InsufficientAccess`] when the directory cannot be
    ///   accessed
    pub fn new(
        decsync_dir: &Path,
        sync_type: &str,
        collection: Option<&str>,
        own_app_id: &str,
    ) -> DecsyncResult<Self> {
        let store = SysFileStore::open(decsync_dir).map_err(DecsyncError::from_open)?;
        Self::with_store(Arc::new(store), sync_type, collection, own_app_id)
    }

    /// Opens an instance over any file store.
    ///
    /// The store root is the DecSync directory. Sharing one store between
    /// instances with different appIds models multiple synchronized
    /// applications.
    pub fn with_store(
        store: Arc<dyn FileStore>,
        sync_type: &str,
        collection: Option<&str>,
        own_app_id: &str,
    ) -> DecsyncResult<Self> {
        let root = DecsyncFile::new(NativeFile::root(store));
        let global_info = read_or_create_info(&root)?;
        let subdir = sync_subdir(&root, sync_type, collection);
        let local_dir = subdir.child("local").child(own_app_id);
        let mut local_info = LocalInfo::read(&local_dir);

        let version = match local_info.version {
            Some(version) => version,
            None => {
                // No local commitment yet: prefer the layout that already
                // has data over the advertised one.
                let version = if subdir.child("v2").native().kind()? == NodeKind::Directory {
                    2
                } else if subdir
                    .child("stored-entries")
                    .child(own_app_id)
                    .native()
                    .kind()?
                    == NodeKind::Directory
                {
                    1
                } else {
                    global_info.version
                };
                local_info.version = Some(version);
                local_info.write(&local_dir)?;
                version
            }
        };
        debug!(own_app_id, version, "selected layout version");

        let engine = match version {
            1 => Engine::V1(V1Engine::new(&subdir, own_app_id)),
            _ => Engine::V2(V2Engine::new(&subdir, &local_dir, own_app_id)),
        };

        Ok(Self {
            own_app_id: own_app_id.to_string(),
            root,
            subdir,
            local_dir,
            local_info,
            version,
            engine,
            listeners: Vec::new(),
            is_in_init: false,
        })
    }

    /// Returns the appId this instance writes as.
    #[must_use]
    pub fn own_app_id(&self) -> &str {
        &self.own_app_id
    }

    /// Returns the layout version this instance committed to.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Adds a listener for entries whose path starts with `subpath`.
    ///
    /// The callback receives one entry at a time; see
    /// [`Decsync::add_multi_listener`] for batch delivery. The first
    /// registered listener whose subpath matches a path receives its
    /// entries. The returned flag tells the engine whether the update was
    /// handled; unhandled updates are redelivered on a later pass.
    pub fn add_listener<F>(&mut self, subpath: Vec<String>, mut on_entry_update: F)
    where
        F: FnMut(&[String], &Entry, Extra<'_, T>) -> bool + 'static,
    {
        self.add_multi_listener(subpath, move |path, entries, extra| match extra {
            Extra::NoExtra => entries
                .iter()
                .all(|entry| on_entry_update(path, entry, Extra::NoExtra)),
            Extra::WithExtra(context) => entries
                .iter()
                .all(|entry| on_entry_update(path, entry, Extra::WithExtra(&mut *context))),
        });
    }

    /// Adds a listener receiving all updated entries of a path at once.
    pub fn add_multi_listener<F>(&mut self, subpath: Vec<String>, on_entries_update: F)
    where
        F: FnMut(&[String], &[Entry], Extra<'_, T>) -> bool + 'static,
    {
        self.listeners.push(Listener {
            subpath,
            on_entries_update: Box::new(on_entries_update),
        });
    }

    /// Associates `value` with `key` in the map at `path` and publishes
    /// the update, stamped with the current datetime.
    pub fn set_entry(&self, path: &[String], key: Value, value: Value) -> DecsyncResult<()> {
        self.set_entries_for_path(path, vec![Entry::now(key, value)])
    }

    /// Publishes entries living under several paths.
    pub fn set_entries(&self, entries: Vec<EntryWithPath>) -> DecsyncResult<()> {
        match &self.engine {
            Engine::V1(engine) => engine.set_entries(entries),
            Engine::V2(engine) => engine.set_entries(entries),
        }
    }

    /// Publishes entries sharing one path.
    pub fn set_entries_for_path(
        &self,
        path: &[String],
        entries: Vec<Entry>,
    ) -> DecsyncResult<()> {
        match &self.engine {
            Engine::V1(engine) => engine.set_entries_for_path(path, entries),
            Engine::V2(engine) => engine.set_entries(
                entries
                    .into_iter()
                    .map(|entry| EntryWithPath::new(path.to_vec(), entry))
                    .collect(),
            ),
        }
    }

    /// Consumes every update published by peers since the last pass and
    /// invokes the matching listeners.
    ///
    /// Maintenance runs afterwards unless disabled: a pending version
    /// upgrade is applied, and the `last-active` / `supported-version`
    /// heartbeats are published when stale.
    pub fn execute_all_new_entries(
        &mut self,
        extra: &mut T,
        disable_maintenance: bool,
    ) -> DecsyncResult<()> {
        if self.is_in_init {
            return Ok(());
        }
        self.run_engine_pass(Some(&mut *extra))?;
        if !disable_maintenance {
            self.run_maintenance(extra)?;
        }
        Ok(())
    }

    fn run_engine_pass(&mut self, mut extra: Option<&mut T>) -> DecsyncResult<()> {
        let strip = matches!(self.engine, Engine::V1(_));
        let Self {
            engine, listeners, ..
        } = self;
        let mut sink = |path: &[String], entries: Vec<Entry>| {
            deliver(listeners, strip, path, entries, &mut extra)
        };
        match engine {
            Engine::V1(engine) => engine.execute_all_new_entries(&mut sink),
            Engine::V2(engine) => engine.execute_all_new_entries(&mut sink),
        }
    }

    fn run_maintenance(&mut self, extra: &mut T) -> DecsyncResult<()> {
        let global_info = read_or_create_info(&self.root)?;
        if global_info.version > self.version {
            self.upgrade()?;
            self.run_engine_pass(Some(extra))?;
        }

        let today = current_date();
        if self
            .local_info
            .last_active
            .as_deref()
            .is_none_or(|last_active| today.as_str() > last_active)
        {
            self.local_info.last_active = Some(today.clone());
            self.local_info.write(&self.local_dir)?;
            self.set_entry(
                &["info".to_string()],
                Value::String(format!("last-active-{}", self.own_app_id)),
                Value::String(today),
            )?;
        }

        if self.local_info.supported_version.unwrap_or(0) < SUPPORTED_VERSION {
            self.local_info.supported_version = Some(SUPPORTED_VERSION);
            self.local_info.write(&self.local_dir)?;
            self.set_entry(
                &["info".to_string()],
                Value::String(format!("supported-version-{}", self.own_app_id)),
                Value::from(SUPPORTED_VERSION),
            )?;
        }
        Ok(())
    }

    /// Moves the own data from the V1 layout into V2.
    ///
    /// The old snapshot is collected through a transient delivery and
    /// republished in one `set_entries` call, so every bucket is written
    /// and sequenced once. Deleting the V1 partitions afterwards is
    /// best-effort; leftovers are invisible to upgraded peers.
    fn upgrade(&mut self) -> DecsyncResult<()> {
        let Engine::V1(old_engine) = &self.engine else {
            return Ok(());
        };
        info!(own_app_id = %self.own_app_id, "upgrading own data to layout version 2");

        let mut collected = Vec::new();
        old_engine.execute_stored_entries_prefix(&[], None, &mut |path, entries| {
            collected.extend(
                entries
                    .into_iter()
                    .map(|entry| EntryWithPath::new(path.to_vec(), entry)),
            );
            true
        })?;

        let new_engine = V2Engine::new(&self.subdir, &self.local_dir, &self.own_app_id);
        new_engine.set_entries(collected)?;
        if let Err(err) = old_engine.delete_own() {
            warn!(error = %err, "cleanup of version 1 data failed, stale files remain");
        }

        self.engine = Engine::V2(new_engine);
        self.version = 2;
        self.local_info.version = Some(2);
        self.local_info.write(&self.local_dir)
    }

    /// Executes the stored entry at `path` with key `key`.
    pub fn execute_stored_entry(
        &mut self,
        path: &[String],
        key: Value,
        extra: &mut T,
    ) -> DecsyncResult<()> {
        let keys = [key];
        self.execute_stored_entries_for_path_exact(path, extra, Some(&keys))
    }

    /// Executes the given stored entries, grouped by path.
    pub fn execute_stored_entries(
        &mut self,
        stored_entries: &[StoredEntry],
        extra: &mut T,
    ) -> DecsyncResult<()> {
        let mut groups: Vec<(Vec<String>, Vec<Value>)> = Vec::new();
        for stored_entry in stored_entries {
            match groups.iter_mut().find(|(path, _)| *path == stored_entry.path) {
                Some((_, keys)) => keys.push(stored_entry.key.clone()),
                None => groups.push((stored_entry.path.clone(), vec![stored_entry.key.clone()])),
            }
        }
        for (path, keys) in groups {
            self.execute_stored_entries_for_path_exact(&path, extra, Some(&keys))?;
        }
        Ok(())
    }

    /// Executes the stored entries of exactly `path`, optionally
    /// restricted to `keys`.
    pub fn execute_stored_entries_for_path_exact(
        &mut self,
        path: &[String],
        extra: &mut T,
        keys: Option<&[Value]>,
    ) -> DecsyncResult<()> {
        let strip = matches!(self.engine, Engine::V1(_));
        let Self {
            engine, listeners, ..
        } = self;
        let mut extra = Some(extra);
        let mut sink = |delivery_path: &[String], entries: Vec<Entry>| {
            deliver(listeners, strip, delivery_path, entries, &mut extra)
        };
        match engine {
            Engine::V1(engine) => engine.execute_stored_entries_exact(path, keys, &mut sink),
            Engine::V2(engine) => engine.execute_stored_entries_exact(path, keys, &mut sink),
        }
    }

    /// Executes the stored entries of every path starting with `prefix`,
    /// optionally restricted to `keys`.
    pub fn execute_stored_entries_for_path_prefix(
        &mut self,
        prefix: &[String],
        extra: &mut T,
        keys: Option<&[Value]>,
    ) -> DecsyncResult<()> {
        let strip = matches!(self.engine, Engine::V1(_));
        let Self {
            engine, listeners, ..
        } = self;
        let mut extra = Some(extra);
        let mut sink = |delivery_path: &[String], entries: Vec<Entry>| {
            deliver(listeners, strip, delivery_path, entries, &mut extra)
        };
        match engine {
            Engine::V1(engine) => engine.execute_stored_entries_prefix(prefix, keys, &mut sink),
            Engine::V2(engine) => engine.execute_stored_entries_prefix(prefix, keys, &mut sink),
        }
    }

    /// Prepares a fresh install: adopts the most up-to-date application's
    /// snapshot as the own one and replays it to the listeners with the
    /// [`Extra::NoExtra`] marker.
    ///
    /// Almost exclusively called right after the application is
    /// (re)installed, usually followed by `execute_stored_entry` calls as
    /// the application materializes its items.
    pub fn init_stored_entries(&mut self) -> DecsyncResult<()> {
        self.is_in_init = true;
        let result = self.init_stored_entries_inner();
        self.is_in_init = false;
        result
    }

    fn init_stored_entries_inner(&mut self) -> DecsyncResult<()> {
        self.bootstrap_own_snapshot()?;
        let strip = matches!(self.engine, Engine::V1(_));
        let Self {
            engine, listeners, ..
        } = self;
        let mut extra: Option<&mut T> = None;
        let mut sink = |path: &[String], entries: Vec<Entry>| {
            deliver(listeners, strip, path, entries, &mut extra)
        };
        match engine {
            Engine::V1(engine) => engine.execute_stored_entries_prefix(&[], None, &mut sink),
            Engine::V2(engine) => engine.execute_stored_entries_prefix(&[], None, &mut sink),
        }
    }

    fn bootstrap_own_snapshot(&mut self) -> DecsyncResult<()> {
        match &self.engine {
            Engine::V1(engine) => {
                if let Some(latest) = engine.latest_app_id()? {
                    if latest != self.own_app_id {
                        debug!(latest, "adopting snapshot of most recent application");
                        engine.copy_from_app(&latest)?;
                    }
                }
                Ok(())
            }
            Engine::V2(engine) => {
                match engine.latest_app_id()? {
                    Some(latest) => {
                        if latest != self.own_app_id {
                            debug!(latest, "adopting snapshot of most recent application");
                            engine.copy_from_app(&latest)?;
                        }
                    }
                    None => {
                        // Nobody has written V2 data yet; a legacy V1
                        // writer may hold the most recent state.
                        let legacy = V1Engine::new(&self.subdir, &self.own_app_id);
                        if let Some(latest) = legacy.latest_app_id()? {
                            debug!(latest, "importing snapshot of legacy application");
                            let entries = legacy.stored_entries_of(&latest)?;
                            if !entries.is_empty() {
                                engine.set_entries(entries)?;
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Returns the appId that stored the most recent entry, preferring
    /// the own application on ties or when nothing is stored yet.
    pub fn latest_app_id(&self) -> DecsyncResult<String> {
        let latest = match &self.engine {
            Engine::V1(engine) => engine.latest_app_id()?,
            Engine::V2(engine) => engine.latest_app_id()?,
        };
        Ok(latest.unwrap_or_else(|| self.own_app_id.clone()))
    }
}

/// Routes one batch to the first matching listener.
///
/// Maintenance keys under `["info"]` are engine-internal and filtered out
/// before user listeners see them. A path no listener matches is treated
/// as handled so the cursor still advances.
fn deliver<T>(
    listeners: &mut [Listener<T>],
    strip_subpath: bool,
    path: &[String],
    entries: Vec<Entry>,
    extra: &mut Option<&mut T>,
) -> bool {
    let entries = filter_info_entries(path, entries);
    if entries.is_empty() {
        return true;
    }
    let Some(listener) = listeners
        .iter_mut()
        .find(|listener| path.starts_with(&listener.subpath))
    else {
        warn!(path = path.join("/"), "no listener matches path");
        return true;
    };
    let delivery_path = if strip_subpath && !listener.subpath.is_empty() {
        &path[listener.subpath.len()..]
    } else {
        path
    };
    let marker = match extra {
        Some(context) => Extra::WithExtra(&mut **context),
        None => Extra::NoExtra,
    };
    (listener.on_entries_update)(delivery_path, &entries, marker)
}

/// Drops the peer-visibility maintenance entries from `["info"]` batches.
fn filter_info_entries(path: &[String], mut entries: Vec<Entry>) -> Vec<Entry> {
    if path.len() == 1 && path[0] == "info" {
        entries.retain(|entry| {
            !matches!(
                entry.key.as_str(),
                Some(key) if key.starts_with("last-active-")
                    || key.starts_with("supported-version-")
            )
        });
    }
    entries
}

fn store_root(store: &Arc<dyn FileStore>) -> DecsyncFile {
    DecsyncFile::new(NativeFile::root(Arc::clone(store)))
}

fn open_sys_store(decsync_dir: &Path) -> DecsyncResult<Arc<dyn FileStore>> {
    let store = SysFileStore::open(decsync_dir).map_err(DecsyncError::from_open)?;
    Ok(Arc::new(store))
}

/// Checks `.decsync-info` in `decsync_dir`, creating a version 1 file if
/// absent.
///
/// # Errors
///
/// [`DecsyncError::InvalidInfo`] or [`DecsyncError::UnsupportedVersion`]
/// when the file exists but is unusable.
pub fn check_decsync_info(decsync_dir: &Path) -> DecsyncResult<()> {
    check_decsync_info_in(&open_sys_store(decsync_dir)?)
}

/// [`check_decsync_info`] over any file store.
pub fn check_decsync_info_in(store: &Arc<dyn FileStore>) -> DecsyncResult<()> {
    read_or_create_info(&store_root(store)).map(|_| ())
}

/// Lists the collections of `sync_type` in `decsync_dir`.
pub fn list_collections(decsync_dir: &Path, sync_type: &str) -> DecsyncResult<Vec<String>> {
    list_collections_in(&open_sys_store(decsync_dir)?, sync_type)
}

/// [`list_collections`] over any file store.
pub fn list_collections_in(
    store: &Arc<dyn FileStore>,
    sync_type: &str,
) -> DecsyncResult<Vec<String>> {
    let dir = store_root(store).child(sync_type);
    let mut collections = Vec::new();
    for name in dir.decoded_children()? {
        if dir.child(&name).native().kind()? == NodeKind::Directory {
            collections.push(name);
        }
    }
    Ok(collections)
}

/// Returns the most up-to-date value per key under the path `["info"]`,
/// merged across every application and every layout version.
pub fn get_static_info(
    decsync_dir: &Path,
    sync_type: &str,
    collection: Option<&str>,
) -> DecsyncResult<HashMap<JsonKey, Value>> {
    get_static_info_in(&open_sys_store(decsync_dir)?, sync_type, collection)
}

/// [`get_static_info`] over any file store.
pub fn get_static_info_in(
    store: &Arc<dyn FileStore>,
    sync_type: &str,
    collection: Option<&str>,
) -> DecsyncResult<HashMap<JsonKey, Value>> {
    Ok(merged_static_info(store, sync_type, collection)?
        .into_values()
        .map(|entry| (JsonKey(entry.key), entry.value))
        .collect())
}

/// The newest info entry per serialized key, across both layouts. Legacy
/// V1 writers stay visible this way after the directory moved to V2.
fn merged_static_info(
    store: &Arc<dyn FileStore>,
    sync_type: &str,
    collection: Option<&str>,
) -> DecsyncResult<BTreeMap<String, Entry>> {
    let subdir = sync_subdir(&store_root(store), sync_type, collection);
    let mut map = BTreeMap::new();
    crate::v1::collect_static_info(&subdir, &mut map)?;
    crate::v2::collect_static_info(&subdir, &mut map)?;
    Ok(map)
}

/// Returns the directory's version and a summary of every application
/// seen in it.
pub fn get_active_apps(
    decsync_dir: &Path,
    sync_type: &str,
    collection: Option<&str>,
) -> DecsyncResult<(i64, Vec<AppData>)> {
    get_active_apps_in(&open_sys_store(decsync_dir)?, sync_type, collection)
}

/// [`get_active_apps`] over any file store.
pub fn get_active_apps_in(
    store: &Arc<dyn FileStore>,
    sync_type: &str,
    collection: Option<&str>,
) -> DecsyncResult<(i64, Vec<AppData>)> {
    let root = store_root(store);
    let global_info = read_or_create_info(&root)?;
    let subdir = sync_subdir(&root, sync_type, collection);
    let info_map = merged_static_info(store, sync_type, collection)?;

    let mut versions: BTreeMap<String, i64> = BTreeMap::new();
    for app_id in crate::v1::app_ids(&subdir)? {
        versions.insert(app_id, 1);
    }
    for app_id in crate::v2::app_ids(&subdir)? {
        versions.insert(app_id, 2);
    }

    let apps = versions
        .into_iter()
        .map(|(app_id, version)| {
            let last_active_key = Value::String(format!("last-active-{app_id}")).to_string();
            let last_active = info_map
                .get(&last_active_key)
                .and_then(|entry| entry.value.as_str())
                .map(str::to_string);
            AppData {
                app_id,
                last_active,
                version,
            }
        })
        .collect();
    Ok((global_info.version, apps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use decsync_fs::MemFileStore;
    use serde_json::json;

    fn store() -> Arc<dyn FileStore> {
        Arc::new(MemFileStore::new())
    }

    fn instance(store: &Arc<dyn FileStore>, app_id: &str) -> Decsync<Vec<(Vec<String>, Entry)>> {
        Decsync::with_store(Arc::clone(store), "rss", None, app_id).unwrap()
    }

    fn recording_listener(
        decsync: &mut Decsync<Vec<(Vec<String>, Entry)>>,
    ) {
        decsync.add_listener(vec![], |path, entry, extra| {
            if let Extra::WithExtra(log) = extra {
                log.push((path.to_vec(), entry.clone()));
            }
            true
        });
    }

    #[test]
    fn construction_creates_info_and_local_state() {
        let store = store();
        let decsync = instance(&store, "app-1");
        assert_eq!(decsync.version(), 1);
        assert_eq!(decsync.own_app_id(), "app-1");

        // A second construction reads the committed version back.
        let again = instance(&store, "app-1");
        assert_eq!(again.version(), 1);
    }

    #[test]
    fn advertised_version_two_selects_v2() {
        let store = store();
        let root = store_root(&store);
        root.hidden_child("decsync-info")
            .write_text(r#"{"version":2}"#)
            .unwrap();
        let decsync = instance(&store, "app-1");
        assert_eq!(decsync.version(), 2);
    }

    #[test]
    fn own_snapshot_evidence_beats_advertised_version() {
        let store = store();
        let v1 = instance(&store, "app-1");
        assert_eq!(v1.version(), 1);
        v1.set_entry(&["p".to_string()], json!("k"), json!("v")).unwrap();
        drop(v1);

        // The directory now advertises version 2. Reconstructing app-1
        // without its local commitment must still pick V1: the own
        // snapshot exists and no v2 tree does.
        store_root(&store)
            .hidden_child("decsync-info")
            .write_text(r#"{"version":2}"#)
            .unwrap();
        store_root(&store)
            .child("rss")
            .child("local")
            .child("app-1")
            .child("info")
            .write_lines::<[&str; 0], &str>([], false)
            .unwrap();
        let rebuilt = Decsync::<()>::with_store(Arc::clone(&store), "rss", None, "app-1").unwrap();
        assert_eq!(rebuilt.version(), 1);

        // A brand-new application has no own V1 snapshot and follows the
        // advertised version instead.
        let fresh = Decsync::<()>::with_store(Arc::clone(&store), "rss", None, "app-2").unwrap();
        assert_eq!(fresh.version(), 2);
    }

    #[test]
    fn listener_matching_strips_subpath_on_v1() {
        let store = store();
        let writer = instance(&store, "app-1");
        writer
            .set_entry(
                &["feeds".to_string(), "names".to_string()],
                json!("url"),
                json!("name"),
            )
            .unwrap();

        let mut reader: Decsync<Vec<Vec<String>>> =
            Decsync::with_store(Arc::clone(&store), "rss", None, "app-2").unwrap();
        reader.add_listener(vec!["feeds".to_string()], |path, _, extra| {
            if let Extra::WithExtra(log) = extra {
                log.push(path.to_vec());
            }
            true
        });
        let mut seen = Vec::new();
        reader.execute_all_new_entries(&mut seen, true).unwrap();
        assert_eq!(seen, vec![vec!["names".to_string()]]);
    }

    #[test]
    fn first_matching_listener_wins() {
        let store = store();
        let writer = instance(&store, "app-1");
        writer
            .set_entry(&["feeds".to_string()], json!("k"), json!("v"))
            .unwrap();

        let mut reader: Decsync<Vec<&'static str>> =
            Decsync::with_store(Arc::clone(&store), "rss", None, "app-2").unwrap();
        reader.add_listener(vec!["feeds".to_string()], |_, _, extra| {
            if let Extra::WithExtra(log) = extra {
                log.push("specific");
            }
            true
        });
        reader.add_listener(vec![], |_, _, extra| {
            if let Extra::WithExtra(log) = extra {
                log.push("catch-all");
            }
            true
        });
        let mut seen = Vec::new();
        reader.execute_all_new_entries(&mut seen, true).unwrap();
        assert_eq!(seen, vec!["specific"]);
    }

    #[test]
    fn maintenance_entries_are_hidden_from_listeners() {
        let store = store();
        let mut writer = instance(&store, "app-1");
        let mut sink = Vec::new();
        // Maintenance publishes last-active and supported-version.
        writer.execute_all_new_entries(&mut sink, false).unwrap();

        let mut reader = instance(&store, "app-2");
        recording_listener(&mut reader);
        let mut seen = Vec::new();
        reader.execute_all_new_entries(&mut seen, true).unwrap();
        assert!(seen.is_empty());

        // The entries are there for discovery purposes.
        let info = get_static_info_in(&store, "rss", None).unwrap();
        assert!(info.contains_key(&JsonKey(json!("last-active-app-1"))));
        assert!(info.contains_key(&JsonKey(json!("supported-version-app-1"))));
    }

    #[test]
    fn active_apps_reflect_maintenance() {
        let store = store();
        let mut writer = instance(&store, "app-1");
        let mut sink = Vec::new();
        writer.execute_all_new_entries(&mut sink, false).unwrap();

        let (version, apps) = get_active_apps_in(&store, "rss", None).unwrap();
        assert_eq!(version, 1);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].app_id, "app-1");
        assert_eq!(apps[0].version, 1);
        assert_eq!(apps[0].last_active.as_deref(), Some(&*current_date()));
    }

    #[test]
    fn no_listener_still_advances() {
        let store = store();
        let writer = instance(&store, "app-1");
        writer
            .set_entry(&["p".to_string()], json!("k"), json!("v"))
            .unwrap();

        let mut reader = instance(&store, "app-2");
        let mut seen = Vec::new();
        // No listener registered at all: the pass completes and the
        // update is considered handled.
        reader.execute_all_new_entries(&mut seen, true).unwrap();

        recording_listener(&mut reader);
        reader.execute_all_new_entries(&mut seen, true).unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn init_replays_with_no_extra_marker() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let store = store();
        let writer = instance(&store, "app-1");
        writer
            .set_entry(&["p".to_string()], json!("k"), json!("v"))
            .unwrap();

        let mut fresh: Decsync<Vec<(Vec<String>, Entry)>> =
            Decsync::with_store(Arc::clone(&store), "rss", None, "app-2").unwrap();
        let replayed = Rc::new(RefCell::new(Vec::new()));
        let replay_log = Rc::clone(&replayed);
        fresh.add_listener(vec![], move |path, entry, extra| {
            replay_log
                .borrow_mut()
                .push((matches!(extra, Extra::NoExtra), path.to_vec(), entry.clone()));
            true
        });

        fresh.init_stored_entries().unwrap();
        {
            let log = replayed.borrow();
            assert_eq!(log.len(), 1);
            let (no_extra, path, entry) = &log[0];
            assert!(*no_extra, "init replay must carry the NoExtra marker");
            assert_eq!(path, &vec!["p".to_string()]);
            assert_eq!(entry.value, json!("v"));
        }

        // The adopted snapshot is executable afterwards, now live.
        let mut seen = Vec::new();
        fresh
            .execute_stored_entry(&["p".to_string()], json!("k"), &mut seen)
            .unwrap();
        let log = replayed.borrow();
        assert_eq!(log.len(), 2);
        assert!(!log[1].0, "stored execution is a live delivery");
    }
}
