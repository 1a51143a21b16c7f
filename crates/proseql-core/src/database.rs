//! The `Database` façade: the single owning handle a
//! caller constructs once, exposing a [`CollectionHandle`] per registered
//! collection plus `$transaction`.
//!
//! `Database` is a thin `Arc` newtype: every clone shares the same
//! collection state, change bus, and persistence trigger, so a cloned
//! handle always talks to the same live state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use proseql_storage::{CodecRegistry, StorageAdapter, WatchEvent, WatchHandle as FileWatchHandle};

use crate::collection::{CollectionState, SharedState};
use crate::config::{CollectionConfig, DatabaseConfig};
use crate::cursor::{CursorConfig, Page};
use crate::error::{Error, Result};
use crate::migration;
use crate::mutation;
use crate::observability::{self, CollectionSpan};
use crate::persistence::{PersistenceTrigger, SnapshotFn};
use crate::plugin::{Plugin, PluginRegistry};
use crate::query::{self, CursorQuery, Query};
use crate::reactive::{watch_by_id, watch_query, ChangeBus, ChangeEvent, ChangeKind, WatchHandle};
use crate::relationship::{self, DeletePolicy};
use crate::transaction::{run_transaction, TransactionHost, TransactionLock};
use crate::value::Record;
use crate::workspace::{CollectionSource, Workspace};

const VERSION_KEY: &str = "_version";
const RECORDS_KEY: &str = "records";

struct DatabaseInner {
    collections: HashMap<String, Arc<CollectionConfig>>,
    states: HashMap<String, SharedState>,
    storage: Arc<dyn StorageAdapter>,
    codecs: Arc<CodecRegistry>,
    bus: ChangeBus,
    persistence: Arc<PersistenceTrigger>,
    plugins: PluginRegistry,
    lock: TransactionLock,
    batch_limit: usize,
    default_page_limit: usize,
}

/// The top-level ProseQL handle.
#[derive(Clone)]
pub struct Database(Arc<DatabaseInner>);

fn empty_state(config: &CollectionConfig) -> CollectionState {
    CollectionState::from_records(config.indexes.clone(), config.search_index.clone(), Vec::new(), HashMap::new())
}

/// Read a file-backed collection's persisted snapshot and bring it forward
/// to its configured schema version. A collection with no
/// `file`, or whose file does not yet exist, starts empty.
async fn load_collection(storage: &dyn StorageAdapter, codecs: &CodecRegistry, config: &CollectionConfig) -> Result<CollectionState> {
    let Some(file) = &config.file else { return Ok(empty_state(config)) };
    if !storage.exists(file).await? {
        return Ok(empty_state(config));
    }

    let extension = file.extension().and_then(|e| e.to_str()).unwrap_or("json").to_string();
    let bytes = storage.read(file).await?;
    let decoded = codecs.deserialize(&bytes, &extension)?;

    let target_version = config.version.unwrap_or(0);
    let stored_version = decoded.get(VERSION_KEY).and_then(Value::as_u64).map(|v| v as u32).unwrap_or(0);
    let records_value = decoded.get(RECORDS_KEY).cloned().unwrap_or_else(|| Value::Object(Map::new()));
    let records_obj = records_value
        .as_object()
        .cloned()
        .ok_or_else(|| Error::Serialization(format!("{}: persisted '{RECORDS_KEY}' must be an object", config.name)))?;

    let order: Vec<String> = records_obj.keys().cloned().collect();
    let drafts: Vec<Record> = records_obj
        .into_iter()
        .filter_map(|(_, value)| value.as_object().cloned())
        .collect();
    let migrated = migration::apply_migrations(drafts, &config.migrations, stored_version, target_version)?;
    let records: HashMap<String, Record> = order.iter().cloned().zip(migrated).collect();

    Ok(CollectionState::from_records(config.indexes.clone(), config.search_index.clone(), order, records))
}

fn collection_snapshot_value(state: &CollectionState, version: u32) -> Value {
    let mut records = Map::new();
    for (id, record) in state.iter_in_order_with_ids() {
        records.insert(id.to_string(), Value::Object(record.clone()));
    }
    json!({ VERSION_KEY: version, RECORDS_KEY: Value::Object(records) })
}

impl Database {
    /// Open a database: load every file-backed collection's persisted
    /// snapshot, migrate it forward if needed, build in-memory indexes,
    /// register `plugins`, and start a background file watcher per
    /// file-backed collection.
    pub async fn open(config: DatabaseConfig, storage: Arc<dyn StorageAdapter>, plugins: Vec<Plugin>) -> Result<Self> {
        let mut codecs = CodecRegistry::with_builtins();
        let mut plugin_registry = PluginRegistry::new();
        for plugin in plugins {
            plugin_registry.register(plugin, &mut codecs)?;
        }
        let codecs = Arc::new(codecs);

        let mut collections = HashMap::new();
        let mut states = HashMap::new();
        for (name, collection_config) in &config.collections {
            let state = load_collection(storage.as_ref(), &codecs, collection_config).await?;
            collections.insert(name.clone(), Arc::new(collection_config.clone()));
            states.insert(name.clone(), SharedState::new(state));
        }

        let persistence = Arc::new(PersistenceTrigger::new(storage.clone(), codecs.clone(), config.persistence_debounce));

        let inner = Arc::new(DatabaseInner {
            collections,
            states,
            storage,
            codecs,
            bus: ChangeBus::default(),
            persistence,
            plugins: plugin_registry,
            lock: TransactionLock::new(),
            batch_limit: config.batch_limit,
            default_page_limit: config.default_page_limit,
        });

        let db = Database(inner);
        db.start_watchers();
        Ok(db)
    }

    fn start_watchers(&self) {
        for (name, config) in &self.0.collections {
            let Some(file) = config.file.clone() else { continue };
            let handle = match self.0.storage.watch(&file) {
                Ok(handle) => handle,
                Err(err) => {
                    observability::emit_watcher_error(name, &err);
                    continue;
                }
            };
            let db = self.clone();
            let name = name.clone();
            tokio::spawn(async move { db.run_watcher(name, file, handle).await });
        }
    }

    async fn run_watcher(&self, collection: String, file: PathBuf, mut handle: FileWatchHandle) {
        while let Some(event) = handle.recv().await {
            match event {
                WatchEvent::Changed(_) => match self.reload_collection(&collection, &file).await {
                    Ok(()) => observability::emit_watcher_reload(&collection),
                    Err(err) => observability::emit_watcher_error(&collection, &err),
                },
                WatchEvent::Removed(_) => {
                    let reason = "source file removed; keeping last known in-memory state".to_string();
                    observability::emit_watcher_error(&collection, &reason);
                }
            }
        }
    }

    async fn reload_collection(&self, collection: &str, file: &Path) -> Result<()> {
        let config = self
            .0
            .collections
            .get(collection)
            .cloned()
            .ok_or_else(|| Error::validation(format!("unknown collection '{collection}'")))?;
        let next = load_collection(self.0.storage.as_ref(), &self.0.codecs, &config).await?;
        let shared = self.0.states.get(collection).expect("watched collection always has state");
        shared.swap(next);
        self.0.bus.publish(ChangeEvent { collection: collection.to_string(), kind: ChangeKind::Reload, id: None, before: None, after: None });
        Ok(())
    }

    /// A handle scoped to one collection. Fails if `name` was never
    /// registered in this database's config.
    pub fn collection(&self, name: impl Into<String>) -> Result<CollectionHandle<'_>> {
        let name = name.into();
        if !self.0.collections.contains_key(&name) {
            return Err(Error::validation(format!("unknown collection '{name}'")));
        }
        Ok(CollectionHandle { db: self, name })
    }

    pub fn batch_limit(&self) -> usize {
        self.0.batch_limit
    }

    pub fn default_page_limit(&self) -> usize {
        self.0.default_page_limit
    }

    /// Run `f` as one transaction: every collection it
    /// touches commits together, or none do.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Workspace<'_>) -> Result<T>,
    {
        observability::emit_transaction_started();
        let dirty_count = std::cell::Cell::new(0usize);
        let result = run_transaction(self, &self.0.lock, |ws| {
            let outcome = f(ws);
            dirty_count.set(ws.dirty_collections().len());
            outcome
        });
        match &result {
            Ok(_) => observability::emit_transaction_committed(dirty_count.get()),
            Err(err) => observability::emit_transaction_aborted(err),
        }
        result
    }

    /// Cancel pending debounce timers and save every file-backed
    /// collection immediately. Call before process exit.
    pub async fn flush(&self) {
        self.0.persistence.flush().await;
    }
}

impl CollectionSource for Database {
    fn config(&self, collection: &str) -> Option<Arc<CollectionConfig>> {
        self.0.collections.get(collection).cloned()
    }

    fn snapshot(&self, collection: &str) -> Option<Arc<CollectionState>> {
        self.0.states.get(collection).map(SharedState::snapshot)
    }

    fn plugins(&self) -> Option<&PluginRegistry> {
        Some(&self.0.plugins)
    }
}

impl TransactionHost for Database {
    fn commit_collection(&self, collection: &str, next: CollectionState) -> Arc<CollectionState> {
        self.0.states.get(collection).expect("staged collection always has live state").swap(next)
    }

    /// Fan the event out to the change bus and every registered plugin's
    /// global hooks. A `create` on an `appendOnly` file-backed collection
    /// additionally appends the new row immediately, ahead of (and
    /// independent from) the debounced full-state save.
    fn publish_event(&self, event: ChangeEvent) {
        self.0.plugins.notify(&event);

        if event.kind == ChangeKind::Create {
            if let Some(config) = self.0.collections.get(&event.collection) {
                if config.append_only {
                    if let (Some(file), Some(after)) = (config.file.clone(), event.after.clone()) {
                        let persistence = self.0.persistence.clone();
                        tokio::spawn(async move { persistence.append_record(&file, &after).await });
                    }
                }
            }
        }

        self.0.bus.publish(event);
    }

    /// Schedule a debounced full-state save for `collection`, unless it
    /// has no backing file or is append-only (append-only rows are
    /// already durable via `publish_event`'s immediate-append path).
    fn schedule_persistence(&self, collection: &str) {
        let Some(config) = self.0.collections.get(collection).cloned() else { return };
        if config.append_only {
            return;
        }
        let Some(file) = config.file.clone() else { return };
        let extension = file.extension().and_then(|e| e.to_str()).unwrap_or("json").to_string();
        let version = config.version.unwrap_or(0);

        observability::emit_persistence_scheduled(collection);

        let db = self.clone();
        let key = collection.to_string();
        let snapshot: SnapshotFn = Arc::new(move || {
            let state = db.0.states.get(&key).expect("scheduled collection always has live state").snapshot();
            collection_snapshot_value(&state, version)
        });
        self.0.persistence.schedule(collection.to_string(), file, extension, snapshot);
    }
}

/// A per-collection accessor: named methods per collection rather than
/// one generic `query(table, ...)` entrypoint.
pub struct CollectionHandle<'a> {
    db: &'a Database,
    name: String,
}

impl<'a> CollectionHandle<'a> {
    fn log_mutation<T>(&self, operation: &str, result: Result<T>, id_of: impl FnOnce(&T) -> Option<String>) -> Result<T> {
        match result {
            Ok(value) => {
                let id = id_of(&value).unwrap_or_default();
                observability::emit_mutation_committed(&self.name, operation, &id);
                Ok(value)
            }
            Err(err) => {
                observability::emit_mutation_failed(&self.name, operation, &err);
                Err(err)
            }
        }
    }

    pub fn create(&self, input: Value) -> Result<Record> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let result = run_transaction(self.db, &self.db.0.lock, |ws| mutation::create(ws, &name, input));
        self.log_mutation("create", result, |record| record.get("id").and_then(Value::as_str).map(str::to_string))
    }

    pub fn update(&self, id: &str, patch: Value) -> Result<Record> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let id_owned = id.to_string();
        let result = run_transaction(self.db, &self.db.0.lock, |ws| mutation::update(ws, &name, &id_owned, patch));
        self.log_mutation("update", result, |record| record.get("id").and_then(Value::as_str).map(str::to_string))
    }

    pub fn delete(&self, id: &str, soft: bool) -> Result<Record> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let id_owned = id.to_string();
        let result = run_transaction(self.db, &self.db.0.lock, |ws| mutation::delete(ws, &name, &id_owned, soft));
        self.log_mutation("delete", result, |record| record.get("id").and_then(Value::as_str).map(str::to_string))
    }

    pub fn upsert(&self, matcher: Value, create_input: Value, update_patch: Value) -> Result<Record> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let result = run_transaction(self.db, &self.db.0.lock, |ws| mutation::upsert(ws, &name, matcher, create_input, update_patch));
        self.log_mutation("upsert", result, |record| record.get("id").and_then(Value::as_str).map(str::to_string))
    }

    pub fn update_many(&self, filter: &Value, patch: Value) -> Result<Vec<Record>> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let batch_limit = self.db.0.batch_limit;
        let result = run_transaction(self.db, &self.db.0.lock, |ws| mutation::update_many(ws, &name, filter, patch, batch_limit));
        self.log_mutation("update_many", result, |records| Some(records.len().to_string()))
    }

    pub fn create_with_relationships(&self, input: Value) -> Result<Record> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let result = run_transaction(self.db, &self.db.0.lock, |ws| relationship::create_with_relationships(ws, &name, input));
        self.log_mutation("create_with_relationships", result, |record| record.get("id").and_then(Value::as_str).map(str::to_string))
    }

    pub fn update_with_relationships(&self, id: &str, patch: Value) -> Result<Record> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let id_owned = id.to_string();
        let result = run_transaction(self.db, &self.db.0.lock, |ws| relationship::update_with_relationships(ws, &name, &id_owned, patch));
        self.log_mutation("update_with_relationships", result, |record| record.get("id").and_then(Value::as_str).map(str::to_string))
    }

    /// `delete`, but enforcing the given cascade/restrict/set-null policy
    /// per `inverse` edge (plain `delete` always orphans dangling foreign
    /// keys; only this entry point enforces referential integrity).
    pub fn delete_with_relationships(&self, id: &str, soft: bool, policies: HashMap<String, DeletePolicy>) -> Result<Record> {
        let _span = CollectionSpan::enter(&self.name);
        let name = self.name.clone();
        let id_owned = id.to_string();
        let result = run_transaction(self.db, &self.db.0.lock, |ws| relationship::delete_with_relationships(ws, &name, &id_owned, soft, &policies));
        self.log_mutation("delete_with_relationships", result, |record| record.get("id").and_then(Value::as_str).map(str::to_string))
    }

    pub fn find(&self, query: &Query) -> Result<Vec<Value>> {
        let _span = CollectionSpan::enter(&self.name);
        let records = query::find(self.db, &self.name, query)?;
        observability::emit_query_completed(&self.name, records.len(), records.len());
        Ok(records)
    }

    pub fn find_one(&self, filter: Value) -> Result<Option<Value>> {
        let query = Query { filter, limit: Some(1.0), ..Query::default() };
        Ok(self.find(&query)?.into_iter().next())
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        self.find_one(json!({ "id": id }))
    }

    pub fn find_cursor(&self, query: &CursorQuery) -> Result<Page> {
        let _span = CollectionSpan::enter(&self.name);
        let page = query::find_cursor(self.db, &self.name, query)?;
        observability::emit_query_completed(&self.name, page.items.len(), page.items.len());
        Ok(page)
    }

    pub fn aggregate(&self, filter: &Value, field: &str) -> Result<crate::aggregate::Aggregate> {
        query::run_aggregate(self.db, &self.name, filter, field)
    }

    pub fn aggregate_grouped(&self, filter: &Value, group_by: &[String], field: &str) -> Result<Vec<crate::aggregate::GroupedAggregate>> {
        query::run_aggregate_grouped(self.db, &self.name, filter, group_by, field)
    }

    /// Subscribe to a live query: emits `initial` results now,
    /// then a recomputed result set on every subsequent create/update/
    /// delete/reload touching this collection.
    pub fn watch(&self, query: Query, debounce: Option<Duration>) -> Result<WatchHandle<Vec<Value>>> {
        let initial = query::find(self.db, &self.name, &query)?;
        let db = self.db.clone();
        let collection = self.name.clone();
        Ok(watch_query(&self.db.0.bus, collection.clone(), debounce, initial, move || {
            let db = db.clone();
            let collection = collection.clone();
            let query = query.clone();
            async move { query::find(&db, &collection, &query).unwrap_or_default() }
        }))
    }

    /// `watchById`: emits the entity (or `None`) now, then on
    /// every event touching that id.
    pub fn watch_by_id(&self, id: impl Into<String>) -> Result<WatchHandle<Option<Value>>> {
        let id = id.into();
        let initial = self.find_by_id(&id)?;
        let db = self.db.clone();
        let collection = self.name.clone();
        let lookup_id = id.clone();
        Ok(watch_by_id(&self.db.0.bus, collection.clone(), id, initial, move || {
            let db = db.clone();
            let collection = collection.clone();
            let lookup_id = lookup_id.clone();
            async move { query::find(&db, &collection, &Query { filter: json!({"id": lookup_id}), ..Query::default() }).ok().and_then(|mut v| v.pop()) }
        }))
    }
}
