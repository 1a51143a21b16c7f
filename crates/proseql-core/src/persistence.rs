//! Persistence trigger: a per-collection debounced save of
//! the canonical snapshot, an append-only JSONL fast path, and
//! flush/shutdown finalization. Failures during a scheduled save are
//! logged and swallowed — the in-memory state remains authoritative.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use proseql_storage::{CodecRegistry, StorageAdapter};

pub type SnapshotFn = Arc<dyn Fn() -> Value + Send + Sync>;

struct Source {
    file: PathBuf,
    extension: String,
    snapshot: SnapshotFn,
}

/// Per-database debouncer holding one timer per collection key (spec
/// §4.12). The host runtime's own timer facility (`tokio::time::sleep`)
/// carries the debounce so it survives task boundaries
/// design note (§9) without a bespoke scheduler.
pub struct PersistenceTrigger {
    storage: Arc<dyn StorageAdapter>,
    codecs: Arc<CodecRegistry>,
    debounce: Duration,
    sources: Arc<Mutex<HashMap<String, Source>>>,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl PersistenceTrigger {
    pub fn new(storage: Arc<dyn StorageAdapter>, codecs: Arc<CodecRegistry>, debounce: Duration) -> Self {
        PersistenceTrigger {
            storage,
            codecs,
            debounce,
            sources: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reset `key`'s debounce timer. The save effect reads the snapshot
    /// lazily — only when the timer actually fires — via `snapshot`.
    pub fn schedule(&self, key: impl Into<String>, file: PathBuf, extension: impl Into<String>, snapshot: SnapshotFn) {
        let key = key.into();
        self.sources
            .lock()
            .expect("persistence sources mutex poisoned")
            .insert(key.clone(), Source { file, extension: extension.into(), snapshot });

        if let Some(previous) = self.pending.lock().expect("persistence pending mutex poisoned").remove(&key) {
            previous.abort();
        }

        let storage = self.storage.clone();
        let codecs = self.codecs.clone();
        let sources = self.sources.clone();
        let debounce = self.debounce;
        let key_for_task = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            save_key(&storage, &codecs, &sources, &key_for_task).await;
        });
        self.pending.lock().expect("persistence pending mutex poisoned").insert(key, handle);
    }

    /// Append-only fast path: `create` on an `appendOnly`
    /// collection writes one serialized record immediately rather than
    /// waiting on the debounce.
    pub async fn append_record(&self, file: &std::path::Path, record: &Value) {
        let mut bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %file.display(), error = %err, "append-only serialization failed");
                return;
            }
        };
        bytes.push(b'\n');
        if let Err(err) = self.storage.append(file, &bytes).await {
            tracing::warn!(path = %file.display(), error = %err, "append-only write failed");
        }
    }

    /// Cancel every pending timer and save every registered collection
    /// immediately, awaiting completion.
    pub async fn flush(&self) {
        let keys: Vec<String> = self.sources.lock().expect("persistence sources mutex poisoned").keys().cloned().collect();
        for key in &keys {
            if let Some(handle) = self.pending.lock().expect("persistence pending mutex poisoned").remove(key) {
                handle.abort();
            }
        }
        for key in keys {
            save_key(&self.storage, &self.codecs, &self.sources, &key).await;
        }
    }

    /// Cancel every pending timer without saving.
    pub fn shutdown(&self) {
        let mut pending = self.pending.lock().expect("persistence pending mutex poisoned");
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}

async fn save_key(
    storage: &Arc<dyn StorageAdapter>,
    codecs: &Arc<CodecRegistry>,
    sources: &Arc<Mutex<HashMap<String, Source>>>,
    key: &str,
) {
    let Some((file, extension, value)) = ({
        let guard = sources.lock().expect("persistence sources mutex poisoned");
        guard.get(key).map(|source| (source.file.clone(), source.extension.clone(), (source.snapshot)()))
    }) else {
        return;
    };
    let bytes = match codecs.serialize(&value, &extension) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(collection = %key, error = %err, "persistence serialization failed");
            return;
        }
    };
    if let Err(err) = storage.write(&file, &bytes).await {
        tracing::warn!(collection = %key, path = %file.display(), error = %err, "persistence save failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proseql_storage::MemoryStorageAdapter;
    use serde_json::json;
    use std::path::Path;

    #[tokio::test]
    async fn schedule_then_flush_writes_the_latest_snapshot() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::default());
        let codecs = Arc::new(CodecRegistry::with_builtins());
        let trigger = PersistenceTrigger::new(storage.clone(), codecs, Duration::from_millis(50));

        let value = Arc::new(Mutex::new(json!({"1": {"id": "1"}})));
        let value_clone = value.clone();
        trigger.schedule(
            "users",
            PathBuf::from("users.json"),
            "json",
            Arc::new(move || value_clone.lock().unwrap().clone()),
        );
        *value.lock().unwrap() = json!({"1": {"id": "1"}, "2": {"id": "2"}});
        trigger.flush().await;

        let bytes = storage.read(Path::new("users.json")).await.unwrap();
        let stored: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stored, json!({"1": {"id": "1"}, "2": {"id": "2"}}));
    }

    #[tokio::test]
    async fn append_record_appends_one_json_line() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::default());
        let codecs = Arc::new(CodecRegistry::with_builtins());
        let trigger = PersistenceTrigger::new(storage.clone(), codecs, Duration::from_millis(50));

        trigger.append_record(Path::new("events.jsonl"), &json!({"id": "1"})).await;
        trigger.append_record(Path::new("events.jsonl"), &json!({"id": "2"})).await;

        let bytes = storage.read(Path::new("events.jsonl")).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_save() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::default());
        let codecs = Arc::new(CodecRegistry::with_builtins());
        let trigger = PersistenceTrigger::new(storage.clone(), codecs, Duration::from_secs(5));
        trigger.schedule("users", PathBuf::from("users.json"), "json", Arc::new(|| json!({})));
        trigger.shutdown();
        assert!(!storage.exists(Path::new("users.json")).await.unwrap());
    }
}
