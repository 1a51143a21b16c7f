//! Transaction coordinator: `$transaction(f)` runs a closure
//! against a shadow copy of every collection it touches, committing the
//! whole batch atomically on success or discarding it whole on failure.
//!
//! The shadow is the same [`Workspace`] the plain mutation kernel stages
//! against — a transaction body is just a sequence of ordinary
//! `mutation`/`relationship` calls sharing one workspace, so nothing here
//! duplicates the staging logic; this module only adds the single-writer
//! lock and the all-or-nothing commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::collection::CollectionState;
use crate::error::{Error, Result};
use crate::reactive::ChangeEvent;
use crate::workspace::{CollectionSource, Workspace};

/// A process-local, single-writer lock. A second
/// `$transaction` call while one is in flight fails immediately rather
/// than queuing, failing fast with an already-in-transaction error.
#[derive(Default)]
pub struct TransactionLock {
    busy: AtomicBool,
}

impl TransactionLock {
    pub fn new() -> Self {
        TransactionLock { busy: AtomicBool::new(false) }
    }

    fn acquire(&self) -> Result<()> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::Transaction { operation: "transaction".to_string(), reason: "already-in-transaction".to_string() })
    }

    fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Callback surface a transaction commit needs from its host `Database`:
/// swap a collection's live state, publish an event, and schedule
/// persistence for a now-dirty collection. Kept separate from
/// `CollectionSource` (read-only) so the workspace's staged reads never
/// accidentally reach the commit path before the transaction succeeds.
pub trait TransactionHost: CollectionSource {
    fn commit_collection(&self, collection: &str, next: CollectionState) -> Arc<CollectionState>;
    fn publish_event(&self, event: ChangeEvent);
    fn schedule_persistence(&self, collection: &str);
}

/// Run `f` against a shadow workspace under the single-writer lock (spec
/// §4.10). `f` is synchronous, matching every other entry point in the
/// mutation kernel it's built from — nothing here prevents a caller from
/// calling out to `.await`able code around this call, but the commit
/// itself never suspends.
///
/// `Workspace` exposes no `watch`/`watchById` method, so a transaction
/// body cannot open a live subscription through its handle — that failure
/// is structural (a compile error for a body that tries), not a runtime
/// check, giving a deterministic failure rather than a stale read.
pub fn run_transaction<H, F, T>(host: &H, lock: &TransactionLock, f: F) -> Result<T>
where
    H: TransactionHost,
    F: FnOnce(&Workspace<'_>) -> Result<T>,
{
    lock.acquire()?;
    let workspace = Workspace::new(host);
    let outcome = f(&workspace);
    let (staged, events) = workspace.into_parts();

    match outcome {
        Err(err) => {
            lock.release();
            Err(err)
        }
        Ok(value) => {
            // Swap every touched collection before publishing any event, so
            // a subscriber that recomputes on the first event already sees
            // every other collection the transaction touched.
            for (collection, next) in &staged {
                host.commit_collection(collection, next.clone());
            }
            for event in events {
                host.publish_event(event);
            }
            for collection in staged.keys() {
                host.schedule_persistence(collection);
            }
            lock.release();
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use crate::mutation;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct TestHost {
        configs: HashMap<String, Arc<CollectionConfig>>,
        states: Mutex<HashMap<String, Arc<CollectionState>>>,
        events: Mutex<Vec<ChangeEvent>>,
        scheduled: Mutex<Vec<String>>,
    }

    impl TestHost {
        fn new(configs: Vec<CollectionConfig>) -> Self {
            let mut configs_map = HashMap::new();
            let mut states = HashMap::new();
            for config in configs {
                states.insert(config.name.clone(), Arc::new(CollectionState::empty()));
                configs_map.insert(config.name.clone(), Arc::new(config));
            }
            TestHost { configs: configs_map, states: Mutex::new(states), events: Mutex::new(Vec::new()), scheduled: Mutex::new(Vec::new()) }
        }
    }

    impl CollectionSource for TestHost {
        fn config(&self, collection: &str) -> Option<Arc<CollectionConfig>> {
            self.configs.get(collection).cloned()
        }
        fn snapshot(&self, collection: &str) -> Option<Arc<CollectionState>> {
            self.states.lock().unwrap().get(collection).cloned()
        }
    }

    impl TransactionHost for TestHost {
        fn commit_collection(&self, collection: &str, next: CollectionState) -> Arc<CollectionState> {
            let next = Arc::new(next);
            self.states.lock().unwrap().insert(collection.to_string(), next.clone());
            next
        }
        fn publish_event(&self, event: ChangeEvent) {
            self.events.lock().unwrap().push(event);
        }
        fn schedule_persistence(&self, collection: &str) {
            self.scheduled.lock().unwrap().push(collection.to_string());
        }
    }

    #[test]
    fn successful_transaction_commits_every_touched_collection() {
        let host = TestHost::new(vec![CollectionConfig::builder("a").build(), CollectionConfig::builder("b").build()]);
        let lock = TransactionLock::new();
        run_transaction(&host, &lock, |ws| {
            mutation::create(ws, "a", json!({"id": "1"}))?;
            mutation::create(ws, "b", json!({"id": "1"}))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(host.states.lock().unwrap()["a"].len(), 1);
        assert_eq!(host.states.lock().unwrap()["b"].len(), 1);
        assert_eq!(host.events.lock().unwrap().len(), 2);
        assert_eq!(host.scheduled.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_transaction_commits_nothing() {
        let host = TestHost::new(vec![CollectionConfig::builder("a").build()]);
        let lock = TransactionLock::new();
        let err = run_transaction(&host, &lock, |ws| {
            mutation::create(ws, "a", json!({"id": "1"}))?;
            Err(Error::validation("deliberate failure"))
        })
        .unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(host.states.lock().unwrap()["a"].len(), 0);
        assert!(host.events.lock().unwrap().is_empty());
        assert!(host.scheduled.lock().unwrap().is_empty());
    }

    #[test]
    fn lock_is_released_after_commit_so_a_second_transaction_can_run() {
        let host = TestHost::new(vec![CollectionConfig::builder("a").build()]);
        let lock = TransactionLock::new();
        run_transaction(&host, &lock, |ws| mutation::create(ws, "a", json!({"id": "1"})).map(|_| ())).unwrap();
        run_transaction(&host, &lock, |ws| mutation::create(ws, "a", json!({"id": "2"})).map(|_| ())).unwrap();
        assert_eq!(host.states.lock().unwrap()["a"].len(), 2);
    }

    #[test]
    fn concurrent_acquire_is_rejected_as_already_in_transaction() {
        let lock = TransactionLock::new();
        lock.acquire().unwrap();
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, Error::Transaction { .. }));
    }
}
