//! Per-collection state: an atomically-replaceable id→record mapping with
//! insertion order retained for deterministic first-encounter groupings
//!, plus its derived indexes.
//!
//! Mutations never edit the mapping in place; they build a new
//! [`CollectionState`] and swap the `Arc` under a brief, non-suspending
//! lock, so readers that captured a snapshot never observe a partial
//! write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::indexes::CollectionIndexes;
use crate::value::Record;

/// An immutable, shareable view of one collection's rows and indexes at a
/// point in time.
#[derive(Clone)]
pub struct CollectionState {
    pub records: HashMap<String, Record>,
    pub order: Vec<String>,
    pub indexes: CollectionIndexes,
    equality_paths: Vec<String>,
    search_paths: Vec<String>,
}

impl CollectionState {
    pub fn empty() -> Self {
        CollectionState {
            records: HashMap::new(),
            order: Vec::new(),
            indexes: CollectionIndexes::default(),
            equality_paths: Vec::new(),
            search_paths: Vec::new(),
        }
    }

    /// Build a state with its equality/search indexes constructed from
    /// `records` according to the collection's configured index paths
    ///. Used at collection
    /// construction and after a migration/reload replaces the mapping.
    pub fn from_records(
        equality_paths: Vec<String>,
        search_paths: Vec<String>,
        order: Vec<String>,
        records: HashMap<String, Record>,
    ) -> Self {
        let as_values: Vec<(String, Value)> = order
            .iter()
            .filter_map(|id| records.get(id).map(|r| (id.clone(), Value::Object(r.clone()))))
            .collect();
        let refs = as_values.iter().map(|(id, v)| (id.as_str(), v));
        let indexes = CollectionIndexes::build(&equality_paths, &search_paths, refs);
        CollectionState { records, order, indexes, equality_paths, search_paths }
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn iter_in_order(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(move |id| self.records.get(id))
    }

    pub fn iter_in_order_with_ids(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.order.iter().filter_map(move |id| self.records.get(id).map(|r| (id.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn equality_paths(&self) -> &[String] {
        &self.equality_paths
    }

    pub fn search_paths(&self) -> &[String] {
        &self.search_paths
    }

    /// Build a new state with `id` inserted (or replacing an existing
    /// row) and its indexes updated incrementally.
    pub fn with_upserted(&self, id: String, record: Record) -> Self {
        let mut next = self.clone();
        let as_value = Value::Object(record.clone());
        if let Some(existing) = next.records.get(&id) {
            next.indexes.on_update(&id, &Value::Object(existing.clone()), &as_value);
        } else {
            next.indexes.on_create(&id, &as_value);
            next.order.push(id.clone());
        }
        next.records.insert(id, record);
        next
    }

    /// Build a new state with `id` removed and its indexes updated
    /// incrementally.
    pub fn with_removed(&self, id: &str) -> Self {
        let mut next = self.clone();
        if let Some(record) = next.records.remove(id) {
            next.indexes.on_delete(id, &Value::Object(record));
            next.order.retain(|existing| existing != id);
        }
        next
    }
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::empty()
    }
}

/// Thread-safe holder for one collection's current `Arc<CollectionState>`,
/// swapped synchronously and indivisibly on every mutation.
pub struct SharedState {
    current: Mutex<Arc<CollectionState>>,
}

impl SharedState {
    pub fn new(state: CollectionState) -> Self {
        SharedState { current: Mutex::new(Arc::new(state)) }
    }

    /// Capture the current mapping reference. A reader holds this for the
    /// duration of its pipeline and never re-reads.
    pub fn snapshot(&self) -> Arc<CollectionState> {
        self.current.lock().expect("collection state mutex poisoned").clone()
    }

    /// Replace the live mapping. Synchronous and indivisible: no `.await`
    /// may occur while the lock is held.
    pub fn swap(&self, next: CollectionState) -> Arc<CollectionState> {
        let next = Arc::new(next);
        let mut guard = self.current.lock().expect("collection state mutex poisoned");
        *guard = next.clone();
        next
    }
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState::new(CollectionState::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn upsert_then_remove_updates_order_and_len() {
        let state = CollectionState::empty();
        let state = state.with_upserted("1".into(), rec(json!({"id": "1"})));
        let state = state.with_upserted("2".into(), rec(json!({"id": "2"})));
        assert_eq!(state.order, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(state.len(), 2);

        let state = state.with_removed("1");
        assert_eq!(state.order, vec!["2".to_string()]);
        assert!(state.get("1").is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_a_later_swap() {
        let shared = SharedState::new(CollectionState::empty());
        let before = shared.snapshot();
        let next = before.with_upserted("1".into(), rec(json!({"id": "1"})));
        shared.swap(next);
        assert!(before.is_empty());
        assert_eq!(shared.snapshot().len(), 1);
    }
}
