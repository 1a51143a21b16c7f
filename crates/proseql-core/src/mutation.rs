//! The mutation kernel: `create`, `update`, `delete`,
//! `upsert`, and the batch `update_many`. Every function stages its
//! result onto a [`Workspace`] rather than committing directly, so the
//! caller (an ordinary single mutation, a batch, or a `$transaction`
//! body) controls when the swap into live state actually happens.

use chrono::Utc;
use serde_json::Value;

use crate::config::CollectionConfig;
use crate::error::{Error, Result};
use crate::filter::matches_value;
use crate::reactive::{ChangeEvent, ChangeKind};
use crate::value::{get_path, set_path, Record};
use crate::workspace::Workspace;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn validate(config: &CollectionConfig, draft: &Record) -> Result<Record> {
    match &config.schema {
        Some(validator) => validator
            .validate(draft)
            .map_err(|issues| Error::validation_with_issues("schema validation failed", issues)),
        None => Ok(draft.clone()),
    }
}

/// Every declared `ref` edge must either be null or point at an existing
/// row in its target collection.
fn check_foreign_keys(workspace: &Workspace<'_>, config: &CollectionConfig, record: &Record) -> Result<()> {
    for rel in config.relationships.values() {
        if rel.kind != crate::config::RelationshipKind::Ref {
            continue;
        }
        let Some(fk_value) = record.get(&rel.foreign_key) else { continue };
        if fk_value.is_null() {
            continue;
        }
        let Some(fk) = fk_value.as_str() else {
            return Err(Error::validation(format!("'{}' must be a string id", rel.foreign_key)));
        };
        let target_state = workspace.state(&rel.target)?;
        if target_state.get(fk).is_none() {
            return Err(Error::ForeignKey {
                collection: config.name.clone(),
                field: rel.foreign_key.clone(),
                value: fk.to_string(),
                target_collection: rel.target.clone(),
            });
        }
    }
    Ok(())
}

/// Every declared unique constraint must hold across the collection,
/// excluding `exclude_id` (the row being updated, if any).
fn check_unique(
    state: &crate::collection::CollectionState,
    config: &CollectionConfig,
    record: &Record,
    exclude_id: Option<&str>,
) -> Result<()> {
    for constraint in &config.unique_fields {
        let key: Vec<Option<&Value>> = constraint.fields.iter().map(|f| record.get(f)).collect();
        if key.iter().any(|v| v.is_none() || v.map(Value::is_null).unwrap_or(true)) {
            continue;
        }
        for (id, existing) in state.records.iter() {
            if Some(id.as_str()) == exclude_id {
                continue;
            }
            let existing_key: Vec<Option<&Value>> = constraint.fields.iter().map(|f| existing.get(f)).collect();
            if existing_key == key {
                return Err(Error::UniqueConstraint {
                    collection: config.name.clone(),
                    constraint: constraint.name.clone(),
                    fields: constraint.fields.clone(),
                    values: key.into_iter().map(|v| v.cloned().unwrap_or(Value::Null)).collect(),
                    existing_id: id.clone(),
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn is_soft_deleted(record: &Record) -> bool {
    record.get("deletedAt").map(|v| !v.is_null()).unwrap_or(false)
}

/// Insert a new row: run `beforeCreate`, default `createdAt`/`updatedAt`
/// when absent, validate, assign an id if absent, check uniqueness and
/// foreign keys, stage the insert, then run `afterCreate`.
pub fn create(workspace: &Workspace<'_>, collection: &str, input: Value) -> Result<Record> {
    let config = workspace.config(collection)?;
    let mut draft = input
        .as_object()
        .cloned()
        .ok_or_else(|| Error::validation("create input must be an object"))?;

    if let Some(hook) = &config.hooks.before_create {
        hook(&mut draft).map_err(|cause| Error::Hook { phase: "beforeCreate".to_string(), cause })?;
    }

    if !draft.contains_key("createdAt") {
        draft.insert("createdAt".to_string(), Value::String(now_iso()));
    }
    if !draft.contains_key("updatedAt") {
        draft.insert("updatedAt".to_string(), Value::String(now_iso()));
    }

    let record = validate(&config, &draft)?;
    let mut record = record;
    let id = match record.get("id").and_then(Value::as_str) {
        Some(existing) => existing.to_string(),
        None => {
            let generated = config.generate_id(workspace.plugins());
            record.insert("id".to_string(), Value::String(generated.clone()));
            generated
        }
    };

    let state = workspace.state(collection)?;
    if state.get(&id).is_some() {
        return Err(Error::DuplicateKey {
            collection: collection.to_string(),
            field: "id".to_string(),
            value: id.clone(),
            existing_id: id,
        });
    }
    check_unique(&state, &config, &record, None)?;
    check_foreign_keys(workspace, &config, &record)?;

    let next = state.with_upserted(id.clone(), record.clone());
    workspace.stage(
        collection,
        next,
        ChangeEvent { collection: collection.to_string(), kind: ChangeKind::Create, id: Some(id.clone()), before: None, after: Some(Value::Object(record.clone())) },
    );

    if let Some(hook) = &config.hooks.after_create {
        hook(&record);
    }

    Ok(record)
}

/// One `update` operator clause, applied to the draft record in place.
fn apply_operators(record: &mut Record, ops: &serde_json::Map<String, Value>, plugins: Option<&crate::plugin::PluginRegistry>) -> Result<()> {
    for (op, payload) in ops {
        let entries = payload
            .as_object()
            .ok_or_else(|| Error::validation(format!("'{op}' expects an object of field -> value")))?;
        for (path, value) in entries {
            eval_update_operator(record, op, path, value, plugins)?;
        }
    }
    Ok(())
}

fn numeric_op(record: &mut Record, path: &str, delta: f64, op_name: &str) -> Result<()> {
    let current = get_path(record, path).cloned().unwrap_or(Value::Null);
    let base = match &current {
        Value::Null => 0.0,
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => return Err(Error::validation(format!("'{path}' is not numeric, cannot apply {op_name}"))),
    };
    let next = base + delta;
    set_path(record, path, serde_json::Number::from_f64(next).map(Value::Number).unwrap_or(Value::Null));
    Ok(())
}

fn array_op(record: &mut Record, path: &str, value: &Value, prepend: bool) -> Result<()> {
    let current = get_path(record, path).cloned().unwrap_or(Value::Null);
    let mut array = match current {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        _ => return Err(Error::validation(format!("'{path}' is not an array"))),
    };
    if prepend {
        array.insert(0, value.clone());
    } else {
        array.push(value.clone());
    }
    set_path(record, path, Value::Array(array));
    Ok(())
}

fn remove_op(record: &mut Record, path: &str, predicate: &Value, plugins: Option<&crate::plugin::PluginRegistry>) -> Result<()> {
    let current = get_path(record, path).cloned().unwrap_or(Value::Null);
    let Value::Array(items) = current else {
        return Err(Error::validation(format!("'{path}' is not an array")));
    };
    let kept: Vec<Value> = items.into_iter().filter(|item| !matches_value(Some(item), predicate, plugins)).collect();
    set_path(record, path, Value::Array(kept));
    Ok(())
}

fn eval_update_operator(record: &mut Record, op: &str, path: &str, value: &Value, plugins: Option<&crate::plugin::PluginRegistry>) -> Result<()> {
    match op {
        "$set" => {
            set_path(record, path, value.clone());
            Ok(())
        }
        "$increment" => {
            let delta = value.as_f64().ok_or_else(|| Error::validation("$increment expects a number"))?;
            numeric_op(record, path, delta, "$increment")
        }
        "$decrement" => {
            let delta = value.as_f64().ok_or_else(|| Error::validation("$decrement expects a number"))?;
            numeric_op(record, path, -delta, "$decrement")
        }
        "$multiply" => {
            let factor = value.as_f64().ok_or_else(|| Error::validation("$multiply expects a number"))?;
            let current = get_path(record, path).cloned().unwrap_or(Value::Null);
            let base = match &current {
                Value::Null => 0.0,
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                _ => return Err(Error::validation(format!("'{path}' is not numeric, cannot apply $multiply"))),
            };
            let next = base * factor;
            set_path(record, path, serde_json::Number::from_f64(next).map(Value::Number).unwrap_or(Value::Null));
            Ok(())
        }
        "$append" => array_op(record, path, value, false),
        "$prepend" => array_op(record, path, value, true),
        "$remove" => remove_op(record, path, value, plugins),
        "$toggle" => {
            let current = get_path(record, path).and_then(Value::as_bool).unwrap_or(false);
            set_path(record, path, Value::Bool(!current));
            Ok(())
        }
        other => Err(Error::validation(format!("unknown update operator '{other}'"))),
    }
}

/// Apply an update: either a plain object merge or
/// an object of `$operator` clauses, never both mixed at the top level.
/// Stamps `updatedAt` with the current time unless the patch or a
/// `beforeUpdate` hook already set it to something other than its prior
/// value.
pub fn update(workspace: &Workspace<'_>, collection: &str, id: &str, patch: Value) -> Result<Record> {
    let config = workspace.config(collection)?;
    let state = workspace.state(collection)?;
    let before = state.get(id).cloned().ok_or_else(|| Error::NotFound { collection: collection.to_string(), id: id.to_string() })?;
    if is_soft_deleted(&before) {
        return Err(Error::NotFound { collection: collection.to_string(), id: id.to_string() });
    }

    let mut draft = before.clone();
    let patch_obj = patch.as_object().ok_or_else(|| Error::validation("update patch must be an object"))?;
    let has_operators = patch_obj.keys().any(|k| k.starts_with('$'));
    let has_plain = patch_obj.keys().any(|k| !k.starts_with('$'));
    if has_operators && has_plain {
        return Err(Error::validation("update patch cannot mix operators and plain fields"));
    }

    if has_operators {
        apply_operators(&mut draft, patch_obj, workspace.plugins())?;
    } else {
        for (field, value) in patch_obj {
            if (field == "id" || field == "createdAt") && before.get(field) != Some(value) {
                return Err(Error::validation(format!("update cannot change immutable field '{field}'")));
            }
            draft.insert(field.clone(), value.clone());
        }
    }
    draft.insert("id".to_string(), Value::String(id.to_string()));

    if let Some(hook) = &config.hooks.before_update {
        hook(&mut draft).map_err(|cause| Error::Hook { phase: "beforeUpdate".to_string(), cause })?;
    }

    if draft.get("updatedAt") == before.get("updatedAt") {
        draft.insert("updatedAt".to_string(), Value::String(now_iso()));
    }

    let record = validate(&config, &draft)?;
    check_unique(&state, &config, &record, Some(id))?;
    check_foreign_keys(workspace, &config, &record)?;

    let next = state.with_upserted(id.to_string(), record.clone());
    workspace.stage(
        collection,
        next,
        ChangeEvent {
            collection: collection.to_string(),
            kind: ChangeKind::Update,
            id: Some(id.to_string()),
            before: Some(Value::Object(before)),
            after: Some(Value::Object(record.clone())),
        },
    );

    if let Some(hook) = &config.hooks.after_update {
        hook(&record);
    }

    Ok(record)
}

/// Remove a row: hard-delete unless the collection
/// declares `soft_delete` support and `soft` is requested, in which case
/// a `deletedAt` timestamp is set instead and the row is retained.
pub fn delete(workspace: &Workspace<'_>, collection: &str, id: &str, soft: bool) -> Result<Record> {
    let config = workspace.config(collection)?;
    let state = workspace.state(collection)?;
    let before = state.get(id).cloned().ok_or_else(|| Error::NotFound { collection: collection.to_string(), id: id.to_string() })?;
    if is_soft_deleted(&before) {
        return Err(Error::NotFound { collection: collection.to_string(), id: id.to_string() });
    }

    if let Some(hook) = &config.hooks.before_delete {
        let mut draft = before.clone();
        hook(&mut draft).map_err(|cause| Error::Hook { phase: "beforeDelete".to_string(), cause })?;
    }

    if soft && config.soft_delete {
        let mut record = before.clone();
        record.insert("deletedAt".to_string(), Value::String(now_iso()));
        let next = state.with_upserted(id.to_string(), record.clone());
        workspace.stage(
            collection,
            next,
            ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Update,
                id: Some(id.to_string()),
                before: Some(Value::Object(before.clone())),
                after: Some(Value::Object(record.clone())),
            },
        );
        if let Some(hook) = &config.hooks.after_delete {
            hook(&record);
        }
        return Ok(record);
    }

    let next = state.with_removed(id);
    workspace.stage(
        collection,
        next,
        ChangeEvent { collection: collection.to_string(), kind: ChangeKind::Delete, id: Some(id.to_string()), before: Some(Value::Object(before.clone())), after: None },
    );
    if let Some(hook) = &config.hooks.after_delete {
        hook(&before);
    }
    Ok(before)
}

fn find_existing_id(state: &crate::collection::CollectionState, matcher: &Value) -> Result<Option<String>> {
    let matcher_obj = matcher.as_object().ok_or_else(|| Error::validation("upsert matcher must be an object"))?;
    if let Some(id) = matcher_obj.get("id").and_then(Value::as_str) {
        return Ok(state.get(id).map(|_| id.to_string()));
    }
    for (id, record) in state.iter_in_order_with_ids() {
        if is_soft_deleted(record) {
            continue;
        }
        if matcher_obj.iter().all(|(field, value)| record.get(field) == Some(value)) {
            return Ok(Some(id.to_string()));
        }
    }
    Ok(None)
}

/// `upsert`: update the row matched by `matcher` if one
/// exists, otherwise `create` with `matcher` merged under `create`.
pub fn upsert(workspace: &Workspace<'_>, collection: &str, matcher: Value, create_input: Value, update_patch: Value) -> Result<Record> {
    let state = workspace.state(collection)?;
    match find_existing_id(&state, &matcher)? {
        Some(id) => update(workspace, collection, &id, update_patch),
        None => {
            let mut merged = matcher.as_object().cloned().unwrap_or_default();
            if let Some(extra) = create_input.as_object() {
                for (k, v) in extra {
                    merged.insert(k.clone(), v.clone());
                }
            }
            create(workspace, collection, Value::Object(merged))
        }
    }
}

/// `update_many`: apply the same patch to every row matching
/// `filter`, up to `batch_limit` candidates. Any single row's failure
/// aborts the whole batch — the caller must not commit the workspace
/// when this returns `Err`.
pub fn update_many(
    workspace: &Workspace<'_>,
    collection: &str,
    filter: &Value,
    patch: Value,
    batch_limit: usize,
) -> Result<Vec<Record>> {
    let lookup = crate::filter::NoRelationships;
    let config = workspace.config(collection)?;
    let state = workspace.state(collection)?;
    let plugins = workspace.plugins();
    let candidates: Vec<String> = state
        .iter_in_order_with_ids()
        .filter(|(_, record)| !is_soft_deleted(record) && crate::filter::evaluate(record, filter, &config, &lookup, plugins))
        .map(|(id, _)| id.to_string())
        .collect();

    if candidates.len() > batch_limit {
        return Err(Error::Operation {
            operation: "update_many".to_string(),
            reason: format!("matched {} rows, exceeding the batch limit of {batch_limit}", candidates.len()),
        });
    }

    let mut updated = Vec::with_capacity(candidates.len());
    for id in candidates {
        updated.push(update(workspace, collection, &id, patch.clone())?);
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionState;
    use crate::config::{CollectionConfig, RelationshipConfig, UniqueConstraint};
    use crate::workspace::CollectionSource;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct TestSource {
        configs: HashMap<String, Arc<CollectionConfig>>,
        states: Mutex<HashMap<String, Arc<CollectionState>>>,
    }

    impl TestSource {
        fn new(configs: Vec<CollectionConfig>) -> Self {
            let mut configs_map = HashMap::new();
            let mut states = HashMap::new();
            for config in configs {
                states.insert(config.name.clone(), Arc::new(CollectionState::empty()));
                configs_map.insert(config.name.clone(), Arc::new(config));
            }
            TestSource { configs: configs_map, states: Mutex::new(states) }
        }
    }

    impl CollectionSource for TestSource {
        fn config(&self, collection: &str) -> Option<Arc<CollectionConfig>> {
            self.configs.get(collection).cloned()
        }
        fn snapshot(&self, collection: &str) -> Option<Arc<CollectionState>> {
            self.states.lock().unwrap().get(collection).cloned()
        }
    }

    fn commit(source: &TestSource, workspace: Workspace<'_>) {
        let (staged, _events) = workspace.into_parts();
        let mut states = source.states.lock().unwrap();
        for (collection, next) in staged {
            states.insert(collection, Arc::new(next));
        }
    }

    #[test]
    fn create_assigns_id_and_checks_uniqueness() {
        let source = TestSource::new(vec![CollectionConfig::builder("users").unique(UniqueConstraint::single("email")).build()]);
        let workspace = Workspace::new(&source);
        let record = create(&workspace, "users", json!({"email": "a@example.com"})).unwrap();
        assert!(record.get("id").is_some());
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        let err = create(&workspace, "users", json!({"email": "a@example.com"})).unwrap_err();
        assert!(matches!(err, Error::UniqueConstraint { .. }));
    }

    #[test]
    fn update_with_increment_operator() {
        let source = TestSource::new(vec![CollectionConfig::builder("counters").build()]);
        let workspace = Workspace::new(&source);
        let record = create(&workspace, "counters", json!({"id": "c1", "count": 5})).unwrap();
        commit(&source, workspace);
        assert_eq!(record["count"], json!(5));

        let workspace = Workspace::new(&source);
        let updated = update(&workspace, "counters", "c1", json!({"$increment": {"count": 3}})).unwrap();
        assert_eq!(updated["count"], json!(8.0));
    }

    #[test]
    fn update_rejects_mixed_operators_and_plain_fields() {
        let source = TestSource::new(vec![CollectionConfig::builder("counters").build()]);
        let workspace = Workspace::new(&source);
        create(&workspace, "counters", json!({"id": "c1", "count": 5})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        let err = update(&workspace, "counters", "c1", json!({"$increment": {"count": 1}, "name": "x"})).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn multiply_on_non_numeric_field_is_a_validation_error() {
        let source = TestSource::new(vec![CollectionConfig::builder("items").build()]);
        let workspace = Workspace::new(&source);
        create(&workspace, "items", json!({"id": "i1", "label": "hi"})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        let err = update(&workspace, "items", "i1", json!({"$multiply": {"label": 2}})).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn delete_hard_removes_by_default() {
        let source = TestSource::new(vec![CollectionConfig::builder("items").build()]);
        let workspace = Workspace::new(&source);
        create(&workspace, "items", json!({"id": "i1"})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        delete(&workspace, "items", "i1", false).unwrap();
        commit(&source, workspace);

        assert!(source.snapshot("items").unwrap().get("i1").is_none());
    }

    #[test]
    fn soft_delete_sets_deleted_at_and_hides_row() {
        let source = TestSource::new(vec![CollectionConfig::builder("items").soft_delete(true).build()]);
        let workspace = Workspace::new(&source);
        create(&workspace, "items", json!({"id": "i1"})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        delete(&workspace, "items", "i1", true).unwrap();
        commit(&source, workspace);

        let state = source.snapshot("items").unwrap();
        assert!(state.get("i1").is_some());

        let workspace = Workspace::new(&source);
        let err = update(&workspace, "items", "i1", json!({"x": 1})).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn upsert_creates_when_no_match_and_updates_when_matched() {
        let source = TestSource::new(vec![CollectionConfig::builder("users").unique(UniqueConstraint::single("email")).build()]);
        let workspace = Workspace::new(&source);
        let created = upsert(&workspace, "users", json!({"email": "a@example.com"}), json!({"name": "Ada"}), json!({"name": "Ada"})).unwrap();
        commit(&source, workspace);
        assert_eq!(created["name"], json!("Ada"));

        let workspace = Workspace::new(&source);
        let updated = upsert(&workspace, "users", json!({"email": "a@example.com"}), json!({"name": "New"}), json!({"name": "Updated"})).unwrap();
        assert_eq!(updated["name"], json!("Updated"));
    }

    #[test]
    fn update_many_applies_patch_to_all_matches() {
        let source = TestSource::new(vec![CollectionConfig::builder("items").build()]);
        let workspace = Workspace::new(&source);
        create(&workspace, "items", json!({"id": "i1", "tag": "a"})).unwrap();
        create(&workspace, "items", json!({"id": "i2", "tag": "a"})).unwrap();
        create(&workspace, "items", json!({"id": "i3", "tag": "b"})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        let updated = update_many(&workspace, "items", &json!({"tag": "a"}), json!({"reviewed": true}), 100).unwrap();
        assert_eq!(updated.len(), 2);
    }

    #[test]
    fn update_many_aborts_whole_batch_over_limit() {
        let source = TestSource::new(vec![CollectionConfig::builder("items").build()]);
        let workspace = Workspace::new(&source);
        for i in 0..5 {
            create(&workspace, "items", json!({"id": format!("i{i}"), "tag": "a"})).unwrap();
        }
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        let err = update_many(&workspace, "items", &json!({"tag": "a"}), json!({"x": 1}), 3).unwrap_err();
        assert!(matches!(err, Error::Operation { .. }));
    }

    #[test]
    fn create_rejects_dangling_foreign_key() {
        let source = TestSource::new(vec![
            CollectionConfig::builder("companies").build(),
            CollectionConfig::builder("users").relationship("company", RelationshipConfig::reference("companies", "companyId")).build(),
        ]);
        let workspace = Workspace::new(&source);
        let err = create(&workspace, "users", json!({"companyId": "missing"})).unwrap_err();
        assert!(matches!(err, Error::ForeignKey { .. }));
    }
}
