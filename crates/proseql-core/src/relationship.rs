//! Relationship mutations:
//! `$connect`/`$disconnect`/`$create`/`$update`/`$set`/`$delete`/
//! `$connectOrCreate` clauses nested under a relationship edge's key in a
//! create or update input, plus cascade/restrict/set-null delete policies.
//!
//! These are a thin layer over the plain mutation kernel: every edge
//! clause resolves down to ordinary `mutation::create`/`update`/`delete`
//! calls staged on the same [`Workspace`], so a `create_with_relationships`
//! that touches three collections commits (or fails) as one unit exactly
//! like a hand-written multi-call sequence would inside `$transaction`.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::config::{CollectionConfig, RelationshipConfig, RelationshipKind};
use crate::error::{Error, Result};
use crate::mutation;
use crate::value::Record;
use crate::workspace::Workspace;

/// Per-edge policy for `delete_with_relationships` when other rows still
/// reference the row being deleted through an `inverse` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    Cascade,
    Restrict,
    SetNull,
}

#[derive(Debug, Clone)]
enum EdgeClause {
    Connect(Value),
    Disconnect,
    Create(Value),
    Update(Value),
    Set(Vec<Value>),
    Delete(Option<Value>),
    ConnectOrCreate { r#where: Value, create: Value },
}

fn parse_edge_clause(value: &Value) -> Option<EdgeClause> {
    let obj = value.as_object()?;
    if let Some(v) = obj.get("$connect") {
        return Some(EdgeClause::Connect(v.clone()));
    }
    if obj.contains_key("$disconnect") {
        return Some(EdgeClause::Disconnect);
    }
    if let Some(v) = obj.get("$create") {
        return Some(EdgeClause::Create(v.clone()));
    }
    if let Some(v) = obj.get("$update") {
        return Some(EdgeClause::Update(v.clone()));
    }
    if let Some(Value::Array(items)) = obj.get("$set") {
        return Some(EdgeClause::Set(items.clone()));
    }
    if let Some(v) = obj.get("$delete") {
        return Some(EdgeClause::Delete(if v.is_null() { None } else { Some(v.clone()) }));
    }
    if let Some(cc) = obj.get("$connectOrCreate").and_then(Value::as_object) {
        return Some(EdgeClause::ConnectOrCreate {
            r#where: cc.get("where").cloned().unwrap_or(Value::Null),
            create: cc.get("create").cloned().unwrap_or(Value::Null),
        });
    }
    None
}

/// Resolve a `$connect`/`where` matcher to a target row's id: directly by
/// `{"id": ...}`, otherwise by the first declared unique constraint whose
/// fields are all present in the matcher.
fn resolve_target_id(workspace: &Workspace<'_>, target_collection: &str, matcher: &Value) -> Result<String> {
    let state = workspace.state(target_collection)?;
    if let Some(id) = matcher.get("id").and_then(Value::as_str) {
        return match state.get(id) {
            Some(_) => Ok(id.to_string()),
            None => Err(Error::NotFound { collection: target_collection.to_string(), id: id.to_string() }),
        };
    }

    let config = workspace.config(target_collection)?;
    let matcher_obj = matcher
        .as_object()
        .ok_or_else(|| Error::validation("relationship matcher must be an object"))?;
    for constraint in &config.unique_fields {
        if !constraint.fields.iter().all(|field| matcher_obj.contains_key(field)) {
            continue;
        }
        for (id, record) in state.iter_in_order_with_ids() {
            if constraint.fields.iter().all(|field| record.get(field) == matcher_obj.get(field)) {
                return Ok(id.to_string());
            }
        }
    }
    Err(Error::NotFound { collection: target_collection.to_string(), id: "<unique-match>".to_string() })
}

fn set_fk(workspace: &Workspace<'_>, target_collection: &str, target_id: &str, foreign_key: &str, value: Value) -> Result<()> {
    let mut patch = Map::new();
    patch.insert(foreign_key.to_string(), value);
    mutation::update(workspace, target_collection, target_id, Value::Object(patch))?;
    Ok(())
}

fn ids_pointing_at(workspace: &Workspace<'_>, rel: &RelationshipConfig, this_id: &str) -> Result<Vec<String>> {
    let state = workspace.state(&rel.target)?;
    Ok(state
        .iter_in_order_with_ids()
        .filter(|(_, record)| record.get(&rel.foreign_key).and_then(Value::as_str) == Some(this_id))
        .map(|(id, _)| id.to_string())
        .collect())
}

/// Resolve a `ref` edge clause (the foreign key lives on the record being
/// created) to the value that should be merged in under its foreign key.
fn resolve_ref_for_create(workspace: &Workspace<'_>, rel: &RelationshipConfig, clause: &EdgeClause) -> Result<Value> {
    match clause {
        EdgeClause::Connect(matcher) => Ok(Value::String(resolve_target_id(workspace, &rel.target, matcher)?)),
        EdgeClause::Disconnect => Ok(Value::Null),
        EdgeClause::Create(draft) => {
            let created = mutation::create(workspace, &rel.target, draft.clone())?;
            Ok(created.get("id").cloned().unwrap_or(Value::Null))
        }
        EdgeClause::ConnectOrCreate { r#where, create } => match resolve_target_id(workspace, &rel.target, r#where) {
            Ok(id) => Ok(Value::String(id)),
            Err(_) => {
                let created = mutation::create(workspace, &rel.target, create.clone())?;
                Ok(created.get("id").cloned().unwrap_or(Value::Null))
            }
        },
        EdgeClause::Update(_) | EdgeClause::Delete(_) => Err(Error::validation("'$update'/'$delete' require an existing row to connect to")),
        EdgeClause::Set(_) => Err(Error::validation("'$set' only applies to inverse relationships")),
    }
}

/// Resolve a `ref` edge clause during `update_with_relationships`. Returns
/// `Some(new_fk_value)` when the foreign key should change, `None` when
/// the clause only affected the connected row itself (`$update`).
fn resolve_ref_for_update(workspace: &Workspace<'_>, current_fk: Option<&str>, rel: &RelationshipConfig, clause: &EdgeClause) -> Result<Option<Value>> {
    match clause {
        EdgeClause::Connect(matcher) => Ok(Some(Value::String(resolve_target_id(workspace, &rel.target, matcher)?))),
        EdgeClause::Disconnect => Ok(Some(Value::Null)),
        EdgeClause::Create(draft) => {
            let created = mutation::create(workspace, &rel.target, draft.clone())?;
            Ok(Some(created.get("id").cloned().unwrap_or(Value::Null)))
        }
        EdgeClause::ConnectOrCreate { r#where, create } => match resolve_target_id(workspace, &rel.target, r#where) {
            Ok(id) => Ok(Some(Value::String(id))),
            Err(_) => {
                let created = mutation::create(workspace, &rel.target, create.clone())?;
                Ok(Some(created.get("id").cloned().unwrap_or(Value::Null)))
            }
        },
        EdgeClause::Update(patch) => {
            let target_id = current_fk.ok_or_else(|| Error::validation("cannot '$update' an unconnected relationship"))?;
            mutation::update(workspace, &rel.target, target_id, patch.clone())?;
            Ok(None)
        }
        // `$delete` on a `ref` edge disconnects rather than deletes the target.
        EdgeClause::Delete(_) => Ok(Some(Value::Null)),
        EdgeClause::Set(_) => Err(Error::validation("'$set' only applies to inverse relationships")),
    }
}

/// Apply an `inverse` edge clause (the foreign key lives on the target
/// row, pointing back at `this_id`).
fn apply_inverse_clause(workspace: &Workspace<'_>, this_id: &str, rel: &RelationshipConfig, clause: &EdgeClause) -> Result<()> {
    match clause {
        EdgeClause::Connect(matcher) => {
            let target_id = resolve_target_id(workspace, &rel.target, matcher)?;
            set_fk(workspace, &rel.target, &target_id, &rel.foreign_key, Value::String(this_id.to_string()))
        }
        EdgeClause::Disconnect => {
            for target_id in ids_pointing_at(workspace, rel, this_id)? {
                set_fk(workspace, &rel.target, &target_id, &rel.foreign_key, Value::Null)?;
            }
            Ok(())
        }
        EdgeClause::Create(draft) => {
            let mut merged = draft.as_object().cloned().unwrap_or_default();
            merged.insert(rel.foreign_key.clone(), Value::String(this_id.to_string()));
            mutation::create(workspace, &rel.target, Value::Object(merged))?;
            Ok(())
        }
        EdgeClause::Update(patch) => {
            for target_id in ids_pointing_at(workspace, rel, this_id)? {
                mutation::update(workspace, &rel.target, &target_id, patch.clone())?;
            }
            Ok(())
        }
        EdgeClause::Set(matchers) => {
            let mut keep = HashSet::new();
            for matcher in matchers {
                keep.insert(resolve_target_id(workspace, &rel.target, matcher)?);
            }
            for target_id in ids_pointing_at(workspace, rel, this_id)? {
                if !keep.contains(&target_id) {
                    set_fk(workspace, &rel.target, &target_id, &rel.foreign_key, Value::Null)?;
                }
            }
            for target_id in &keep {
                set_fk(workspace, &rel.target, target_id, &rel.foreign_key, Value::String(this_id.to_string()))?;
            }
            Ok(())
        }
        // `$delete` on an `inverse` edge cascade-deletes the named target row(s).
        EdgeClause::Delete(matcher) => {
            let ids = match matcher {
                Some(m) => vec![resolve_target_id(workspace, &rel.target, m)?],
                None => ids_pointing_at(workspace, rel, this_id)?,
            };
            for target_id in ids {
                mutation::delete(workspace, &rel.target, &target_id, false)?;
            }
            Ok(())
        }
        EdgeClause::ConnectOrCreate { r#where, create } => match resolve_target_id(workspace, &rel.target, r#where) {
            Ok(target_id) => set_fk(workspace, &rel.target, &target_id, &rel.foreign_key, Value::String(this_id.to_string())),
            Err(_) => {
                let mut merged = create.as_object().cloned().unwrap_or_default();
                merged.insert(rel.foreign_key.clone(), Value::String(this_id.to_string()));
                mutation::create(workspace, &rel.target, Value::Object(merged))?;
                Ok(())
            }
        },
    }
}

fn split_edge_clauses(config: &CollectionConfig, draft: &mut Record) -> Vec<(RelationshipConfig, EdgeClause)> {
    let mut found = Vec::new();
    for (edge, rel) in &config.relationships {
        if let Some(raw) = draft.remove(edge) {
            if let Some(clause) = parse_edge_clause(&raw) {
                found.push((rel.clone(), clause));
            }
        }
    }
    found
}

/// `create` extended with nested relationship clauses.
pub fn create_with_relationships(workspace: &Workspace<'_>, collection: &str, input: Value) -> Result<Record> {
    let config = workspace.config(collection)?;
    let mut draft = input.as_object().cloned().ok_or_else(|| Error::validation("create input must be an object"))?;
    let edges = split_edge_clauses(&config, &mut draft);

    let (ref_edges, inverse_edges): (Vec<_>, Vec<_>) = edges.into_iter().partition(|(rel, _)| rel.kind == RelationshipKind::Ref);

    for (rel, clause) in &ref_edges {
        let fk_value = resolve_ref_for_create(workspace, rel, clause)?;
        draft.insert(rel.foreign_key.clone(), fk_value);
    }

    let created = mutation::create(workspace, collection, Value::Object(draft))?;
    let this_id = created.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_default();

    for (rel, clause) in &inverse_edges {
        apply_inverse_clause(workspace, &this_id, rel, clause)?;
    }

    Ok(created)
}

/// `update` extended with nested relationship clauses.
pub fn update_with_relationships(workspace: &Workspace<'_>, collection: &str, id: &str, patch: Value) -> Result<Record> {
    let config = workspace.config(collection)?;
    let mut draft = patch.as_object().cloned().ok_or_else(|| Error::validation("update patch must be an object"))?;
    let edges = split_edge_clauses(&config, &mut draft);
    let (ref_edges, inverse_edges): (Vec<_>, Vec<_>) = edges.into_iter().partition(|(rel, _)| rel.kind == RelationshipKind::Ref);

    if !ref_edges.is_empty() {
        let state = workspace.state(collection)?;
        let current = state.get(id).cloned().ok_or_else(|| Error::NotFound { collection: collection.to_string(), id: id.to_string() })?;
        for (rel, clause) in &ref_edges {
            let current_fk = current.get(&rel.foreign_key).and_then(Value::as_str);
            if let Some(new_fk) = resolve_ref_for_update(workspace, current_fk, rel, clause)? {
                draft.insert(rel.foreign_key.clone(), new_fk);
            }
        }
    }

    let updated = mutation::update(workspace, collection, id, Value::Object(draft))?;

    for (rel, clause) in &inverse_edges {
        apply_inverse_clause(workspace, id, rel, clause)?;
    }

    Ok(updated)
}

/// `delete` extended with a cascade/restrict/set-null policy per
/// `inverse` edge declared on `collection`: plain `delete`
/// orphans dangling foreign keys; only this entry point enforces
/// referential integrity, and only for the edges given an explicit
/// policy). Edges with no entry in `policies` are treated as `Restrict`.
pub fn delete_with_relationships(
    workspace: &Workspace<'_>,
    collection: &str,
    id: &str,
    soft: bool,
    policies: &std::collections::HashMap<String, DeletePolicy>,
) -> Result<Record> {
    let config = workspace.config(collection)?;
    for (edge, rel) in &config.relationships {
        if rel.kind != RelationshipKind::Inverse {
            continue;
        }
        let policy = policies.get(edge).copied().unwrap_or(DeletePolicy::Restrict);
        let dependents = ids_pointing_at(workspace, rel, id)?;
        match policy {
            DeletePolicy::Restrict => {
                if !dependents.is_empty() {
                    return Err(Error::Operation {
                        operation: "delete_with_relationships".to_string(),
                        reason: format!("{collection}.{edge}: {} dependent row(s) in {} restrict deletion", dependents.len(), rel.target),
                    });
                }
            }
            DeletePolicy::Cascade => {
                for target_id in dependents {
                    mutation::delete(workspace, &rel.target, &target_id, soft)?;
                }
            }
            DeletePolicy::SetNull => {
                for target_id in dependents {
                    set_fk(workspace, &rel.target, &target_id, &rel.foreign_key, Value::Null)?;
                }
            }
        }
    }
    mutation::delete(workspace, collection, id, soft)
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

    fn users_and_companies() -> TestSource {
        TestSource::new(vec![
            CollectionConfig::builder("companies")
                .relationship("employees", RelationshipConfig::inverse("users", "companyId"))
                .build(),
            CollectionConfig::builder("users")
                .relationship("company", RelationshipConfig::reference("companies", "companyId"))
                .unique(UniqueConstraint::single("email"))
                .build(),
        ])
    }

    #[test]
    fn create_connects_a_ref_edge_by_unique_match() {
        let source = users_and_companies();
        let workspace = Workspace::new(&source);
        let company = mutation::create(&workspace, "companies", json!({"id": "c1"})).unwrap();
        commit(&source, workspace);
        let _ = company;

        let workspace = Workspace::new(&source);
        let user = create_with_relationships(&workspace, "users", json!({"email": "a@x.com", "company": {"$connect": {"id": "c1"}}})).unwrap();
        assert_eq!(user["companyId"], json!("c1"));
    }

    #[test]
    fn create_creates_a_nested_ref_target() {
        let source = users_and_companies();
        let workspace = Workspace::new(&source);
        let user = create_with_relationships(&workspace, "users", json!({"email": "a@x.com", "company": {"$create": {"id": "c1"}}})).unwrap();
        assert_eq!(user["companyId"], json!("c1"));
        commit(&source, workspace);
        assert!(source.snapshot("companies").unwrap().get("c1").is_some());
    }

    #[test]
    fn create_creates_a_nested_inverse_row_pointing_back() {
        let source = users_and_companies();
        let workspace = Workspace::new(&source);
        let company = create_with_relationships(&workspace, "companies", json!({"id": "c1", "employees": {"$create": {"email": "a@x.com"}}})).unwrap();
        assert_eq!(company["id"], json!("c1"));
        commit(&source, workspace);
        let users = source.snapshot("users").unwrap();
        assert_eq!(users.len(), 1);
        assert!(users.iter_in_order().any(|u| u["companyId"] == json!("c1")));
    }

    #[test]
    fn update_set_replaces_all_inverse_rows() {
        let source = users_and_companies();
        let workspace = Workspace::new(&source);
        mutation::create(&workspace, "companies", json!({"id": "c1"})).unwrap();
        mutation::create(&workspace, "users", json!({"id": "u1", "email": "a@x.com", "companyId": "c1"})).unwrap();
        mutation::create(&workspace, "users", json!({"id": "u2", "email": "b@x.com", "companyId": "c1"})).unwrap();
        mutation::create(&workspace, "users", json!({"id": "u3", "email": "c@x.com"})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        update_with_relationships(&workspace, "companies", "c1", json!({"employees": {"$set": [{"id": "u3"}]}})).unwrap();
        commit(&source, workspace);

        let users = source.snapshot("users").unwrap();
        assert_eq!(users.get("u1").unwrap().get("companyId"), Some(&Value::Null));
        assert_eq!(users.get("u2").unwrap().get("companyId"), Some(&Value::Null));
        assert_eq!(users.get("u3").unwrap()["companyId"], json!("c1"));
    }

    #[test]
    fn delete_with_relationships_restricts_by_default() {
        let source = users_and_companies();
        let workspace = Workspace::new(&source);
        mutation::create(&workspace, "companies", json!({"id": "c1"})).unwrap();
        mutation::create(&workspace, "users", json!({"id": "u1", "email": "a@x.com", "companyId": "c1"})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        let err = delete_with_relationships(&workspace, "companies", "c1", false, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Operation { .. }));
    }

    #[test]
    fn delete_with_relationships_cascades_when_configured() {
        let source = users_and_companies();
        let workspace = Workspace::new(&source);
        mutation::create(&workspace, "companies", json!({"id": "c1"})).unwrap();
        mutation::create(&workspace, "users", json!({"id": "u1", "email": "a@x.com", "companyId": "c1"})).unwrap();
        commit(&source, workspace);

        let mut policies = HashMap::new();
        policies.insert("employees".to_string(), DeletePolicy::Cascade);
        let workspace = Workspace::new(&source);
        delete_with_relationships(&workspace, "companies", "c1", false, &policies).unwrap();
        commit(&source, workspace);

        assert!(source.snapshot("companies").unwrap().get("c1").is_none());
        assert!(source.snapshot("users").unwrap().get("u1").is_none());
    }

    #[test]
    fn ref_delete_clause_disconnects_rather_than_deleting() {
        let source = users_and_companies();
        let workspace = Workspace::new(&source);
        mutation::create(&workspace, "companies", json!({"id": "c1"})).unwrap();
        mutation::create(&workspace, "users", json!({"id": "u1", "email": "a@x.com", "companyId": "c1"})).unwrap();
        commit(&source, workspace);

        let workspace = Workspace::new(&source);
        let updated = update_with_relationships(&workspace, "users", "u1", json!({"company": {"$delete": null}})).unwrap();
        assert_eq!(updated["companyId"], Value::Null);
        commit(&source, workspace);
        assert!(source.snapshot("companies").unwrap().get("c1").is_some());
    }
}
