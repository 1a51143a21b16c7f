//! Filter evaluator: evaluates a nested where-expression
//! against one record — logical combinators, comparison/array/string
//! operators, `$search`, and relationship-traversal predicates.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::config::{CollectionConfig, RelationshipKind};
use crate::plugin::PluginRegistry;
use crate::value::{compare_json, get_path, is_nullish, tokenize};

const OPERATOR_KEYS: &[&str] = &[
    "$eq",
    "$ne",
    "$gt",
    "$gte",
    "$lt",
    "$lte",
    "$in",
    "$nin",
    "$startsWith",
    "$endsWith",
    "$contains",
    "$all",
    "$size",
    "$search",
];

fn is_operator_key(key: &str) -> bool {
    OPERATOR_KEYS.contains(&key)
}

/// Resolves relationship edges while evaluating a where-expression.
/// Implemented by the query orchestrator over a captured snapshot so the
/// filter evaluator itself stays snapshot-agnostic.
pub trait RelationshipLookup {
    fn config_for(&self, collection: &str) -> Option<CollectionConfig>;
    fn ref_target(&self, collection: &str, id: &str) -> Option<Map<String, Value>>;
    fn inverse_targets(&self, collection: &str, foreign_key: &str, id: &str) -> Vec<Map<String, Value>>;
}

/// A lookup with no relationships: used when filtering records in
/// isolation (e.g. inside the mutation kernel's unique-constraint scan).
pub struct NoRelationships;

impl RelationshipLookup for NoRelationships {
    fn config_for(&self, _collection: &str) -> Option<CollectionConfig> {
        None
    }

    fn ref_target(&self, _collection: &str, _id: &str) -> Option<Map<String, Value>> {
        None
    }

    fn inverse_targets(&self, _collection: &str, _foreign_key: &str, _id: &str) -> Vec<Map<String, Value>> {
        Vec::new()
    }
}

/// Evaluate a where-expression against `record` under `config`. `plugins`
/// is consulted for operators outside the built-in set (e.g. a
/// plugin-registered `$near`).
pub fn evaluate(
    record: &Map<String, Value>,
    expr: &Value,
    config: &CollectionConfig,
    lookup: &dyn RelationshipLookup,
    plugins: Option<&PluginRegistry>,
) -> bool {
    let Some(obj) = expr.as_object() else {
        return true;
    };
    obj.iter().all(|(key, clause)| match key.as_str() {
        "$and" => clause
            .as_array()
            .map(|list| list.iter().all(|sub| evaluate(record, sub, config, lookup, plugins)))
            .unwrap_or(true),
        "$or" => clause
            .as_array()
            .map(|list| !list.is_empty() && list.iter().any(|sub| evaluate(record, sub, config, lookup, plugins)))
            .unwrap_or(false),
        "$not" => !evaluate(record, clause, config, lookup, plugins),
        "$search" => evaluate_top_level_search(record, clause, config),
        _ if config.relationships.contains_key(key) => {
            evaluate_relationship(record, key, clause, config, lookup, plugins)
        }
        _ => matches_value(get_path_as_value(record, key), clause, plugins),
    })
}

fn get_path_as_value<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.splitn(2, '.');
    let head = parts.next()?;
    let value = record.get(head)?;
    match parts.next() {
        Some(rest) => get_path(value, rest),
        None => Some(value),
    }
}

fn evaluate_relationship(
    record: &Map<String, Value>,
    edge: &str,
    clause: &Value,
    config: &CollectionConfig,
    lookup: &dyn RelationshipLookup,
    plugins: Option<&PluginRegistry>,
) -> bool {
    let Some(rel) = config.relationships.get(edge) else {
        return false;
    };
    let Some(target_config) = lookup.config_for(&rel.target) else {
        return false;
    };
    match rel.kind {
        RelationshipKind::Ref => {
            let fk_value = record.get(&rel.foreign_key);
            let Some(fk) = fk_value.and_then(Value::as_str) else {
                return evaluate(&Map::new(), clause, &target_config, lookup, plugins);
            };
            match lookup.ref_target(&rel.target, fk) {
                Some(target) => evaluate(&target, clause, &target_config, lookup, plugins),
                None => evaluate(&Map::new(), clause, &target_config, lookup, plugins),
            }
        }
        RelationshipKind::Inverse => {
            let Some(id) = record.get("id").and_then(Value::as_str) else {
                return false;
            };
            let siblings = lookup.inverse_targets(&rel.target, &rel.foreign_key, id);
            evaluate_inverse_quantifier(&siblings, clause, &target_config, lookup, plugins)
        }
    }
}

fn evaluate_inverse_quantifier(
    siblings: &[Map<String, Value>],
    clause: &Value,
    target_config: &CollectionConfig,
    lookup: &dyn RelationshipLookup,
    plugins: Option<&PluginRegistry>,
) -> bool {
    let Some(obj) = clause.as_object() else {
        return siblings.iter().any(|s| evaluate(s, clause, target_config, lookup, plugins));
    };
    if let Some(some_expr) = obj.get("$some") {
        return siblings.iter().any(|s| evaluate(s, some_expr, target_config, lookup, plugins));
    }
    if let Some(every_expr) = obj.get("$every") {
        return siblings.is_empty() || siblings.iter().all(|s| evaluate(s, every_expr, target_config, lookup, plugins));
    }
    if let Some(none_expr) = obj.get("$none") {
        return !siblings.iter().any(|s| evaluate(s, none_expr, target_config, lookup, plugins));
    }
    siblings.iter().any(|s| evaluate(s, clause, target_config, lookup, plugins))
}

fn evaluate_top_level_search(record: &Map<String, Value>, clause: &Value, config: &CollectionConfig) -> bool {
    let (query, fields) = parse_search_clause(clause);
    let fields: Vec<&str> = if fields.is_empty() {
        config.search_index.iter().map(String::as_str).collect()
    } else {
        fields
    };
    let mut doc_tokens: HashSet<String> = HashSet::new();
    for field in fields {
        if let Some(value) = get_path_as_value(record, field).and_then(Value::as_str) {
            doc_tokens.extend(tokenize(value));
        }
    }
    search_matches(&doc_tokens, &query)
}

fn parse_search_clause(clause: &Value) -> (String, Vec<&str>) {
    if let Some(query) = clause.as_str() {
        return (query.to_string(), Vec::new());
    }
    if let Some(obj) = clause.as_object() {
        let query = obj.get("query").and_then(Value::as_str).unwrap_or_default().to_string();
        let fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        return (query, fields);
    }
    (String::new(), Vec::new())
}

fn search_matches(doc_tokens: &HashSet<String>, query: &str) -> bool {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return true;
    }
    query_tokens
        .iter()
        .all(|qt| doc_tokens.iter().any(|dt| dt.starts_with(qt.as_str())))
}

/// Evaluate a single field's clause: an operator object, a shape-mirroring
/// nested object, or a bare scalar/array for direct equality. `plugins`
/// is consulted both to recognize a custom operator key and to evaluate
/// it.
pub fn matches_value(value: Option<&Value>, clause: &Value, plugins: Option<&PluginRegistry>) -> bool {
    let Some(obj) = clause.as_object() else {
        return value == Some(clause);
    };
    let is_known_operator = |k: &str| is_operator_key(k) || plugins.map_or(false, |registry| registry.operator(k).is_some());
    let operator_keys: Vec<&String> = obj.keys().filter(|k| is_known_operator(k)).collect();
    if operator_keys.is_empty() {
        return match value {
            Some(Value::Object(nested)) => obj
                .iter()
                .all(|(field, sub_clause)| matches_value(nested.get(field), sub_clause, plugins)),
            _ => obj.is_empty(),
        };
    }
    operator_keys
        .iter()
        .all(|op| eval_operator(value, op, obj.get(*op).unwrap(), plugins))
}

fn eval_operator(value: Option<&Value>, op: &str, operand: &Value, plugins: Option<&PluginRegistry>) -> bool {
    match op {
        "$eq" => eq_with_nullish(value, operand),
        "$ne" => !eq_with_nullish(value, operand),
        "$gt" => value.map_or(false, |v| compare_json(v, operand).is_gt()),
        "$gte" => value.map_or(false, |v| compare_json(v, operand).is_ge()),
        "$lt" => value.map_or(false, |v| compare_json(v, operand).is_lt()),
        "$lte" => value.map_or(false, |v| compare_json(v, operand).is_le()),
        "$in" => {
            let Some(list) = operand.as_array() else { return false };
            value.map_or(false, |v| list.contains(v))
        }
        "$nin" => {
            let Some(list) = operand.as_array() else { return true };
            !value.map_or(false, |v| list.contains(v))
        }
        "$startsWith" => match (value.and_then(Value::as_str), operand.as_str()) {
            (Some(v), Some(prefix)) => v.starts_with(prefix),
            _ => false,
        },
        "$endsWith" => match (value.and_then(Value::as_str), operand.as_str()) {
            (Some(v), Some(suffix)) => v.ends_with(suffix),
            _ => false,
        },
        "$contains" => match value {
            Some(Value::String(s)) => operand.as_str().map_or(false, |needle| s.contains(needle)),
            Some(Value::Array(items)) => items.contains(operand),
            _ => false,
        },
        "$all" => {
            let Some(wanted) = operand.as_array() else { return false };
            if wanted.is_empty() {
                return true;
            }
            match value {
                Some(Value::Array(items)) => wanted.iter().all(|w| items.contains(w)),
                _ => false,
            }
        }
        "$size" => {
            let expected = operand.as_u64();
            match value {
                Some(Value::Array(items)) => expected == Some(items.len() as u64),
                Some(Value::String(s)) => expected == Some(s.chars().count() as u64),
                _ => false,
            }
        }
        "$search" => {
            let tokens: HashSet<String> = value
                .and_then(Value::as_str)
                .map(tokenize)
                .unwrap_or_default()
                .into_iter()
                .collect();
            let query = operand.as_str().unwrap_or_default();
            search_matches(&tokens, query)
        }
        custom => plugins.and_then(|registry| registry.operator(custom)).map_or(false, |f| f(value, operand)),
    }
}

fn eq_with_nullish(value: Option<&Value>, operand: &Value) -> bool {
    if operand.is_null() {
        is_nullish(value)
    } else {
        value == Some(operand)
    }
}
