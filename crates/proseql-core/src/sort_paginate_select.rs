//! Sort, paginate, and select: stable multi-key sort with a
//! null-to-end policy, floor/clamp offset-limit pagination, and whitelist
//! projection with nested recursion into populated objects and arrays.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::value::{compare_json, get_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// Stable multi-key sort: nullish values always sort to the
/// end regardless of direction; ties on all keys preserve input order
/// because `sort_by` is stable.
pub fn sort(records: &mut [Value], keys: &[SortKey]) {
    records.sort_by(|a, b| compare_by_keys(a, b, keys));
}

fn compare_by_keys(a: &Value, b: &Value, keys: &[SortKey]) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    for key in keys {
        let av = get_path(a, &key.path);
        let bv = get_path(b, &key.path);
        let ordering = match (av, bv) {
            (None, None) => Ordering::Equal,
            (Some(x), None) if x.is_null() => Ordering::Equal,
            (None, Some(y)) if y.is_null() => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) if x.is_null() && y.is_null() => Ordering::Equal,
            (Some(x), Some(_)) if x.is_null() => Ordering::Greater,
            (Some(_), Some(y)) if y.is_null() => Ordering::Less,
            (Some(x), Some(y)) => {
                let cmp = compare_json(x, y);
                if key.direction == SortDirection::Desc {
                    cmp.reverse()
                } else {
                    cmp
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Floor fractional bounds and clamp negatives to zero; `None` means no
/// bound.
pub fn normalize_bound(bound: Option<f64>) -> Option<usize> {
    bound.map(|b| b.floor().max(0.0) as usize)
}

/// Apply offset then limit, offset first.
pub fn paginate(records: Vec<Value>, offset: Option<f64>, limit: Option<f64>) -> Vec<Value> {
    let offset = normalize_bound(offset).unwrap_or(0);
    let mut iter = records.into_iter().skip(offset);
    match normalize_bound(limit) {
        Some(limit) => iter.by_ref().take(limit).collect(),
        None => iter.collect(),
    }
}

#[derive(Debug, Clone)]
pub enum SelectNode {
    Include,
    Nested(SelectTree),
}

pub type SelectTree = HashMap<String, SelectNode>;

#[derive(Debug, Clone)]
pub enum Select {
    All,
    Fields(SelectTree),
}

/// Parse a select spec: a bare array of field names, or an object mapping
/// field → `true` | nested select object.
pub fn parse_select(value: Option<&Value>) -> Select {
    let Some(value) = value else {
        return Select::All;
    };
    match value {
        Value::Array(fields) => {
            let tree = fields
                .iter()
                .filter_map(Value::as_str)
                .map(|field| (field.to_string(), SelectNode::Include))
                .collect();
            Select::Fields(tree)
        }
        Value::Object(obj) => Select::Fields(parse_select_tree(obj)),
        _ => Select::All,
    }
}

fn parse_select_tree(obj: &Map<String, Value>) -> SelectTree {
    obj.iter()
        .filter_map(|(field, spec)| match spec {
            Value::Bool(true) => Some((field.clone(), SelectNode::Include)),
            Value::Object(nested) => Some((field.clone(), SelectNode::Nested(parse_select_tree(nested)))),
            _ => None,
        })
        .collect()
}

/// Every relationship edge named by a select tree at any depth — used by
/// the orchestrator to derive an implicit populate set.
pub fn edges_in_select(select: &Select) -> Vec<String> {
    match select {
        Select::All => Vec::new(),
        Select::Fields(tree) => tree
            .iter()
            .filter_map(|(field, node)| matches!(node, SelectNode::Nested(_)).then(|| field.clone()))
            .collect(),
    }
}

/// Project a record through a select spec. `Select::All` returns the
/// record untouched.
pub fn apply_select(record: &Value, select: &Select) -> Value {
    match select {
        Select::All => record.clone(),
        Select::Fields(tree) => project(record, tree),
    }
}

fn project(value: &Value, tree: &SelectTree) -> Value {
    match value {
        Value::Object(map) => {
            let mut result = Map::new();
            for (field, node) in tree {
                if let Some(found) = map.get(field) {
                    let projected = match node {
                        SelectNode::Include => found.clone(),
                        SelectNode::Nested(sub) => project_nested(found, sub),
                    };
                    result.insert(field.clone(), projected);
                }
            }
            Value::Object(result)
        }
        other => other.clone(),
    }
}

fn project_nested(value: &Value, tree: &SelectTree) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|item| project(item, tree)).collect()),
        Value::Object(_) => project(value, tree),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_is_stable_and_multi_key() {
        let mut records = vec![
            json!({"id": "1", "group": "a", "n": 2}),
            json!({"id": "2", "group": "a", "n": 1}),
            json!({"id": "3", "group": "b", "n": 0}),
        ];
        sort(
            &mut records,
            &[
                SortKey { path: "group".into(), direction: SortDirection::Asc },
                SortKey { path: "n".into(), direction: SortDirection::Asc },
            ],
        );
        let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["2", "1", "3"]);
    }

    #[test]
    fn nullish_sorts_to_end_regardless_of_direction() {
        let mut asc = vec![json!({"n": null}), json!({"n": 1}), json!({"n": 2})];
        sort(&mut asc, &[SortKey { path: "n".into(), direction: SortDirection::Asc }]);
        assert_eq!(asc[2]["n"], Value::Null);

        let mut desc = vec![json!({"n": null}), json!({"n": 1}), json!({"n": 2})];
        sort(&mut desc, &[SortKey { path: "n".into(), direction: SortDirection::Desc }]);
        assert_eq!(desc[2]["n"], Value::Null);
    }

    #[test]
    fn paginate_floors_and_clamps_negatives() {
        let records: Vec<Value> = (0..10).map(|n| json!({"n": n})).collect();
        let page = paginate(records.clone(), Some(2.9), Some(3.2));
        let ns: Vec<i64> = page.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3, 4]);

        let page = paginate(records, Some(-5.0), None);
        assert_eq!(page.len(), 10);
    }

    #[test]
    fn select_projects_whitelisted_fields_and_nested_population() {
        let select = parse_select(Some(&json!({"name": true, "company": {"name": true}})));
        let record = json!({
            "name": "Alice",
            "age": 30,
            "company": {"name": "Acme", "founded": 1990}
        });
        let projected = apply_select(&record, &select);
        assert_eq!(projected, json!({"name": "Alice", "company": {"name": "Acme"}}));
    }

    #[test]
    fn select_recurses_into_arrays_of_populated_rows() {
        let select = parse_select(Some(&json!({"users": {"name": true}})));
        let record = json!({"users": [{"name": "A", "age": 1}, {"name": "B", "age": 2}]});
        let projected = apply_select(&record, &select);
        assert_eq!(projected, json!({"users": [{"name": "A"}, {"name": "B"}]}));
    }
}
