//! Dot-path field access over `serde_json::Value`:
//! nested fields are addressed as `"address.city"`, the same representation
//! used for `indexes`/`searchIndex`/sort paths/select trees throughout.

use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

/// Read a (possibly nested) field by dot-path. Returns `None` for a missing
/// field anywhere along the path, including when an intermediate segment is
/// not an object.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a (possibly nested) field by dot-path, creating intermediate
/// objects as needed. Overwrites a non-object intermediate with an object.
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_path_segments(value, &segments, new_value);
}

fn set_path_segments(value: &mut Value, segments: &[&str], new_value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let map = value.as_object_mut().expect("coerced to object above");
    if rest.is_empty() {
        map.insert((*head).to_string(), new_value);
    } else {
        let entry = map
            .entry((*head).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        set_path_segments(entry, rest, new_value);
    }
}

/// Remove a (possibly nested) field by dot-path. No-op if absent.
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    remove_path_segments(value, &segments)
}

fn remove_path_segments(value: &mut Value, segments: &[&str]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;
    let map = value.as_object_mut()?;
    if rest.is_empty() {
        map.remove(*head)
    } else {
        remove_path_segments(map.get_mut(*head)?, rest)
    }
}

/// Total-ish ordering over JSON scalars used by both the filter evaluator's
/// comparison operators and the sort stage: numbers
/// compare numerically, strings lexically (locale-aware comparison is not
/// available without an extra dependency; byte-order is the documented
/// coercion), booleans with `false < true`, otherwise values are compared
/// as their string rendering.
pub fn compare_json(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// `true` when a field is absent or explicitly `null`.
pub fn is_nullish(value: Option<&Value>) -> bool {
    value.map_or(true, |v| v.is_null())
}

/// Tokenize text for the inverted search index: lowercase,
/// split on non-alphanumeric boundaries, drop empties.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// Collect every string found at `path` within `record`, recursing into
/// arrays so a searchable path pointing at an array of strings indexes each
/// element.
pub fn strings_at_path(record: &Value, path: &str) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(found) = get_path(record, path) {
        collect_strings(found, &mut out);
    }
    out
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_resolves_nested_fields() {
        let record = json!({"address": {"city": "Bristol"}});
        assert_eq!(get_path(&record, "address.city"), Some(&json!("Bristol")));
        assert_eq!(get_path(&record, "address.zip"), None);
        assert_eq!(get_path(&record, "missing.deep"), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut record = json!({});
        set_path(&mut record, "address.city", json!("Bath"));
        assert_eq!(record, json!({"address": {"city": "Bath"}}));
    }

    #[test]
    fn remove_path_drops_nested_field() {
        let mut record = json!({"a": {"b": 1, "c": 2}});
        let removed = remove_path(&mut record, "a.b");
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(record, json!({"a": {"c": 2}}));
    }

    #[test]
    fn tokenize_splits_and_lowercases() {
        assert_eq!(
            tokenize("Hello, World! Rust-lang"),
            vec!["hello", "world", "rust", "lang"]
        );
    }

    #[test]
    fn compare_json_orders_numbers_and_bools() {
        assert_eq!(compare_json(&json!(1), &json!(2)), std::cmp::Ordering::Less);
        assert_eq!(compare_json(&json!(false), &json!(true)), std::cmp::Ordering::Less);
    }

    #[test]
    fn is_nullish_treats_missing_and_null_alike() {
        assert!(is_nullish(None));
        assert!(is_nullish(Some(&Value::Null)));
        assert!(!is_nullish(Some(&json!(0))));
    }

    #[test]
    fn strings_at_path_recurses_into_arrays() {
        let record = json!({"tags": ["Rust", "Systems"]});
        assert_eq!(strings_at_path(&record, "tags"), vec!["Rust", "Systems"]);
    }
}
