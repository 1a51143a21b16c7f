//! Cursor pagination: keyset pagination tied to a single sort
//! key, injecting an ascending sort when none is given, with select
//! applied after cursor extraction so cursor values always see
//! pre-projection fields.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::sort_paginate_select::{SortDirection, SortKey};
use crate::value::get_path;

#[derive(Debug, Clone)]
pub struct CursorConfig {
    pub key: String,
    pub after: Option<String>,
    pub before: Option<String>,
    pub first: Option<usize>,
    pub last: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Value>,
    pub page_info: PageInfo,
}

fn encode_cursor(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn decode_cursor(cursor: &str) -> Result<Value> {
    serde_json::from_str(cursor).map_err(|_| Error::validation(format!("malformed cursor: {cursor}")))
}

/// Fail if an explicit sort's primary key disagrees with the cursor key
///; inject an ascending sort on the cursor key when no sort
/// was provided.
pub fn resolve_sort_keys(explicit: &[SortKey], cursor_key: &str) -> Result<Vec<SortKey>> {
    match explicit.first() {
        Some(primary) if primary.path != cursor_key => Err(Error::validation(format!(
            "cursor key '{cursor_key}' must match the primary sort key, got '{}'",
            primary.path
        ))),
        Some(_) => Ok(explicit.to_vec()),
        None => Ok(vec![SortKey { path: cursor_key.to_string(), direction: SortDirection::Asc }]),
    }
}

/// Walk the already-sorted `records` to the cursor position and take the
/// requested window, returning the page plus `pageInfo`.
pub fn paginate_cursor(records: &[Value], config: &CursorConfig) -> Result<Page> {
    let mut start = 0usize;
    if let Some(after) = &config.after {
        let after_value = decode_cursor(after)?;
        start = records
            .iter()
            .position(|r| get_path(r, &config.key) == Some(&after_value))
            .map(|i| i + 1)
            .unwrap_or(records.len());
    }
    let mut end = records.len();
    if let Some(before) = &config.before {
        let before_value = decode_cursor(before)?;
        end = records
            .iter()
            .position(|r| get_path(r, &config.key) == Some(&before_value))
            .unwrap_or(records.len());
    }
    if start > end {
        start = end;
    }
    let window = &records[start..end];

    let (slice, has_previous_page, has_next_page): (Vec<Value>, bool, bool) =
        if let Some(first) = config.first {
            let slice = window.iter().take(first).cloned().collect::<Vec<_>>();
            (slice, start > 0, window.len() > first)
        } else if let Some(last) = config.last {
            let skip = window.len().saturating_sub(last);
            let slice = window[skip..].to_vec();
            (slice, skip > 0 || start > 0, end < records.len())
        } else {
            (window.to_vec(), start > 0, end < records.len())
        };

    let start_cursor = slice.first().and_then(|r| get_path(r, &config.key)).map(encode_cursor);
    let end_cursor = slice.last().and_then(|r| get_path(r, &config.key)).map(encode_cursor);

    Ok(Page {
        items: slice,
        page_info: PageInfo { has_next_page, has_previous_page, start_cursor, end_cursor },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ten_users() -> Vec<Value> {
        (0..10).map(|n| json!({"id": format!("u{n}")})).collect()
    }

    #[test]
    fn injects_ascending_sort_when_absent() {
        let keys = resolve_sort_keys(&[], "id").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].path, "id");
        assert_eq!(keys[0].direction, SortDirection::Asc);
    }

    #[test]
    fn mismatched_explicit_sort_key_is_a_validation_error() {
        let explicit = vec![SortKey { path: "name".into(), direction: SortDirection::Asc }];
        let err = resolve_sort_keys(&explicit, "id").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn first_page_then_next_page_via_end_cursor() {
        let users = ten_users();
        let config = CursorConfig { key: "id".into(), after: None, before: None, first: Some(3), last: None };
        let page1 = paginate_cursor(&users, &config).unwrap();
        assert_eq!(page1.items.len(), 3);
        assert_eq!(page1.items[0]["id"], json!("u0"));
        assert!(page1.page_info.has_next_page);
        assert!(!page1.page_info.has_previous_page);

        let config2 = CursorConfig {
            key: "id".into(),
            after: page1.page_info.end_cursor.clone(),
            before: None,
            first: Some(3),
            last: None,
        };
        let page2 = paginate_cursor(&users, &config2).unwrap();
        let ids: Vec<&str> = page2.items.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["u3", "u4", "u5"]);
        assert!(page2.page_info.has_previous_page);
    }
}
