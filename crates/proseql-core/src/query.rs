//! Query orchestrator: composes the filter evaluator, populate,
//! computed fields, sort/paginate/select, cursor pagination, and aggregate
//! modules into one read pipeline over a snapshot captured at the start of
//! each call.
//!
//! Candidates are narrowed through equality/search indexes when the
//! top-level where-clause allows it, but the full filter always re-runs
//! afterward — narrowing is an optimization, never the source of truth.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::aggregate::{self, Aggregate, GroupedAggregate};
use crate::collection::CollectionState;
use crate::computed;
use crate::config::CollectionConfig;
use crate::cursor::{self, CursorConfig, Page};
use crate::error::{Error, Result};
use crate::filter::{self, RelationshipLookup};
use crate::indexes::EqualityIndex;
use crate::mutation::is_soft_deleted;
use crate::populate::{self, PopulateNode, PopulateTree};
use crate::sort_paginate_select::{self, apply_select, edges_in_select, parse_select, Select, SortKey};
use crate::value::{strings_at_path, tokenize, Record};
use crate::workspace::CollectionSource;

/// An offset/limit query.
#[derive(Debug, Clone)]
pub struct Query {
    pub filter: Value,
    pub populate: Option<Value>,
    pub select: Option<Value>,
    pub sort: Vec<SortKey>,
    pub offset: Option<f64>,
    pub limit: Option<f64>,
}

impl Default for Query {
    fn default() -> Self {
        Query {
            filter: Value::Object(serde_json::Map::new()),
            populate: None,
            select: None,
            sort: Vec::new(),
            offset: None,
            limit: None,
        }
    }
}

/// A cursor-paginated query.
#[derive(Debug, Clone)]
pub struct CursorQuery {
    pub filter: Value,
    pub populate: Option<Value>,
    pub select: Option<Value>,
    pub sort: Vec<SortKey>,
    pub cursor: CursorConfig,
}

/// Resolves relationships lazily against a captured snapshot, caching each
/// collection's mapping the first time it's touched.
struct SnapshotLookup<'a> {
    source: &'a dyn CollectionSource,
    cache: RefCell<HashMap<String, Arc<CollectionState>>>,
}

impl<'a> SnapshotLookup<'a> {
    fn new(source: &'a dyn CollectionSource) -> Self {
        SnapshotLookup { source, cache: RefCell::new(HashMap::new()) }
    }

    fn state(&self, collection: &str) -> Option<Arc<CollectionState>> {
        if let Some(cached) = self.cache.borrow().get(collection) {
            return Some(cached.clone());
        }
        let snapshot = self.source.snapshot(collection)?;
        self.cache.borrow_mut().insert(collection.to_string(), snapshot.clone());
        Some(snapshot)
    }
}

impl<'a> RelationshipLookup for SnapshotLookup<'a> {
    fn config_for(&self, collection: &str) -> Option<CollectionConfig> {
        self.source.config(collection).map(|config| (*config).clone())
    }

    fn ref_target(&self, collection: &str, id: &str) -> Option<Record> {
        self.state(collection)?.get(id).cloned().filter(|record| !is_soft_deleted(record))
    }

    fn inverse_targets(&self, collection: &str, foreign_key: &str, id: &str) -> Vec<Record> {
        match self.state(collection) {
            Some(state) => state
                .iter_in_order()
                .filter(|record| !is_soft_deleted(record) && record.get(foreign_key).and_then(Value::as_str) == Some(id))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

fn parse_populate_tree(value: &Value) -> PopulateTree {
    match value {
        Value::Array(fields) => fields
            .iter()
            .filter_map(Value::as_str)
            .map(|field| (field.to_string(), PopulateNode::Shallow))
            .collect(),
        Value::Object(obj) => obj
            .iter()
            .filter_map(|(field, spec)| match spec {
                Value::Bool(true) => Some((field.clone(), PopulateNode::Shallow)),
                Value::Object(_) => Some((field.clone(), PopulateNode::Nested(parse_populate_tree(spec)))),
                _ => None,
            })
            .collect(),
        _ => PopulateTree::new(),
    }
}

/// Derive an implicit populate set from a select tree:
/// every edge the selection names, populated one level shallow.
fn implicit_populate_tree(select: &Select) -> PopulateTree {
    edges_in_select(select).into_iter().map(|edge| (edge, PopulateNode::Shallow)).collect()
}

fn parse_search_clause(clause: &Value) -> (String, Vec<String>) {
    if let Some(query) = clause.as_str() {
        return (query.to_string(), Vec::new());
    }
    if let Some(obj) = clause.as_object() {
        let query = obj.get("query").and_then(Value::as_str).unwrap_or_default().to_string();
        let fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        return (query, fields);
    }
    (String::new(), Vec::new())
}

fn equality_narrow(index: &EqualityIndex, clause: &Value) -> Option<HashSet<String>> {
    if let Some(obj) = clause.as_object() {
        if obj.len() == 1 {
            if let Some(eq) = obj.get("$eq") {
                return Some(index.lookup(eq));
            }
            if let Some(Value::Array(list)) = obj.get("$in") {
                return Some(index.lookup_any(list));
            }
        }
        return None;
    }
    Some(index.lookup(clause))
}

/// Narrow the candidate id set via any top-level equality/search clauses
///. Returns `None` when nothing in the where-clause maps
/// to an index, meaning every row is a candidate.
fn narrow_candidates(state: &CollectionState, filter: &Value) -> Option<HashSet<String>> {
    let obj = filter.as_object()?;
    let mut narrowed: Option<HashSet<String>> = None;
    let intersect = |acc: Option<HashSet<String>>, ids: HashSet<String>| -> Option<HashSet<String>> {
        Some(match acc {
            Some(current) => current.intersection(&ids).cloned().collect(),
            None => ids,
        })
    };

    for (key, clause) in obj {
        if key == "$search" {
            if let Some(search_index) = &state.indexes.search {
                let (query_text, _fields) = parse_search_clause(clause);
                let tokens = tokenize(&query_text);
                if !tokens.is_empty() {
                    narrowed = intersect(narrowed, search_index.lookup(&tokens));
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        let Some(index) = state.indexes.equality.get(key) else { continue };
        let Some(ids) = equality_narrow(index, clause) else { continue };
        narrowed = intersect(narrowed, ids);
    }
    narrowed
}

fn has_top_level_search(filter: &Value) -> bool {
    filter.as_object().map_or(false, |obj| obj.contains_key("$search"))
}

fn relevance_score(record: &Value, search_fields: &[String], query_tokens: &[String]) -> f64 {
    let mut doc_tokens: HashSet<String> = HashSet::new();
    for field in search_fields {
        for text in strings_at_path(record, field) {
            doc_tokens.extend(tokenize(&text));
        }
    }
    query_tokens.iter().filter(|qt| doc_tokens.iter().any(|dt| dt.starts_with(qt.as_str()))).count() as f64
}

/// Relevance sort: used in place of an explicit sort when the
/// where-clause carries a top-level `$search` and no sort was given. Stable
/// on ties, so the sort-stability law still holds.
fn relevance_sort(records: &mut Vec<Value>, filter: &Value, config: &CollectionConfig) {
    let Some(clause) = filter.as_object().and_then(|obj| obj.get("$search")) else { return };
    let (query_text, fields) = parse_search_clause(clause);
    let query_tokens = tokenize(&query_text);
    let search_fields = if fields.is_empty() { config.search_index.clone() } else { fields };

    let mut scored: Vec<(f64, Value)> = records
        .drain(..)
        .map(|record| {
            let score = relevance_score(&record, &search_fields, &query_tokens);
            (score, record)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    *records = scored.into_iter().map(|(_, record)| record).collect();
}

/// Populate → resolve-computed (lazy-skip) → filter, against a freshly
/// captured snapshot. Shared by offset/limit queries, cursor queries, and
/// aggregates — none of which sort, paginate, or select candidates the
/// same way, but all three need the same filtered, populated document set.
fn candidate_records(
    source: &dyn CollectionSource,
    collection: &str,
    filter: &Value,
    populate_value: Option<&Value>,
    select: &Select,
) -> Result<(Vec<Value>, Arc<CollectionConfig>)> {
    let config = source
        .config(collection)
        .ok_or_else(|| Error::validation(format!("unknown collection '{collection}'")))?;
    let state = source
        .snapshot(collection)
        .ok_or_else(|| Error::validation(format!("unknown collection '{collection}'")))?;
    let lookup = SnapshotLookup::new(source);

    let populate_tree = match populate_value {
        Some(value) => parse_populate_tree(value),
        None => implicit_populate_tree(select),
    };

    let candidate_ids = narrow_candidates(&state, filter);
    let ordered_ids: Vec<&str> = state
        .order
        .iter()
        .filter(|id| candidate_ids.as_ref().map_or(true, |set| set.contains(id.as_str())))
        .map(String::as_str)
        .collect();

    let mut results = Vec::with_capacity(ordered_ids.len());
    for id in ordered_ids {
        let Some(record) = state.get(id) else { continue };
        if is_soft_deleted(record) {
            continue;
        }
        let mut draft = record.clone();
        populate::populate(&mut draft, &populate_tree, &config, &lookup)?;
        if computed::should_resolve(&config, select) {
            computed::resolve(&mut draft, &config);
        }
        if filter::evaluate(&draft, filter, &config, &lookup, source.plugins()) {
            results.push(Value::Object(draft));
        }
    }
    Ok((results, config))
}

/// Run an offset/limit query.
pub fn find(source: &dyn CollectionSource, collection: &str, query: &Query) -> Result<Vec<Value>> {
    let select = parse_select(query.select.as_ref());
    let (mut records, config) = candidate_records(source, collection, &query.filter, query.populate.as_ref(), &select)?;

    if !query.sort.is_empty() {
        sort_paginate_select::sort(&mut records, &query.sort);
    } else if has_top_level_search(&query.filter) {
        relevance_sort(&mut records, &query.filter, &config);
    }

    let paged = sort_paginate_select::paginate(records, query.offset, query.limit);
    Ok(paged.iter().map(|record| apply_select(record, &select)).collect())
}

/// Run a cursor-paginated query: `… → sort →
/// cursor-split → select`.
pub fn find_cursor(source: &dyn CollectionSource, collection: &str, query: &CursorQuery) -> Result<Page> {
    let select = parse_select(query.select.as_ref());
    let (mut records, _config) = candidate_records(source, collection, &query.filter, query.populate.as_ref(), &select)?;

    let sort_keys = cursor::resolve_sort_keys(&query.sort, &query.cursor.key)?;
    sort_paginate_select::sort(&mut records, &sort_keys);
    let page = cursor::paginate_cursor(&records, &query.cursor)?;

    Ok(Page {
        items: page.items.iter().map(|record| apply_select(record, &select)).collect(),
        page_info: page.page_info,
    })
}

/// Scalar aggregate over the filtered, un-paginated candidate set (spec
/// §4.6).
pub fn run_aggregate(source: &dyn CollectionSource, collection: &str, filter: &Value, field: &str) -> Result<Aggregate> {
    let (records, _config) = candidate_records(source, collection, filter, None, &Select::All)?;
    Ok(aggregate::aggregate(&records, field))
}

/// Grouped aggregate over the filtered, un-paginated candidate set (spec
/// §4.6).
pub fn run_aggregate_grouped(
    source: &dyn CollectionSource,
    collection: &str,
    filter: &Value,
    group_by: &[String],
    field: &str,
) -> Result<Vec<GroupedAggregate>> {
    let (records, _config) = candidate_records(source, collection, filter, None, &Select::All)?;
    Ok(aggregate::aggregate_grouped(&records, group_by, field))
}
