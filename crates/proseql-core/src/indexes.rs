//! Equality and inverted search indexes: built from a snapshot,
//! then maintained incrementally (delta-based, not rebuilt) on every
//! mutation.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::value::{get_path, strings_at_path, tokenize};

fn canonical_key(value: Option<&Value>) -> String {
    match value {
        Some(v) if !v.is_null() => serde_json::to_string(v).unwrap_or_default(),
        _ => "\u{0}null".to_string(),
    }
}

/// Value → id-set for one configured field path.
#[derive(Default, Clone)]
pub struct EqualityIndex {
    buckets: HashMap<String, HashSet<String>>,
}

impl EqualityIndex {
    pub fn build<'a>(path: &str, records: impl Iterator<Item = (&'a str, &'a Value)>) -> Self {
        let mut index = EqualityIndex::default();
        for (id, record) in records {
            index.insert(id, get_path(record, path));
        }
        index
    }

    pub fn insert(&mut self, id: &str, value: Option<&Value>) {
        self.buckets
            .entry(canonical_key(value))
            .or_default()
            .insert(id.to_string());
    }

    pub fn remove(&mut self, id: &str, value: Option<&Value>) {
        let key = canonical_key(value);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    /// Delta update: move `id` from the `old` value's bucket to the `new`
    /// value's bucket. A no-op when the value didn't change.
    pub fn update(&mut self, id: &str, old: Option<&Value>, new: Option<&Value>) {
        if canonical_key(old) == canonical_key(new) {
            return;
        }
        self.remove(id, old);
        self.insert(id, new);
    }

    pub fn lookup(&self, value: &Value) -> HashSet<String> {
        self.buckets.get(&canonical_key(Some(value))).cloned().unwrap_or_default()
    }

    /// Union of the id-sets for each value in an `$in` list.
    pub fn lookup_any(&self, values: &[Value]) -> HashSet<String> {
        let mut out = HashSet::new();
        for value in values {
            out.extend(self.lookup(value));
        }
        out
    }
}

/// Token → id-set inverted index spanning every configured `searchIndex`
/// path for one collection.
#[derive(Default, Clone)]
pub struct SearchIndex {
    paths: Vec<String>,
    buckets: HashMap<String, HashSet<String>>,
}

impl SearchIndex {
    pub fn build<'a>(paths: Vec<String>, records: impl Iterator<Item = (&'a str, &'a Value)>) -> Self {
        let mut index = SearchIndex { paths, buckets: HashMap::new() };
        for (id, record) in records {
            for token in index.tokens_for(record) {
                index.buckets.entry(token).or_default().insert(id.to_string());
            }
        }
        index
    }

    fn tokens_for(&self, record: &Value) -> HashSet<String> {
        let mut tokens = HashSet::new();
        for path in &self.paths {
            for text in strings_at_path(record, path) {
                tokens.extend(tokenize(&text));
            }
        }
        tokens
    }

    pub fn tokens_for_record(&self, record: &Value) -> HashSet<String> {
        self.tokens_for(record)
    }

    pub fn insert(&mut self, id: &str, tokens: &HashSet<String>) {
        for token in tokens {
            self.buckets.entry(token.clone()).or_default().insert(id.to_string());
        }
    }

    pub fn remove(&mut self, id: &str, tokens: &HashSet<String>) {
        for token in tokens {
            if let Some(bucket) = self.buckets.get_mut(token) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.buckets.remove(token);
                }
            }
        }
    }

    /// Delta update between a record's old and new token sets.
    pub fn update(&mut self, id: &str, old_tokens: &HashSet<String>, new_tokens: &HashSet<String>) {
        let removed: HashSet<&String> = old_tokens.difference(new_tokens).collect();
        let added: HashSet<&String> = new_tokens.difference(old_tokens).collect();
        for token in removed {
            if let Some(bucket) = self.buckets.get_mut(token) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.buckets.remove(token);
                }
            }
        }
        for token in added {
            self.buckets.entry(token.clone()).or_default().insert(id.to_string());
        }
    }

    fn ids_for_token(&self, token: &str) -> HashSet<String> {
        let mut out = HashSet::new();
        for (indexed_token, ids) in &self.buckets {
            if indexed_token.starts_with(token) {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    /// Lookup with AND semantics across query tokens and prefix fallback
    /// per token; empty if any token has no match.
    pub fn lookup(&self, query_tokens: &[String]) -> HashSet<String> {
        let mut result: Option<HashSet<String>> = None;
        for token in query_tokens {
            let matches = self.ids_for_token(token);
            result = Some(match result {
                Some(acc) => acc.intersection(&matches).cloned().collect(),
                None => matches,
            });
            if result.as_ref().map_or(false, HashSet::is_empty) {
                break;
            }
        }
        result.unwrap_or_default()
    }
}

/// The full set of derived indexes for one collection, kept consistent
/// with the live mapping by delta updates on every mutation.
#[derive(Default, Clone)]
pub struct CollectionIndexes {
    pub equality: HashMap<String, EqualityIndex>,
    pub search: Option<SearchIndex>,
}

impl CollectionIndexes {
    pub fn build<'a>(
        equality_paths: &[String],
        search_paths: &[String],
        records: impl Iterator<Item = (&'a str, &'a Value)> + Clone,
    ) -> Self {
        let mut equality = HashMap::new();
        for path in equality_paths {
            equality.insert(path.clone(), EqualityIndex::build(path, records.clone()));
        }
        let search = if search_paths.is_empty() {
            None
        } else {
            Some(SearchIndex::build(search_paths.to_vec(), records))
        };
        CollectionIndexes { equality, search }
    }

    pub fn on_create(&mut self, id: &str, record: &Value) {
        for (path, index) in &mut self.equality {
            index.insert(id, get_path(record, path));
        }
        if let Some(search) = &mut self.search {
            let tokens = search.tokens_for_record(record);
            search.insert(id, &tokens);
        }
    }

    pub fn on_update(&mut self, id: &str, before: &Value, after: &Value) {
        for (path, index) in &mut self.equality {
            index.update(id, get_path(before, path), get_path(after, path));
        }
        if let Some(search) = &mut self.search {
            let old_tokens = search.tokens_for_record(before);
            let new_tokens = search.tokens_for_record(after);
            search.update(id, &old_tokens, &new_tokens);
        }
    }

    pub fn on_delete(&mut self, id: &str, record: &Value) {
        for (path, index) in &mut self.equality {
            index.remove(id, get_path(record, path));
        }
        if let Some(search) = &mut self.search {
            let tokens = search.tokens_for_record(record);
            search.remove(id, &tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_index_builds_and_looks_up() {
        let a = json!({"id": "1", "role": "admin"});
        let b = json!({"id": "2", "role": "guest"});
        let records = vec![("1", &a), ("2", &b)];
        let index = EqualityIndex::build("role", records.into_iter());
        assert_eq!(index.lookup(&json!("admin")), HashSet::from(["1".to_string()]));
        assert_eq!(index.lookup(&json!("missing")), HashSet::new());
    }

    #[test]
    fn equality_index_update_moves_bucket() {
        let mut index = EqualityIndex::default();
        index.insert("1", Some(&json!("admin")));
        index.update("1", Some(&json!("admin")), Some(&json!("guest")));
        assert!(index.lookup(&json!("admin")).is_empty());
        assert_eq!(index.lookup(&json!("guest")), HashSet::from(["1".to_string()]));
    }

    #[test]
    fn search_index_requires_all_tokens_with_prefix_fallback() {
        let a = json!({"id": "1", "bio": "distributed systems engineer"});
        let b = json!({"id": "2", "bio": "frontend developer"});
        let records = vec![("1", &a), ("2", &b)];
        let index = SearchIndex::build(vec!["bio".to_string()], records.into_iter());
        assert_eq!(
            index.lookup(&["distrib".to_string(), "engin".to_string()]),
            HashSet::from(["1".to_string()])
        );
        assert!(index.lookup(&["nonexistent".to_string()]).is_empty());
    }

    #[test]
    fn search_index_delta_update_moves_tokens() {
        let mut index = SearchIndex { paths: vec!["bio".to_string()], buckets: HashMap::new() };
        let old: HashSet<String> = ["rust".to_string()].into();
        let new: HashSet<String> = ["golang".to_string()].into();
        index.insert("1", &old);
        index.update("1", &old, &new);
        assert!(index.lookup(&["rust".to_string()]).is_empty());
        assert_eq!(index.lookup(&["golang".to_string()]), HashSet::from(["1".to_string()]));
    }
}
