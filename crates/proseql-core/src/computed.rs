//! Computed fields: pure derivations over the (possibly
//! populated) entity, elided entirely when the selection neither is
//! absent-of-constraint nor references any computed field — the
//! "lazy-skip" optimization.

use crate::config::CollectionConfig;
use crate::sort_paginate_select::Select;
use crate::value::Record;

/// `true` when the computed stage must run: the collection declares
/// computed fields, and either the selection is unconstrained (`Select::All`)
/// or it names at least one computed field.
pub fn should_resolve(config: &CollectionConfig, select: &Select) -> bool {
    if config.computed.is_empty() {
        return false;
    }
    match select {
        Select::All => true,
        Select::Fields(tree) => config.computed.keys().any(|name| tree.contains_key(name)),
    }
}

/// Derive and attach every computed field onto `record` in place.
pub fn resolve(record: &mut Record, config: &CollectionConfig) {
    let derived: Vec<(String, serde_json::Value)> = config
        .computed
        .iter()
        .map(|(name, derive)| (name.clone(), derive(record)))
        .collect();
    for (name, value) in derived {
        record.insert(name, value);
    }
}
