//! Populate: resolves `ref`/`inverse` relationships into
//! nested entities, raising a dangling-reference error for a non-null
//! `ref` foreign key whose target row is missing. Nesting follows a
//! finite populate tree, so relationship cycles in the data graph are
//! bounded by the declared config depth, not runtime cycle detection
//!.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::{CollectionConfig, RelationshipKind};
use crate::error::{Error, Result};
use crate::filter::RelationshipLookup;
use crate::value::Record;

#[derive(Debug, Clone)]
pub enum PopulateNode {
    Shallow,
    Nested(PopulateTree),
}

pub type PopulateTree = HashMap<String, PopulateNode>;

/// Populate every edge named in `tree` onto `record`, mutating it in
/// place by inserting the edge name as a key holding the resolved
/// entity/entities.
pub fn populate(
    record: &mut Record,
    tree: &PopulateTree,
    config: &CollectionConfig,
    lookup: &dyn RelationshipLookup,
) -> Result<()> {
    for (edge, node) in tree {
        let Some(rel) = config.relationships.get(edge) else {
            continue;
        };
        match rel.kind {
            RelationshipKind::Ref => {
                let fk = record.get(&rel.foreign_key).cloned();
                let resolved = match fk {
                    None | Some(Value::Null) => Value::Null,
                    Some(Value::String(id)) => match lookup.ref_target(&rel.target, &id) {
                        Some(mut target) => {
                            if let PopulateNode::Nested(sub_tree) = node {
                                if let Some(target_config) = lookup.config_for(&rel.target) {
                                    populate(&mut target, sub_tree, &target_config, lookup)?;
                                }
                            }
                            Value::Object(target)
                        }
                        None => {
                            return Err(Error::DanglingReference {
                                collection: config.name.clone(),
                                field: edge.clone(),
                                target_id: id,
                            })
                        }
                    },
                    Some(other) => other,
                };
                record.insert(edge.clone(), resolved);
            }
            RelationshipKind::Inverse => {
                let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else {
                    record.insert(edge.clone(), Value::Array(Vec::new()));
                    continue;
                };
                let mut siblings = lookup.inverse_targets(&rel.target, &rel.foreign_key, &id);
                if let PopulateNode::Nested(sub_tree) = node {
                    if let Some(target_config) = lookup.config_for(&rel.target) {
                        for sibling in &mut siblings {
                            populate(sibling, sub_tree, &target_config, lookup)?;
                        }
                    }
                }
                record.insert(
                    edge.clone(),
                    Value::Array(siblings.into_iter().map(Value::Object).collect()),
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationshipConfig;
    use serde_json::json;
    use std::collections::HashMap as Map;

    struct FakeLookup {
        targets: Map<String, Record>,
        inverse: Map<String, Vec<Record>>,
        configs: Map<String, CollectionConfig>,
    }

    impl RelationshipLookup for FakeLookup {
        fn config_for(&self, collection: &str) -> Option<CollectionConfig> {
            self.configs.get(collection).cloned()
        }
        fn ref_target(&self, _collection: &str, id: &str) -> Option<Record> {
            self.targets.get(id).cloned()
        }
        fn inverse_targets(&self, collection: &str, _foreign_key: &str, _id: &str) -> Vec<Record> {
            self.inverse.get(collection).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn ref_populate_attaches_target_or_null() {
        let config = CollectionConfig::builder("users")
            .relationship("company", RelationshipConfig::reference("companies", "companyId"))
            .build();
        let mut targets = Map::new();
        targets.insert("c1".to_string(), json!({"id": "c1", "name": "Acme"}).as_object().unwrap().clone());
        let lookup = FakeLookup { targets, inverse: Map::new(), configs: Map::new() };

        let mut record = json!({"id": "u1", "companyId": "c1"}).as_object().unwrap().clone();
        let mut tree = PopulateTree::new();
        tree.insert("company".to_string(), PopulateNode::Shallow);
        populate(&mut record, &tree, &config, &lookup).unwrap();
        assert_eq!(record["company"]["name"], json!("Acme"));

        let mut record_no_fk = json!({"id": "u2", "companyId": null}).as_object().unwrap().clone();
        populate(&mut record_no_fk, &tree, &config, &lookup).unwrap();
        assert_eq!(record_no_fk["company"], Value::Null);
    }

    #[test]
    fn dangling_ref_is_an_error() {
        let config = CollectionConfig::builder("users")
            .relationship("company", RelationshipConfig::reference("companies", "companyId"))
            .build();
        let lookup = FakeLookup { targets: Map::new(), inverse: Map::new(), configs: Map::new() };
        let mut record = json!({"id": "u1", "companyId": "missing"}).as_object().unwrap().clone();
        let mut tree = PopulateTree::new();
        tree.insert("company".to_string(), PopulateNode::Shallow);
        let err = populate(&mut record, &tree, &config, &lookup).unwrap_err();
        assert!(matches!(err, Error::DanglingReference { .. }));
    }

    #[test]
    fn inverse_populate_collects_siblings() {
        let config = CollectionConfig::builder("companies")
            .relationship("employees", RelationshipConfig::inverse("users", "companyId"))
            .build();
        let mut inverse = Map::new();
        inverse.insert(
            "users".to_string(),
            vec![json!({"id": "u1"}).as_object().unwrap().clone(), json!({"id": "u2"}).as_object().unwrap().clone()],
        );
        let lookup = FakeLookup { targets: Map::new(), inverse, configs: Map::new() };
        let mut record = json!({"id": "c1"}).as_object().unwrap().clone();
        let mut tree = PopulateTree::new();
        tree.insert("employees".to_string(), PopulateNode::Shallow);
        populate(&mut record, &tree, &config, &lookup).unwrap();
        assert_eq!(record["employees"].as_array().unwrap().len(), 2);
    }
}
