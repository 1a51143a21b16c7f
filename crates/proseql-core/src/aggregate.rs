//! Aggregate engine: count/sum/avg/min/max over the filtered,
//! un-paginated candidate list, optionally grouped with first-encounter
//! group order.

use std::collections::HashMap;

use serde_json::Value;

use crate::value::{compare_json, get_path};

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub count: u64,
    pub sum: f64,
    pub avg: Option<f64>,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

/// Scalar aggregate over `field` across every record: `count`
/// counts every record regardless of whether `field` is numeric; `sum` is
/// 0 on an empty numeric set; `avg` is `None` when no value was numeric;
/// `min`/`max` are `None` on an empty numeric set.
pub fn aggregate(records: &[Value], field: &str) -> Aggregate {
    let mut count = 0u64;
    let mut sum = 0.0;
    let mut numeric_count = 0u64;
    let mut min: Option<Value> = None;
    let mut max: Option<Value> = None;

    for record in records {
        count += 1;
        let Some(value) = get_path(record, field) else { continue };
        let Some(n) = value.as_f64() else { continue };
        sum += n;
        numeric_count += 1;
        min = Some(match min {
            None => value.clone(),
            Some(current) if compare_json(value, &current).is_lt() => value.clone(),
            Some(current) => current,
        });
        max = Some(match max {
            None => value.clone(),
            Some(current) if compare_json(value, &current).is_gt() => value.clone(),
            Some(current) => current,
        });
    }

    Aggregate {
        count,
        sum,
        avg: (numeric_count > 0).then(|| sum / numeric_count as f64),
        min,
        max,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedAggregate {
    pub group: Vec<Value>,
    pub aggregate: Aggregate,
}

/// Grouped aggregate: one entry per distinct tuple of `group_by` field
/// values, in first-encounter order. `null` forms its own group.
pub fn aggregate_grouped(records: &[Value], group_by: &[String], field: &str) -> Vec<GroupedAggregate> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Vec<Value>, Vec<Value>)> = HashMap::new();

    for record in records {
        let group_values: Vec<Value> = group_by
            .iter()
            .map(|path| get_path(record, path).cloned().unwrap_or(Value::Null))
            .collect();
        let key = serde_json::to_string(&group_values).unwrap_or_default();
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key.clone());
                (group_values, Vec::new())
            })
            .1
            .push(record.clone());
    }

    order
        .into_iter()
        .map(|key| {
            let (group, members) = groups.remove(&key).expect("key present from first-encounter scan");
            GroupedAggregate { group, aggregate: aggregate(&members, field) }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_aggregate_skips_non_numeric_values() {
        let records = vec![json!({"score": 10}), json!({"score": "n/a"}), json!({"score": 20})];
        let agg = aggregate(&records, "score");
        assert_eq!(agg.count, 3);
        assert_eq!(agg.sum, 30.0);
        assert_eq!(agg.avg, Some(15.0));
        assert_eq!(agg.min, Some(json!(10)));
        assert_eq!(agg.max, Some(json!(20)));
    }

    #[test]
    fn empty_aggregate_has_zero_sum_and_no_avg_or_bounds() {
        let agg = aggregate(&[], "score");
        assert_eq!(agg.count, 0);
        assert_eq!(agg.sum, 0.0);
        assert_eq!(agg.avg, None);
        assert_eq!(agg.min, None);
    }

    #[test]
    fn grouped_aggregate_preserves_first_encounter_order() {
        let records = vec![
            json!({"team": "b", "score": 1}),
            json!({"team": "a", "score": 2}),
            json!({"team": "b", "score": 3}),
        ];
        let grouped = aggregate_grouped(&records, &["team".to_string()], "score");
        let teams: Vec<&str> = grouped.iter().map(|g| g.group[0].as_str().unwrap()).collect();
        assert_eq!(teams, vec!["b", "a"]);
        assert_eq!(grouped[0].aggregate.count, 2);
        assert_eq!(grouped[0].aggregate.sum, 4.0);
    }

    #[test]
    fn grouped_count_sums_to_overall_count() {
        let records = vec![json!({"team": "a"}), json!({"team": "b"}), json!({"team": "a"})];
        let overall = aggregate(&records, "score").count;
        let grouped = aggregate_grouped(&records, &["team".to_string()], "score");
        let grouped_total: u64 = grouped.iter().map(|g| g.aggregate.count).sum();
        assert_eq!(overall, grouped_total);
    }
}
