//! Migration runner: at construction, for each versioned
//! collection whose persisted file carries a `_version` stamp below the
//! configured target, apply the ordered migration transforms to each
//! record in turn. The chain is validated up front — every migration
//! declares `(from, to)`, and the sequence from the stored version to the
//! target must cover the gap without holes or duplicates.

use crate::config::MigrationStep;
use crate::error::{Error, Result};
use crate::value::Record;

/// `$dryRunMigrations` output: the version the file is currently stamped
/// at, the collection's configured target, and the ordered list of
/// `(from, to)` steps that would run — computed without mutating
/// anything.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub current_version: u32,
    pub target_version: u32,
    pub steps: Vec<(u32, u32)>,
}

/// Validate that `migrations` forms a chain from `from_version` to
/// `target_version` with no gaps and no two steps sharing the same
/// `from`. Returns the steps in application order.
fn plan<'a>(migrations: &'a [MigrationStep], from_version: u32, target_version: u32) -> Result<Vec<&'a MigrationStep>> {
    if from_version == target_version {
        return Ok(Vec::new());
    }
    let mut by_from = std::collections::HashMap::new();
    for step in migrations {
        if by_from.insert(step.from, step).is_some() {
            return Err(Error::Migration(format!(
                "duplicate migration step declared for version {}",
                step.from
            )));
        }
    }

    let mut steps = Vec::new();
    let mut current = from_version;
    while current != target_version {
        let Some(step) = by_from.get(&current) else {
            return Err(Error::Migration(format!(
                "no migration step covers version {current} (target {target_version})"
            )));
        };
        if step.to <= current {
            return Err(Error::Migration(format!(
                "migration step {}->{} does not move forward",
                step.from, step.to
            )));
        }
        steps.push(*step);
        current = step.to;
    }
    Ok(steps)
}

/// Apply the forward migration chain to every record, returning the
/// transformed records. Fails without mutating the caller's data if the
/// chain has holes or duplicates.
pub fn apply_migrations(
    records: Vec<Record>,
    migrations: &[MigrationStep],
    from_version: u32,
    target_version: u32,
) -> Result<Vec<Record>> {
    let steps = plan(migrations, from_version, target_version)?;
    Ok(records
        .into_iter()
        .map(|record| steps.iter().fold(record, |acc, step| (step.transform)(acc)))
        .collect())
}

/// Report what [`apply_migrations`] would do, without running any
/// transform.
pub fn dry_run(migrations: &[MigrationStep], from_version: u32, target_version: u32) -> Result<MigrationReport> {
    let steps = plan(migrations, from_version, target_version)?;
    Ok(MigrationReport {
        current_version: from_version,
        target_version,
        steps: steps.into_iter().map(|s| (s.from, s.to)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn step(from: u32, to: u32, rename: Option<(&'static str, &'static str)>) -> MigrationStep {
        MigrationStep {
            from,
            to,
            transform: Arc::new(move |mut record: Record| {
                if let Some((old, new)) = rename {
                    if let Some(value) = record.remove(old) {
                        record.insert(new.to_string(), value);
                    }
                }
                record
            }),
        }
    }

    #[test]
    fn applies_chain_in_order() {
        let migrations = vec![
            step(0, 1, Some(("nm", "name"))),
            step(1, 2, Some(("name", "fullName"))),
        ];
        let records = vec![json!({"nm": "Ada"}).as_object().unwrap().clone()];
        let migrated = apply_migrations(records, &migrations, 0, 2).unwrap();
        assert_eq!(migrated[0]["fullName"], json!("Ada"));
    }

    #[test]
    fn rejects_a_chain_with_a_hole() {
        let migrations = vec![step(0, 1, None), step(2, 3, None)];
        let err = plan(&migrations, 0, 3).unwrap_err();
        assert!(matches!(err, Error::Migration(_)));
    }

    #[test]
    fn rejects_duplicate_from_versions() {
        let migrations = vec![step(0, 1, None), step(0, 2, None)];
        let err = plan(&migrations, 0, 2).unwrap_err();
        assert!(matches!(err, Error::Migration(_)));
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let migrations = vec![step(0, 1, None), step(1, 2, None)];
        let report = dry_run(&migrations, 0, 2).unwrap();
        assert_eq!(report.current_version, 0);
        assert_eq!(report.target_version, 2);
        assert_eq!(report.steps, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn no_op_when_already_at_target() {
        let migrations = vec![step(0, 1, None)];
        let migrated = apply_migrations(vec![json!({"a": 1}).as_object().unwrap().clone()], &migrations, 1, 1).unwrap();
        assert_eq!(migrated[0], json!({"a": 1}).as_object().unwrap().clone());
    }
}
