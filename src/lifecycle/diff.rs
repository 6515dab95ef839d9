//! Row and cell level comparison of two snapshots.
//!
//! [`diff_snapshots`] is pure: it never touches the snapshot store. Saving the
//! baseline after an [`DiffOutcome::Initial`] result is the caller's job.

use super::snapshot::Snapshot;
use crate::error::{ClinqcError, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Column name carried by row-level change records.
pub const ROW_STATUS: &str = "ROW_STATUS";
/// New value of a row-added record.
pub const ADDED_MARKER: &str = "ADDED";
/// Old value of a row-removed record.
pub const REMOVED_MARKER: &str = "REMOVED";
/// The absent side of a row-level record.
pub const NOT_APPLICABLE: &str = "N/A";

/// One detected difference. Missing cells are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub timestamp: String,
    pub subjectkey: String,
    pub column: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    RowAdded,
    RowRemoved,
    CellModified,
}

impl ChangeRecord {
    pub fn row_added(timestamp: &str, key: &str) -> Self {
        Self {
            timestamp: timestamp.to_owned(),
            subjectkey: key.to_owned(),
            column: ROW_STATUS.to_owned(),
            old_value: Some(NOT_APPLICABLE.to_owned()),
            new_value: Some(ADDED_MARKER.to_owned()),
        }
    }

    pub fn row_removed(timestamp: &str, key: &str) -> Self {
        Self {
            timestamp: timestamp.to_owned(),
            subjectkey: key.to_owned(),
            column: ROW_STATUS.to_owned(),
            old_value: Some(REMOVED_MARKER.to_owned()),
            new_value: Some(NOT_APPLICABLE.to_owned()),
        }
    }

    pub fn cell_modified(
        timestamp: &str,
        key: &str,
        column: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Self {
        Self {
            timestamp: timestamp.to_owned(),
            subjectkey: key.to_owned(),
            column: column.to_owned(),
            old_value: old_value.map(str::to_owned),
            new_value: new_value.map(str::to_owned),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        if self.column != ROW_STATUS {
            return ChangeKind::CellModified;
        }
        if self.new_value.as_deref() == Some(ADDED_MARKER) {
            ChangeKind::RowAdded
        } else if self.old_value.as_deref() == Some(REMOVED_MARKER) {
            ChangeKind::RowRemoved
        } else {
            ChangeKind::CellModified
        }
    }
}

/// Result of comparing the current snapshot against the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// No previous snapshot: the current one becomes the baseline
    Initial,
    /// Same keys and cells as the previous snapshot
    Unchanged,
    /// Changes sorted by subject key, then column
    Changed(Vec<ChangeRecord>),
}

impl DiffOutcome {
    pub fn records(&self) -> &[ChangeRecord] {
        match self {
            Self::Changed(records) => records,
            Self::Initial | Self::Unchanged => &[],
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Unchanged => "no_changes",
            Self::Changed(_) => "changed",
        }
    }
}

/// Key sets of two snapshots. `added` and `removed` are disjoint and, together with
/// `common`, cover every key of both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPartition {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub common: BTreeSet<String>,
}

pub fn partition_keys(previous: &Snapshot, current: &Snapshot) -> KeyPartition {
    let prev: BTreeSet<&str> = previous.keys().collect();
    let curr: BTreeSet<&str> = current.keys().collect();

    KeyPartition {
        added: curr.difference(&prev).map(|k| (*k).to_owned()).collect(),
        removed: prev.difference(&curr).map(|k| (*k).to_owned()).collect(),
        common: prev.intersection(&curr).map(|k| (*k).to_owned()).collect(),
    }
}

/// Fail unless both snapshots share a key column and a column set.
///
/// Column order does not matter.
pub fn check_compatible(previous: &Snapshot, current: &Snapshot) -> Result<()> {
    if previous.key_column() != current.key_column() {
        return Err(ClinqcError::Consistency(format!(
            "snapshot key column changed from '{}' to '{}'",
            previous.key_column(),
            current.key_column()
        )));
    }

    let prev: BTreeSet<&str> = previous.columns().iter().map(String::as_str).collect();
    let curr: BTreeSet<&str> = current.columns().iter().map(String::as_str).collect();
    if prev == curr {
        return Ok(());
    }

    let only_prev: Vec<&str> = prev.difference(&curr).copied().collect();
    let only_curr: Vec<&str> = curr.difference(&prev).copied().collect();
    Err(ClinqcError::Consistency(format!(
        "snapshot columns differ; only in previous: [{}], only in current: [{}]",
        only_prev.join(", "),
        only_curr.join(", ")
    )))
}

/// Compare `current` against `previous`, stamping every record with `timestamp`.
///
/// Two missing cells are equal; everything else compares by exact cleaned value.
///
/// # Errors
///
/// [`ClinqcError::Consistency`] when the snapshots have different column sets.
pub fn diff_snapshots(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    timestamp: &str,
) -> Result<DiffOutcome> {
    let Some(previous) = previous else {
        return Ok(DiffOutcome::Initial);
    };
    check_compatible(previous, current)?;

    let keys = partition_keys(previous, current);
    let mut records = Vec::new();

    records.extend(keys.added.iter().map(|k| ChangeRecord::row_added(timestamp, k)));
    records.extend(keys.removed.iter().map(|k| ChangeRecord::row_removed(timestamp, k)));

    let prev_idx: HashMap<&str, usize> = previous
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();

    for key in &keys.common {
        let (Some(old_row), Some(new_row)) =
            (previous.records().get(key), current.records().get(key))
        else {
            continue;
        };

        for (new_idx, column) in current.columns().iter().enumerate() {
            let Some(&old_idx) = prev_idx.get(column.as_str()) else {
                continue;
            };
            let old = old_row.get(old_idx).and_then(|v| v.as_deref());
            let new = new_row.get(new_idx).and_then(|v| v.as_deref());
            if old != new {
                records.push(ChangeRecord::cell_modified(timestamp, key, column, old, new));
            }
        }
    }

    if records.is_empty() {
        return Ok(DiffOutcome::Unchanged);
    }

    records.sort_by(|a, b| {
        a.subjectkey
            .cmp(&b.subjectkey)
            .then_with(|| a.column.cmp(&b.column))
    });

    tracing::info!(
        added = keys.added.len(),
        removed = keys.removed.len(),
        changes = records.len(),
        "Snapshot diff computed"
    );

    Ok(DiffOutcome::Changed(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;

    const TS: &str = "2024-03-01 09:00:00";

    fn snapshot(columns: &[&str], rows: &[&[&str]]) -> Snapshot {
        let columns = columns.iter().map(|c| (*c).to_owned()).collect();
        let rows = rows
            .iter()
            .map(|r| {
                r.iter()
                    .map(|v| (!v.is_empty()).then(|| (*v).to_owned()))
                    .collect()
            })
            .collect();
        Snapshot::from_table(&Table::from_rows(columns, rows).unwrap(), "subjectkey").unwrap()
    }

    #[test]
    fn test_no_previous_snapshot_is_initial() {
        let current = snapshot(&["subjectkey", "age"], &[&["A", "10"]]);
        assert_eq!(
            diff_snapshots(None, &current, TS).unwrap(),
            DiffOutcome::Initial
        );
    }

    #[test]
    fn test_added_removed_and_modified() {
        let cols = ["subjectkey", "age"];
        let previous = snapshot(&cols, &[&["A", "9"], &["B", "10"], &["C", "12"]]);
        let current = snapshot(&cols, &[&["A", "9"], &["B", "11"], &["D", "13"]]);

        let outcome = diff_snapshots(Some(&previous), &current, TS).unwrap();
        let records = outcome.records();

        assert_eq!(
            records,
            [
                ChangeRecord::cell_modified(TS, "B", "age", Some("10"), Some("11")),
                ChangeRecord::row_removed(TS, "C"),
                ChangeRecord::row_added(TS, "D"),
            ]
        );
        assert!(records.iter().all(|r| r.subjectkey != "A"));
        assert_eq!(records[1].kind(), ChangeKind::RowRemoved);
        assert_eq!(records[2].kind(), ChangeKind::RowAdded);
    }

    #[test]
    fn test_both_missing_is_not_a_change() {
        let cols = ["subjectkey", "age", "IQ"];
        let previous = snapshot(&cols, &[&["A", "", ""]]);
        let current = snapshot(&cols, &[&["A", "", ""]]);

        assert_eq!(
            diff_snapshots(Some(&previous), &current, TS).unwrap(),
            DiffOutcome::Unchanged
        );
    }

    #[test]
    fn test_missing_to_value_is_a_change() {
        let cols = ["subjectkey", "IQ"];
        let previous = snapshot(&cols, &[&["A", ""]]);
        let current = snapshot(&cols, &[&["A", "100"]]);

        let outcome = diff_snapshots(Some(&previous), &current, TS).unwrap();
        assert_eq!(
            outcome.records(),
            [ChangeRecord::cell_modified(TS, "A", "IQ", None, Some("100"))]
        );
    }

    #[test]
    fn test_column_order_is_ignored() {
        let previous = snapshot(&["subjectkey", "age", "site"], &[&["A", "10", "X"]]);
        let current = snapshot(&["subjectkey", "site", "age"], &[&["A", "X", "10"]]);

        assert_eq!(
            diff_snapshots(Some(&previous), &current, TS).unwrap(),
            DiffOutcome::Unchanged
        );
    }

    #[test]
    fn test_column_set_mismatch_is_consistency_error() {
        let previous = snapshot(&["subjectkey", "age"], &[&["A", "10"]]);
        let current = snapshot(&["subjectkey", "weight"], &[&["A", "10"]]);

        let err = diff_snapshots(Some(&previous), &current, TS).unwrap_err();
        assert_eq!(err.kind(), "consistency");
        assert!(err.to_string().contains("only in previous: [age]"));
        assert!(err.to_string().contains("only in current: [weight]"));
    }

    #[test]
    fn test_key_partition_covers_both_sides() {
        let cols = ["subjectkey", "age"];
        let previous = snapshot(&cols, &[&["A", "1"], &["B", "1"], &["C", "1"]]);
        let current = snapshot(&cols, &[&["B", "1"], &["C", "2"], &["D", "1"], &["E", "1"]]);

        let keys = partition_keys(&previous, &current);

        assert!(keys.added.is_disjoint(&keys.removed));
        let mut union: BTreeSet<String> = keys.added.clone();
        union.extend(keys.removed.iter().cloned());
        union.extend(keys.common.iter().cloned());
        let expected: BTreeSet<String> = previous
            .keys()
            .chain(current.keys())
            .map(str::to_owned)
            .collect();
        assert_eq!(union, expected);
    }
}
