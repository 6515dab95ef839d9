//! Subject-level comparison of two cleaned versions of a dataset.
//!
//! Unlike the snapshot diff this ignores cell values. It answers "which subjects
//! entered or left", writes the affected rows for review and records the comparison in
//! a markdown changelog.

use crate::cleaning::normalize_key;
use crate::dataset::{Table, save_table};
use crate::error::{ClinqcError, Result, ResultExt as _};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

/// Column appended to version diff rows.
pub const CHANGE_TYPE_COLUMN: &str = "change_type";

/// Subjects present in only one of two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubjectDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl SubjectDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn subject_keys(table: &Table, key_column: &str) -> Result<BTreeSet<String>> {
    let idx = table
        .column_index(key_column)
        .ok_or_else(|| ClinqcError::Schema(format!("'{key_column}' not found")))?;
    Ok(table
        .rows()
        .iter()
        .filter_map(|row| normalize_key(row.get(idx).and_then(|v| v.as_deref())))
        .collect())
}

/// Added and removed subjects going from `old` to `new`. Keys are trimmed.
pub fn subject_diff(old: &Table, new: &Table, key_column: &str) -> Result<SubjectDiff> {
    let old_keys = subject_keys(old, key_column).context("old version")?;
    let new_keys = subject_keys(new, key_column).context("new version")?;

    Ok(SubjectDiff {
        added: new_keys.difference(&old_keys).cloned().collect(),
        removed: old_keys.difference(&new_keys).cloned().collect(),
    })
}

/// Write the added rows (from `new`) and removed rows (from `old`) with a
/// `change_type` column. Columns are the union of both versions; a cell missing from
/// one version is written empty.
pub fn write_version_diff(
    old: &Table,
    new: &Table,
    key_column: &str,
    diff: &SubjectDiff,
    path: &Path,
) -> Result<Table> {
    let mut columns: Vec<String> = new.columns().to_vec();
    for column in old.columns() {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }
    columns.push(CHANGE_TYPE_COLUMN.to_owned());

    let mut out = Table::new(columns.clone());
    let data_columns = &columns[..columns.len() - 1];

    for (source, keys, label) in [(new, &diff.added, "Added"), (old, &diff.removed, "Removed")] {
        let key_idx = source
            .column_index(key_column)
            .ok_or_else(|| ClinqcError::Schema(format!("'{key_column}' not found")))?;

        for row in source.rows() {
            let Some(key) = normalize_key(row.get(key_idx).and_then(|v| v.as_deref())) else {
                continue;
            };
            if !keys.contains(&key) {
                continue;
            }

            let mut cells: Vec<Option<String>> = data_columns
                .iter()
                .map(|column| {
                    source
                        .column_index(column)
                        .and_then(|idx| row.get(idx).cloned().flatten())
                })
                .collect();
            cells.push(Some(label.to_owned()));
            out.push_row(cells)?;
        }
    }

    save_table(&out, path)?;
    tracing::info!(
        added = diff.added.len(),
        removed = diff.removed.len(),
        path = %path.display(),
        "Wrote version diff"
    );
    Ok(out)
}

fn comparison_id(old_label: &str, new_label: &str) -> String {
    format!("`{old_label}` -> `{new_label}`")
}

/// Append a comparison section to a markdown changelog.
///
/// Returns `false` without writing when the same label pair is already recorded.
pub fn append_to_changelog(
    path: &Path,
    old_label: &str,
    new_label: &str,
    diff: &SubjectDiff,
    timestamp: &str,
) -> Result<bool> {
    let log_id = comparison_id(old_label, new_label);

    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    if existing.contains(&log_id) {
        tracing::warn!("Comparison {log_id} already in {}; skipping", path.display());
        return Ok(false);
    }

    let mut entry = format!("\n## Comparison: {log_id} ({timestamp})\n");
    if !diff.added.is_empty() {
        let added: Vec<&str> = diff.added.iter().map(String::as_str).collect();
        entry.push_str(&format!("- Added subjects: {}\n", added.join(", ")));
    }
    if !diff.removed.is_empty() {
        let removed: Vec<&str> = diff.removed.iter().map(String::as_str).collect();
        entry.push_str(&format!("- Removed subjects: {}\n", removed.join(", ")));
    }
    if diff.is_empty() {
        entry.push_str("- No changes in subject IDs\n");
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(entry.as_bytes())?;
    file.flush()?;

    tracing::info!("Recorded comparison {log_id} in {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn version(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table::from_rows(
            columns.iter().map(|c| (*c).to_owned()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| Some((*v).to_owned())).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_subject_diff_trims_keys() {
        let old = version(&["subjectkey", "age"], &[&["A", "1"], &[" B ", "2"]]);
        let new = version(&["subjectkey", "age"], &[&["B", "2"], &["C", "3"]]);

        let diff = subject_diff(&old, &new, "subjectkey").unwrap();

        assert_eq!(diff.added, BTreeSet::from(["C".to_owned()]));
        assert_eq!(diff.removed, BTreeSet::from(["A".to_owned()]));
    }

    #[test]
    fn test_version_diff_uses_union_of_columns() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let old = version(&["subjectkey", "age"], &[&["A", "1"], &["B", "2"]]);
        let new = version(&["subjectkey", "site"], &[&["B", "X"], &["C", "Y"]]);
        let diff = subject_diff(&old, &new, "subjectkey")?;

        let out = write_version_diff(&old, &new, "subjectkey", &diff, &temp.path().join("diff.csv"))?;

        assert_eq!(out.columns(), ["subjectkey", "site", "age", "change_type"]);
        assert_eq!(out.height(), 2);
        assert_eq!(out.value(0, "subjectkey"), Some("C"));
        assert_eq!(out.value(0, "change_type"), Some("Added"));
        assert_eq!(out.value(0, "age"), None);
        assert_eq!(out.value(1, "subjectkey"), Some("A"));
        assert_eq!(out.value(1, "age"), Some("1"));
        assert_eq!(out.value(1, "change_type"), Some("Removed"));
        Ok(())
    }

    #[test]
    fn test_changelog_is_written_once_per_pair() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("CHANGELOG.md");
        let diff = SubjectDiff {
            added: BTreeSet::from(["D".to_owned(), "C".to_owned()]),
            removed: BTreeSet::new(),
        };

        assert!(append_to_changelog(&path, "v1.csv", "v2.csv", &diff, "2024-03-01 09:00:00")?);
        assert!(!append_to_changelog(&path, "v1.csv", "v2.csv", &diff, "2024-03-02 09:00:00")?);

        let text = fs::read_to_string(&path)?;
        assert_eq!(
            text,
            "\n## Comparison: `v1.csv` -> `v2.csv` (2024-03-01 09:00:00)\n- Added subjects: C, D\n"
        );
        Ok(())
    }

    #[test]
    fn test_changelog_notes_no_changes() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("CHANGELOG.md");

        append_to_changelog(&path, "a", "b", &SubjectDiff::default(), "2024-03-01 09:00:00")?;

        assert!(fs::read_to_string(&path)?.contains("- No changes in subject IDs"));
        Ok(())
    }
}
