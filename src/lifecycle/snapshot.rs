//! Last accepted state per dataset identity.

use crate::dataset::{DatasetIdentity, Table, is_missing, load_table, save_table};
use crate::error::{ClinqcError, Result, ResultExt as _};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the snapshot for `identity`.
pub fn file_name(identity: &DatasetIdentity) -> String {
    format!("{identity}_snapshot.csv")
}

/// A table keyed by subject.
///
/// `columns` lists the non-key columns; every record holds one cell per column in that
/// order. Blank cells are stored as `None`, so two snapshots compare equal under the
/// missing-value convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    key_column: String,
    columns: Vec<String>,
    records: BTreeMap<String, Vec<Option<String>>>,
}

impl Snapshot {
    /// Index a table by `key_column`.
    ///
    /// # Errors
    ///
    /// - [`ClinqcError::Schema`] when `key_column` is not a column of `table`
    /// - [`ClinqcError::Consistency`] when a key is missing or appears twice
    pub fn from_table(table: &Table, key_column: &str) -> Result<Self> {
        table.require_columns(&[key_column])?;
        let key_idx = table
            .column_index(key_column)
            .ok_or_else(|| ClinqcError::Schema(format!("'{key_column}' not found")))?;

        let columns: Vec<String> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != key_idx)
            .map(|(_, name)| name.clone())
            .collect();

        let mut records = BTreeMap::new();
        for (row_no, row) in table.rows().iter().enumerate() {
            let key = row
                .get(key_idx)
                .and_then(|v| v.as_deref())
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    ClinqcError::Consistency(format!(
                        "row {} has no {key_column} value",
                        row_no + 1
                    ))
                })?;

            let values: Vec<Option<String>> = row
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != key_idx)
                .map(|(_, cell)| normalize(cell.as_deref()))
                .collect();

            if records.insert(key.to_owned(), values).is_some() {
                return Err(ClinqcError::Consistency(format!(
                    "duplicate {key_column} value '{key}' in snapshot"
                )));
            }
        }

        Ok(Self {
            key_column: key_column.to_owned(),
            columns,
            records,
        })
    }

    /// Key column first, rows in key order.
    pub fn to_table(&self) -> Result<Table> {
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(self.key_column.clone());
        columns.extend(self.columns.iter().cloned());

        let mut table = Table::new(columns);
        for (key, values) in &self.records {
            let mut row = Vec::with_capacity(values.len() + 1);
            row.push(Some(key.clone()));
            row.extend(values.iter().cloned());
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &BTreeMap<String, Vec<Option<String>>> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Cell for subject `key` in `column`.
    pub fn value(&self, key: &str, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.records.get(key)?.get(idx)?.as_deref()
    }
}

fn normalize(cell: Option<&str>) -> Option<String> {
    if is_missing(cell) {
        None
    } else {
        cell.map(str::to_owned)
    }
}

/// One overwritten snapshot file per identity.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, identity: &DatasetIdentity) -> PathBuf {
        self.dir.join(file_name(identity))
    }

    /// The stored snapshot, or `None` before the first accepted upload.
    ///
    /// The first column of the stored file is the key column.
    pub fn load(&self, identity: &DatasetIdentity) -> Result<Option<Snapshot>> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(None);
        }

        let table = load_table(&path)?;
        let key_column = table.columns().first().cloned().ok_or_else(|| {
            ClinqcError::Consistency(format!("snapshot {} has no columns", path.display()))
        })?;
        let snapshot = Snapshot::from_table(&table, &key_column)
            .with_context(|| format!("Invalid snapshot {}", path.display()))?;

        Ok(Some(snapshot))
    }

    /// Replace the stored snapshot.
    ///
    /// The table is written to a sibling temporary file and renamed into place, so an
    /// interrupted save leaves the previous snapshot intact.
    pub fn save(&self, identity: &DatasetIdentity, snapshot: &Snapshot) -> Result<()> {
        let path = self.path_for(identity);
        let tmp = temp_path(&path);

        save_table(&snapshot.to_table()?, &tmp)?;
        fs::rename(&tmp, &path).with_context(|| {
            format!("Failed to move {} into place", path.display())
        })?;

        tracing::info!(
            identity = %identity,
            subjects = snapshot.len(),
            path = %path.display(),
            "Saved snapshot"
        );
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
