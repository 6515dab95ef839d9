//! In-memory tables of untyped cells.

use crate::error::{ClinqcError, Result};
use std::collections::HashSet;

/// A rectangular table of optional string cells. `None` is the explicit missing marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table, checking that every row has one cell per column and that
    /// column names are unique.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(ClinqcError::Schema(format!("duplicate column '{name}'")));
            }
        }

        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ClinqcError::Data(format!(
                "row {} has {} cells, expected {}",
                self.rows.len() + 1,
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell at (`row`, `column`), `None` when missing or out of bounds.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    /// Fail with a schema error naming every absent column.
    pub fn require_columns<S: AsRef<str>>(&self, required: &[S]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !self.has_column(name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ClinqcError::Schema(format!(
                "required column(s) not found: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Missing-value convention: absent, or nothing but whitespace.
pub fn is_missing(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}
