//! Raw upload cleaning.
//!
//! [`clean_table`] turns a raw upload into the canonical cleaned form:
//!
//! 1. Required columns are checked (schema error when any is absent)
//! 2. Subject keys are trimmed; rows whose key is empty or `nan` are dropped
//! 3. Duplicate subject keys are rejected (consistency error)
//! 4. Every other cell is trimmed and sentinel values become explicit missing cells
//! 5. Categorical labels are recoded, dates and numbers are canonicalized
//!
//! Malformed dates and numbers never abort cleaning. They are coded as missing so QC
//! review still sees the row.

use crate::dataset::{DatasetSchema, Table};
use crate::error::{ClinqcError, Result};
use crate::utils::format_number;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Counters describing what cleaning did to an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    /// Rows dropped for an empty or `nan` subject key
    pub dropped_keys: usize,
    /// Cells left missing after cleaning
    pub missing_cells: usize,
    /// Cells recoded through a categorical map
    pub remapped_cells: usize,
    /// Dates and numbers that could not be parsed and were coded as missing
    pub unparseable_cells: usize,
    /// Raw rows with more fields than the header, kept with their surplus dropped
    pub malformed_rows: usize,
}

/// A cleaned table and the summary of how it was produced.
#[derive(Debug, Clone)]
pub struct CleanOutput {
    pub table: Table,
    pub summary: CleanSummary,
}

/// Clean a raw table according to `schema`.
///
/// # Errors
///
/// - [`ClinqcError::Schema`] when a required column is absent
/// - [`ClinqcError::Consistency`] when two rows share a subject key after trimming
pub fn clean_table(raw: &Table, schema: &DatasetSchema) -> Result<CleanOutput> {
    raw.require_columns(&schema.required_with_key())?;

    let key_idx = raw
        .column_index(&schema.subject_key)
        .ok_or_else(|| ClinqcError::Schema(format!("'{}' not found", schema.subject_key)))?;

    let mut summary = CleanSummary {
        rows_in: raw.height(),
        ..Default::default()
    };
    let mut cleaned = Table::new(raw.columns().to_vec());
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();

    for row in raw.rows() {
        let Some(key) = normalize_key(row.get(key_idx).and_then(|v| v.as_deref())) else {
            summary.dropped_keys += 1;
            continue;
        };

        if !seen.insert(key.clone()) {
            duplicates.insert(key);
            continue;
        }

        let mut out = Vec::with_capacity(row.len());
        for (idx, column) in raw.columns().iter().enumerate() {
            if idx == key_idx {
                out.push(Some(key.clone()));
                continue;
            }
            let raw_cell = row.get(idx).and_then(|v| v.as_deref());
            let cell = clean_cell(column, raw_cell, schema, &mut summary);
            if cell.is_none() {
                summary.missing_cells += 1;
            }
            out.push(cell);
        }
        cleaned.push_row(out)?;
    }

    if !duplicates.is_empty() {
        let keys: Vec<String> = duplicates.into_iter().collect();
        return Err(ClinqcError::Consistency(format!(
            "duplicate {} value(s): {}",
            schema.subject_key,
            keys.join(", ")
        )));
    }

    summary.rows_out = cleaned.height();
    tracing::debug!(
        rows_in = summary.rows_in,
        rows_out = summary.rows_out,
        dropped = summary.dropped_keys,
        unparseable = summary.unparseable_cells,
        "Cleaned table"
    );

    Ok(CleanOutput {
        table: cleaned,
        summary,
    })
}

/// Trimmed subject key, or `None` for keys that identify nobody.
pub fn normalize_key(raw: Option<&str>) -> Option<String> {
    let key = raw?.trim();
    if key.is_empty() || key == "nan" {
        None
    } else {
        Some(key.to_owned())
    }
}

fn clean_cell(
    column: &str,
    raw: Option<&str>,
    schema: &DatasetSchema,
    summary: &mut CleanSummary,
) -> Option<String> {
    let value = raw?.trim();
    if schema.is_sentinel(value) {
        return None;
    }

    if let Some(map) = schema.categorical_for(column)
        && let Some(code) = map.lookup(value)
    {
        summary.remapped_cells += 1;
        return Some(code.to_owned());
    }

    let parsed = if schema.is_date_column(column) {
        normalize_date(value, &schema.date_format)
    } else if schema.range_for(column).is_some() {
        canonical_number(value)
    } else {
        return Some(value.to_owned());
    };

    match parsed {
        Ok(v) if schema.is_sentinel(&v) => None,
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{column}: {e}; coded as missing");
            summary.unparseable_cells += 1;
            None
        }
    }
}

/// Parse a date in any accepted input format and render it with `output_format`.
pub fn normalize_date(raw: &str, output_format: &str) -> Result<String> {
    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
        .ok_or_else(|| ClinqcError::Parse(format!("'{raw}' is not a recognised date")))?;

    Ok(date.format(output_format).to_string())
}

/// Parse a numeric cell and render it canonically (`10.0` becomes `10`).
pub fn canonical_number(raw: &str) -> Result<String> {
    let value: f64 = raw
        .parse()
        .map_err(|e| ClinqcError::Parse(format!("'{raw}' is not a number ({e})")))?;

    if !value.is_finite() {
        return Err(ClinqcError::Parse(format!("'{raw}' is not a finite number")));
    }

    Ok(format_number(value))
}
