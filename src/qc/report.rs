//! QC report model and text rendering.

use crate::dataset::RangeRule;
use crate::utils::{fmt_opt, format_number};
use serde::Serialize;
use std::collections::BTreeMap;

/// Label used for missing cells in distribution tables.
pub const MISSING_LABEL: &str = "<missing>";

const RULE: &str = "========================================";

/// Missing cells for one column, with the subjects that have them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingField {
    pub column: String,
    pub subjects: Vec<String>,
}

/// One value outside its valid range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierHit {
    pub subject: String,
    pub value: String,
}

/// Out-of-range values for one ranged column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierField {
    pub rule: RangeRule,
    pub hits: Vec<OutlierHit>,
}

/// Count/mean/min/max over the parseable values of a ranged column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Value counts for a categorical column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub column: String,
    pub counts: BTreeMap<String, usize>,
}

/// Structured QC findings for one cleaned table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcReport {
    pub source: String,
    pub row_count: usize,
    /// Every non-key column, in table order
    pub missing: Vec<MissingField>,
    pub outliers: Vec<OutlierField>,
    pub numeric: Vec<NumericSummary>,
    pub distributions: Vec<Distribution>,
}

impl QcReport {
    /// Subjects missing a value in `column`.
    pub fn missing_subjects(&self, column: &str) -> &[String] {
        self.missing
            .iter()
            .find(|m| m.column == column)
            .map(|m| m.subjects.as_slice())
            .unwrap_or_default()
    }

    /// Out-of-range hits for `column`.
    pub fn outliers_for(&self, column: &str) -> &[OutlierHit] {
        self.outliers
            .iter()
            .find(|o| o.rule.column == column)
            .map(|o| o.hits.as_slice())
            .unwrap_or_default()
    }

    pub fn total_missing(&self) -> usize {
        self.missing.iter().map(|m| m.subjects.len()).sum()
    }

    pub fn total_outliers(&self) -> usize {
        self.outliers.iter().map(|o| o.hits.len()).sum()
    }

    /// Render the report as plain text.
    ///
    /// Section order is fixed (header, missing values, outliers, numeric summary,
    /// distributions) and nothing depends on the clock, so the same table always
    /// renders to the same bytes.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("QC Report: {}\n", self.source));
        out.push_str(RULE);
        out.push('\n');
        out.push_str(&format!("Rows: {}\n", self.row_count));

        out.push_str("\nMissing Values:\n");
        for field in &self.missing {
            if field.subjects.is_empty() {
                out.push_str(&format!("  {}: 0\n", field.column));
            } else {
                out.push_str(&format!(
                    "  {}: {} [{}]\n",
                    field.column,
                    field.subjects.len(),
                    field.subjects.join(", ")
                ));
            }
        }

        out.push_str("\nOutliers:\n");
        if self.outliers.is_empty() {
            out.push_str("  No ranged fields configured.\n");
        }
        for field in &self.outliers {
            out.push_str(&format!(
                "  {} outside [{}, {}]: {}\n",
                field.rule.column,
                format_number(field.rule.min),
                format_number(field.rule.max),
                field.hits.len()
            ));
            for hit in &field.hits {
                out.push_str(&format!("    {}: {}\n", hit.subject, hit.value));
            }
        }

        if !self.numeric.is_empty() {
            out.push_str("\nNumeric Summary:\n");
            for summary in &self.numeric {
                out.push_str(&format!(
                    "  {}: count={} mean={} min={} max={}\n",
                    summary.column,
                    summary.count,
                    fmt_opt(summary.mean),
                    summary.min.map(format_number).unwrap_or_else(|| "-".to_owned()),
                    summary.max.map(format_number).unwrap_or_else(|| "-".to_owned()),
                ));
            }
        }

        out.push_str("\nDistributions:\n");
        if self.distributions.is_empty() {
            out.push_str("  No distribution columns present.\n");
        }
        for dist in &self.distributions {
            out.push_str(&format!("  {}:\n", dist.column));
            for (value, count) in &dist.counts {
                out.push_str(&format!("    {value}: {count}\n"));
            }
        }

        out
    }
}
