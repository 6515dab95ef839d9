//! Dataset schema descriptors.
//!
//! One [`DatasetSchema`] describes everything the cleaner and the QC evaluator need to
//! know about a dataset type: the subject key, the required columns, which raw values
//! count as missing, categorical recodings, date columns and valid numeric ranges.

use crate::error::{ClinqcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed-interval valid range for a numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRule {
    pub column: String,
    pub min: f64,
    pub max: f64,
}

impl RangeRule {
    pub fn new(column: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            column: column.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Case-insensitive label-to-code mapping for one categorical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalMap {
    pub column: String,
    pub mapping: BTreeMap<String, String>,
}

impl CategoricalMap {
    pub fn new(column: impl Into<String>, pairs: &[(&str, &str)]) -> Self {
        Self {
            column: column.into(),
            mapping: pairs
                .iter()
                .map(|(label, code)| (label.to_lowercase(), (*code).to_owned()))
                .collect(),
        }
    }

    /// Mapped code for `label`, or `None` when the label is not in the table.
    pub fn lookup(&self, label: &str) -> Option<&str> {
        let key = label.to_lowercase();
        self.mapping
            .get(&key)
            .or_else(|| {
                self.mapping
                    .iter()
                    .find(|(k, _)| k.to_lowercase() == key)
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }
}

/// Schema descriptor for one dataset type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSchema {
    /// Column holding the unique subject identifier
    pub subject_key: String,

    /// Columns that must be present in every upload (includes the subject key)
    pub required_columns: Vec<String>,

    /// Columns whose missing values are QC flags
    pub qc_required: Vec<String>,

    /// Raw values (compared after trimming) that mean "missing"
    pub missing_sentinels: Vec<String>,

    /// Categorical recodings applied by the cleaner
    pub categorical_maps: Vec<CategoricalMap>,

    /// Columns normalized to `date_format`
    pub date_columns: Vec<String>,

    /// chrono format string for cleaned dates
    pub date_format: String,

    /// Valid numeric ranges; every ranged column is treated as numeric
    pub ranges: Vec<RangeRule>,

    /// Columns tabulated in the QC report when present
    pub distribution_columns: Vec<String>,
}

impl Default for DatasetSchema {
    fn default() -> Self {
        Self::clinical()
    }
}

impl DatasetSchema {
    /// Canonical schema for the clinical cohort uploads.
    ///
    /// Sex is coded `1` = male, `2` = female and diagnosis `1` = ASD, `0` = TD.
    pub fn clinical() -> Self {
        Self {
            subject_key: "subjectkey".to_owned(),
            required_columns: ["subjectkey", "age", "IQ", "diagnosis", "sex", "site"]
                .map(str::to_owned)
                .to_vec(),
            qc_required: ["age", "IQ", "diagnosis", "sex", "site"]
                .map(str::to_owned)
                .to_vec(),
            missing_sentinels: ["", " ", "-9999"].map(str::to_owned).to_vec(),
            categorical_maps: vec![
                CategoricalMap::new(
                    "sex",
                    &[("m", "1"), ("male", "1"), ("f", "2"), ("female", "2")],
                ),
                CategoricalMap::new(
                    "diagnosis",
                    &[("asd", "1"), ("autism", "1"), ("td", "0"), ("control", "0")],
                ),
            ],
            date_columns: vec!["interview_date".to_owned()],
            date_format: "%Y-%m-%d".to_owned(),
            ranges: vec![
                RangeRule::new("age", 5.0, 64.0),
                RangeRule::new("IQ", 70.0, 145.0),
            ],
            distribution_columns: ["site", "sex", "scanner_type", "diagnosis"]
                .map(str::to_owned)
                .to_vec(),
        }
    }

    /// Whether a trimmed raw value is one of the missing sentinels.
    pub fn is_sentinel(&self, trimmed: &str) -> bool {
        trimmed.is_empty()
            || self
                .missing_sentinels
                .iter()
                .any(|s| s == trimmed || s.trim() == trimmed)
    }

    pub fn categorical_for(&self, column: &str) -> Option<&CategoricalMap> {
        self.categorical_maps.iter().find(|m| m.column == column)
    }

    pub fn range_for(&self, column: &str) -> Option<&RangeRule> {
        self.ranges.iter().find(|r| r.column == column)
    }

    pub fn is_date_column(&self, column: &str) -> bool {
        self.date_columns.iter().any(|c| c == column)
    }

    /// Every column the cleaner requires, subject key first.
    pub fn required_with_key(&self) -> Vec<&str> {
        let mut columns = vec![self.subject_key.as_str()];
        columns.extend(
            self.required_columns
                .iter()
                .map(String::as_str)
                .filter(|c| *c != self.subject_key),
        );
        columns
    }

    /// Reject descriptors that cannot be applied consistently.
    pub fn validate(&self) -> Result<()> {
        if self.subject_key.trim().is_empty() {
            return Err(ClinqcError::Config("schema subject_key is empty".to_owned()));
        }
        if self.qc_required.contains(&self.subject_key) {
            return Err(ClinqcError::Config(format!(
                "subject key '{}' cannot be a QC field",
                self.subject_key
            )));
        }
        for rule in &self.ranges {
            if rule.min.is_nan() || rule.max.is_nan() || rule.min > rule.max {
                return Err(ClinqcError::Config(format!(
                    "range for '{}' is empty: [{}, {}]",
                    rule.column, rule.min, rule.max
                )));
            }
        }
        if self.date_format.trim().is_empty() {
            return Err(ClinqcError::Config("schema date_format is empty".to_owned()));
        }
        Ok(())
    }
}
