//! Missing-value and out-of-range checks over a cleaned table.
//!
//! Column statistics are computed on a Polars frame built from the table; the
//! flagged-row artifact is assembled from the original rows using the same masks.

use super::report::{
    Distribution, MISSING_LABEL, MissingField, NumericSummary, OutlierField, OutlierHit, QcReport,
};
use crate::dataset::{DatasetSchema, RangeRule, Table, table_to_df};
use crate::error::Result;
use polars::prelude::*;
use std::collections::BTreeMap;

const COUNT_COLUMN: &str = "qc_count";

/// Both QC artifacts for one cleaned table.
#[derive(Debug, Clone)]
pub struct QcOutcome {
    pub report: QcReport,
    /// Rows with at least one flag, followed by one `true`/`false` column per flag reason
    pub flagged: Table,
}

/// Names of the flag columns appended to flagged rows, in order.
pub fn flag_column_names(schema: &DatasetSchema) -> Vec<String> {
    let mut names: Vec<String> = schema
        .qc_required
        .iter()
        .map(|field| format!("missing_{field}"))
        .collect();
    names.extend(
        schema
            .ranges
            .iter()
            .map(|rule| format!("{}_out_of_range", rule.column)),
    );
    names
}

/// Evaluate a cleaned table against the QC rules of `schema`.
///
/// `source` names the table in the report header.
///
/// # Errors
///
/// [`ClinqcError::Schema`](crate::error::ClinqcError::Schema) when the subject key, a QC-required field or a ranged field
/// is not a column of `table`.
pub fn evaluate(table: &Table, schema: &DatasetSchema, source: &str) -> Result<QcOutcome> {
    let mut required = vec![schema.subject_key.as_str()];
    required.extend(schema.qc_required.iter().map(String::as_str));
    required.extend(schema.ranges.iter().map(|r| r.column.as_str()));
    table.require_columns(&required)?;

    let df = table_to_df(table)?;
    let keys = subject_keys(&df, &schema.subject_key)?;

    let mut missing = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        if column.name().as_str() == schema.subject_key {
            continue;
        }
        missing.push(missing_field(column, &keys)?);
    }

    let mut outliers = Vec::with_capacity(schema.ranges.len());
    let mut numeric = Vec::with_capacity(schema.ranges.len());
    let mut range_masks = Vec::with_capacity(schema.ranges.len());
    for rule in &schema.ranges {
        let (summary, field, mask) = check_range(&df, rule, &keys)?;
        numeric.push(summary);
        outliers.push(field);
        range_masks.push(mask);
    }

    let distributions = schema
        .distribution_columns
        .iter()
        .filter(|column| table.has_column(column))
        .map(|column| distribution(&df, column))
        .collect::<Result<Vec<_>>>()?;

    let missing_masks = schema
        .qc_required
        .iter()
        .map(|field| Ok(to_mask(&df.column(field)?.as_materialized_series().is_null())))
        .collect::<Result<Vec<_>>>()?;
    let flagged = flag_rows(table, schema, &missing_masks, &range_masks)?;

    let report = QcReport {
        source: source.to_owned(),
        row_count: df.height(),
        missing,
        outliers,
        numeric,
        distributions,
    };

    tracing::info!(
        source,
        rows = report.row_count,
        missing = report.total_missing(),
        outliers = report.total_outliers(),
        flagged = flagged.height(),
        "QC evaluation complete"
    );

    Ok(QcOutcome { report, flagged })
}

fn subject_keys(df: &DataFrame, key_column: &str) -> Result<Vec<String>> {
    let keys = df.column(key_column)?.as_materialized_series().str()?;
    Ok(keys
        .into_iter()
        .map(|key| key.unwrap_or_default().to_owned())
        .collect())
}

fn missing_field(column: &Column, keys: &[String]) -> Result<MissingField> {
    let series = column.as_materialized_series();
    let mut subjects = Vec::with_capacity(series.null_count());
    if series.null_count() > 0 {
        let nulls = &series.is_null();
        for (idx, is_null) in nulls.into_iter().enumerate() {
            if is_null == Some(true)
                && let Some(key) = keys.get(idx)
            {
                subjects.push(key.clone());
            }
        }
    }

    Ok(MissingField {
        column: column.name().to_string(),
        subjects,
    })
}

/// Numeric summary, outliers and the out-of-range mask for one ranged column.
///
/// The column is cast to `Float64` non-strictly, so missing and unparseable cells are
/// null and never count as outliers.
fn check_range(
    df: &DataFrame,
    rule: &RangeRule,
    keys: &[String],
) -> Result<(NumericSummary, OutlierField, Vec<bool>)> {
    let raw = df.column(&rule.column)?.as_materialized_series();
    let text = raw.str()?;
    let values = raw.cast(&DataType::Float64)?;
    let values = values.f64()?;

    let summary = NumericSummary {
        column: rule.column.clone(),
        count: values.len() - values.null_count(),
        mean: values.mean(),
        min: values.min(),
        max: values.max(),
    };

    let mask: Vec<bool> = values
        .into_iter()
        .map(|value| value.is_some_and(|v| v.is_finite() && !rule.contains(v)))
        .collect();

    let hits = mask
        .iter()
        .enumerate()
        .filter(|(_, out)| **out)
        .map(|(idx, _)| OutlierHit {
            subject: keys.get(idx).cloned().unwrap_or_default(),
            value: text.get(idx).unwrap_or_default().to_owned(),
        })
        .collect();

    Ok((
        summary,
        OutlierField {
            rule: rule.clone(),
            hits,
        },
        mask,
    ))
}

fn distribution(df: &DataFrame, column: &str) -> Result<Distribution> {
    let series = df.column(column)?.as_materialized_series();
    let counts_df = series.value_counts(true, false, COUNT_COLUMN.into(), false)?;

    let labels = counts_df.column(column)?.as_materialized_series().str()?;
    let counts = counts_df
        .column(COUNT_COLUMN)?
        .as_materialized_series()
        .cast(&DataType::UInt64)?;
    let counts = counts.u64()?;

    let mut table = BTreeMap::new();
    for (label, count) in labels.into_iter().zip(counts) {
        let label = label.unwrap_or(MISSING_LABEL).to_owned();
        *table.entry(label).or_insert(0) += count.unwrap_or(0) as usize;
    }

    Ok(Distribution {
        column: column.to_owned(),
        counts: table,
    })
}

fn to_mask(mask: &BooleanChunked) -> Vec<bool> {
    mask.into_iter().map(|flag| flag.unwrap_or(false)).collect()
}

fn flag_rows(
    table: &Table,
    schema: &DatasetSchema,
    missing_masks: &[Vec<bool>],
    range_masks: &[Vec<bool>],
) -> Result<Table> {
    let mut columns = table.columns().to_vec();
    columns.extend(flag_column_names(schema));
    let mut flagged = Table::new(columns);

    for (idx, row) in table.rows().iter().enumerate() {
        let flags: Vec<bool> = missing_masks
            .iter()
            .chain(range_masks)
            .map(|mask| mask.get(idx).copied().unwrap_or(false))
            .collect();

        if flags.iter().any(|f| *f) {
            let mut out = row.clone();
            out.extend(flags.iter().map(|f| Some(f.to_string())));
            flagged.push_row(out)?;
        }
    }

    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaned(rows: &[[&str; 6]]) -> Table {
        let columns = ["subjectkey", "age", "IQ", "diagnosis", "sex", "site"]
            .map(str::to_owned)
            .to_vec();
        let rows = rows
            .iter()
            .map(|r| {
                r.iter()
                    .map(|v| (!v.is_empty()).then(|| (*v).to_owned()))
                    .collect()
            })
            .collect();
        Table::from_rows(columns, rows).unwrap()
    }

    #[test]
    fn test_outlier_and_missing_name_the_right_subjects() {
        let table = cleaned(&[
            ["S1", "150", "100", "1", "1", "A"],
            ["S2", "20", "", "0", "2", "A"],
            ["S3", "30", "110", "0", "2", "B"],
        ]);

        let outcome = evaluate(&table, &DatasetSchema::clinical(), "cohort1").unwrap();
        let report = &outcome.report;

        let age_hits = report.outliers_for("age");
        assert_eq!(age_hits.len(), 1);
        assert_eq!(age_hits[0].subject, "S1");
        assert_eq!(report.missing_subjects("IQ"), ["S2".to_owned()]);
        assert_eq!(report.total_missing(), 1);
        assert_eq!(report.total_outliers(), 1);

        assert_eq!(outcome.flagged.height(), 2);
        assert_eq!(outcome.flagged.value(0, "subjectkey"), Some("S1"));
        assert_eq!(outcome.flagged.value(0, "age_out_of_range"), Some("true"));
        assert_eq!(outcome.flagged.value(0, "missing_IQ"), Some("false"));
        assert_eq!(outcome.flagged.value(1, "missing_IQ"), Some("true"));
    }

    #[test]
    fn test_missing_value_is_not_an_outlier() {
        let table = cleaned(&[["S1", "", "100", "1", "1", "A"]]);

        let outcome = evaluate(&table, &DatasetSchema::clinical(), "cohort1").unwrap();

        assert!(outcome.report.outliers_for("age").is_empty());
        assert_eq!(outcome.flagged.value(0, "missing_age"), Some("true"));
        assert_eq!(outcome.flagged.value(0, "age_out_of_range"), Some("false"));
    }

    #[test]
    fn test_report_is_deterministic() {
        let table = cleaned(&[
            ["S1", "150", "100", "1", "1", "A"],
            ["S2", "20", "", "0", "2", "B"],
        ]);
        let schema = DatasetSchema::clinical();

        let first = evaluate(&table, &schema, "cohort1").unwrap().report.render();
        let second = evaluate(&table, &schema, "cohort1").unwrap().report.render();
        assert_eq!(first, second);
    }

    #[test]
    fn test_distributions_count_missing_values() {
        let table = cleaned(&[
            ["S1", "20", "100", "1", "1", "A"],
            ["S2", "20", "100", "0", "", "A"],
        ]);

        let outcome = evaluate(&table, &DatasetSchema::clinical(), "cohort1").unwrap();
        let sex = outcome
            .report
            .distributions
            .iter()
            .find(|d| d.column == "sex")
            .unwrap();

        assert_eq!(sex.counts.get("1"), Some(&1));
        assert_eq!(sex.counts.get(MISSING_LABEL), Some(&1));
        // scanner_type is not a column, so no table is emitted for it
        assert!(
            outcome
                .report
                .distributions
                .iter()
                .all(|d| d.column != "scanner_type")
        );
    }

    #[test]
    fn test_numeric_summary() {
        let table = cleaned(&[
            ["S1", "10", "100", "1", "1", "A"],
            ["S2", "20", "", "0", "2", "A"],
        ]);

        let outcome = evaluate(&table, &DatasetSchema::clinical(), "cohort1").unwrap();
        let iq = outcome
            .report
            .numeric
            .iter()
            .find(|s| s.column == "IQ")
            .unwrap();

        assert_eq!(iq.count, 1);
        assert_eq!(iq.mean, Some(100.0));
    }

    #[test]
    fn test_unparseable_number_is_neither_counted_nor_an_outlier() {
        let table = cleaned(&[
            ["S1", "ten", "100", "1", "1", "A"],
            ["S2", "70", "100", "0", "2", "A"],
            ["S3", "30", "100", "0", "2", "A"],
        ]);

        let outcome = evaluate(&table, &DatasetSchema::clinical(), "cohort1").unwrap();
        let age = &outcome.report.numeric[0];

        assert_eq!(age.column, "age");
        assert_eq!(age.count, 2);
        assert_eq!(age.mean, Some(50.0));
        assert_eq!(age.min, Some(30.0));
        assert_eq!(age.max, Some(70.0));
        assert_eq!(outcome.report.outliers_for("age")[0].subject, "S2");
        assert_eq!(outcome.report.outliers_for("age").len(), 1);
        assert_eq!(outcome.flagged.height(), 1);
    }

    #[test]
    fn test_missing_qc_field_is_schema_error() {
        let table = Table::new(vec!["subjectkey".to_owned(), "age".to_owned()]);
        let err = evaluate(&table, &DatasetSchema::clinical(), "cohort1").unwrap_err();
        assert_eq!(err.kind(), "schema");
    }
}
