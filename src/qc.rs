//! Quality-control evaluation of cleaned tables.
//!
//! [`evaluate`] scans a cleaned table for missing required values and out-of-range
//! numbers and returns two artifacts:
//!
//! - a [`QcReport`], rendered as deterministic plain text by [`QcReport::render`]
//! - a flagged-row [`Table`](crate::dataset::Table): the offending rows with one boolean
//!   column per flag reason
//!
//! Nothing is written to disk here; the orchestrator decides where artifacts go.

pub mod evaluator;
pub mod report;

pub use evaluator::{QcOutcome, evaluate, flag_column_names};
pub use report::{Distribution, MissingField, NumericSummary, OutlierField, OutlierHit, QcReport};
