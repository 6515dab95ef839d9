//! Tabular data model shared by every pipeline stage.
//!
//! - [`identity`]: the [`DatasetIdentity`] naming root for all artifacts of one dataset
//! - [`table`]: untyped in-memory tables with explicit missing cells
//! - [`schema`]: the per-dataset schema descriptor consumed by cleaning and QC
//! - [`io`]: CSV load/save through Polars, plus line-safe appends for the logs

pub mod identity;
pub mod io;
pub mod schema;
pub mod table;

pub use identity::DatasetIdentity;
pub use io::{RawCsv, append_line, append_table, load_table, parse_raw_csv, save_table, table_to_df};
pub use schema::{CategoricalMap, DatasetSchema, RangeRule};
pub use table::{Table, is_missing};
