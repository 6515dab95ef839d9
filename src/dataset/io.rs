//! CSV persistence for [`Table`]s.
//!
//! Reading goes through Polars with schema inference disabled, so every column comes
//! back as text and cleaning decides how each cell is interpreted. Empty CSV fields
//! load as missing cells and missing cells are written as empty fields.
//!
//! Raw uploads are parsed leniently by [`parse_raw_csv`]: short rows are padded with
//! missing cells and long rows lose their surplus fields, so one malformed line never
//! rejects a whole upload.

use super::table::{Table, is_missing};
use crate::error::{ClinqcError, Result, ResultExt as _};
use polars::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read as _, Seek as _, SeekFrom, Write as _};
use std::path::Path;

/// A raw upload parsed from memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCsv {
    pub table: Table,
    /// Line numbers of rows that had more fields than the header
    pub ragged_lines: Vec<u64>,
}

/// Load a CSV file with a header row. Every column is read as text.
pub fn load_table(path: &Path) -> Result<Table> {
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .and_then(LazyFrame::collect)
        .with_context(|| format!("Failed to read CSV {}", path.display()))?;

    df_to_table(&df)
}

/// Parse the bytes of a raw upload with a header row. Every column is read as text.
///
/// Rows with surplus fields are truncated to the header width and reported in
/// [`RawCsv::ragged_lines`].
pub fn parse_raw_csv(bytes: &[u8]) -> Result<RawCsv> {
    let ragged_lines = find_ragged_lines(bytes)?;

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|opts| opts.with_truncate_ragged_lines(true))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .context("Failed to parse raw CSV")?;

    Ok(RawCsv {
        table: df_to_table(&df)?,
        ragged_lines,
    })
}

fn find_ragged_lines(bytes: &[u8]) -> Result<Vec<u64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let width = reader
        .byte_headers()
        .map_err(|e| ClinqcError::Data(format!("unreadable CSV header: {e}")))?
        .len();

    let mut lines = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| ClinqcError::Data(format!("unreadable CSV row: {e}")))?;
        if record.len() > width {
            lines.push(record.position().map_or(0, csv::Position::line));
        }
    }
    Ok(lines)
}

/// Write `table` as a CSV file with a header row, replacing any existing file.
pub fn save_table(table: &Table, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut df = table_to_df(table)?;
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .with_context(|| format!("Failed to write CSV {}", path.display()))?;
    file.flush()?;
    Ok(())
}

/// Append the rows of `table` to a CSV file.
///
/// The header is written only when the file is new or empty. If the file's last byte
/// is not a newline, one is inserted first so the new rows never fuse with a
/// truncated line.
pub fn append_table(table: &Table, path: &Path) -> Result<()> {
    if table.is_empty() {
        return Ok(());
    }

    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let separator = needs_separator(path)?;

    ensure_parent(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for appending", path.display()))?;

    if separator {
        file.write_all(b"\n")?;
    }

    let mut df = table_to_df(table)?;
    CsvWriter::new(&mut file)
        .include_header(is_new)
        .finish(&mut df)
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    file.flush()?;
    Ok(())
}

/// Append one raw line (without its terminator) to a text log.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let separator = needs_separator(path)?;

    ensure_parent(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for appending", path.display()))?;

    let mut buf = String::with_capacity(line.len() + 2);
    if separator {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');

    file.write_all(buf.as_bytes())
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    file.flush()?;
    Ok(())
}

/// True when `path` exists, is non-empty and does not end in a newline.
fn needs_separator(path: &Path) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if file.metadata()?.len() == 0 {
        return Ok(false);
    }

    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn df_to_table(df: &DataFrame) -> Result<Table> {
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut by_column: Vec<Vec<Option<String>>> = Vec::with_capacity(columns.len());
    for name in &columns {
        let series = df
            .column(name)?
            .as_materialized_series()
            .cast(&DataType::String)?;
        let values = series.str()?;
        by_column.push(
            (0..df.height())
                .map(|i| values.get(i).map(str::to_owned))
                .collect(),
        );
    }

    let rows = (0..df.height())
        .map(|i| {
            by_column
                .iter()
                .map(|values| values.get(i).cloned().flatten())
                .collect()
        })
        .collect();

    Table::from_rows(columns, rows)
}

/// Polars frame of `table`. Every column is a string column and blank cells are null.
pub fn table_to_df(table: &Table) -> Result<DataFrame> {
    let columns: Vec<Column> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<Option<&str>> = table
                .rows()
                .iter()
                .map(|row| row.get(idx).and_then(|v| v.as_deref()))
                .map(|v| if is_missing(v) { None } else { v })
                .collect();
            Column::from(Series::new(name.as_str().into(), values))
        })
        .collect();

    DataFrame::new(columns).map_err(|e| ClinqcError::Data(e.to_string()))
}
