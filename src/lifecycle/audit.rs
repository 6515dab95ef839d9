//! Append-only column diff history, one CSV per dataset identity.

use super::diff::{ChangeKind, ChangeRecord};
use crate::dataset::{DatasetIdentity, Table, append_table, load_table};
use crate::error::{ClinqcError, Result, ResultExt as _};
use serde::Serialize;
use std::path::PathBuf;

/// Header of every audit log file.
pub const AUDIT_COLUMNS: [&str; 5] = ["timestamp", "subjectkey", "column", "old_value", "new_value"];

/// File name of the audit log for `identity`.
pub fn file_name(identity: &DatasetIdentity) -> String {
    format!("{identity}_column_diff_history.csv")
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, identity: &DatasetIdentity) -> PathBuf {
        self.dir.join(file_name(identity))
    }

    /// Add `records` to the end of the log. An empty slice writes nothing.
    pub fn append(&self, identity: &DatasetIdentity, records: &[ChangeRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let path = self.path_for(identity);
        append_table(&records_to_table(records)?, &path)
            .with_context(|| format!("Failed to append audit records for {identity}"))?;

        tracing::info!(identity = %identity, records = records.len(), "Appended audit records");
        Ok(())
    }

    /// Every record ever appended, in file order. A missing log is empty.
    pub fn read_all(&self, identity: &DatasetIdentity) -> Result<Vec<ChangeRecord>> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let table = load_table(&path)?;
        if table.columns() != AUDIT_COLUMNS {
            return Err(ClinqcError::Consistency(format!(
                "{} has header [{}], expected [{}]",
                path.display(),
                table.columns().join(", "),
                AUDIT_COLUMNS.join(", ")
            )));
        }

        Ok(table
            .rows()
            .iter()
            .map(|row| {
                let cell = |idx: usize| row.get(idx).cloned().flatten();
                ChangeRecord {
                    timestamp: cell(0).unwrap_or_default(),
                    subjectkey: cell(1).unwrap_or_default(),
                    column: cell(2).unwrap_or_default(),
                    old_value: cell(3),
                    new_value: cell(4),
                }
            })
            .collect())
    }
}

fn records_to_table(records: &[ChangeRecord]) -> Result<Table> {
    let mut table = Table::new(AUDIT_COLUMNS.map(str::to_owned).to_vec());
    for record in records {
        table.push_row(vec![
            Some(record.timestamp.clone()),
            Some(record.subjectkey.clone()),
            Some(record.column.clone()),
            record.old_value.clone(),
            record.new_value.clone(),
        ])?;
    }
    Ok(table)
}

/// Read-side view of an audit log, split by change kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditTrail {
    pub added: Vec<ChangeRecord>,
    pub removed: Vec<ChangeRecord>,
    pub modified: Vec<ChangeRecord>,
}

impl AuditTrail {
    pub fn from_records(records: impl IntoIterator<Item = ChangeRecord>) -> Self {
        let mut trail = Self::default();
        for record in records {
            match record.kind() {
                ChangeKind::RowAdded => trail.added.push(record),
                ChangeKind::RowRemoved => trail.removed.push(record),
                ChangeKind::CellModified => trail.modified.push(record),
            }
        }
        trail
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct run timestamps, oldest first.
    pub fn runs(&self) -> Vec<&str> {
        let mut runs: Vec<&str> = self
            .added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .map(|r| r.timestamp.as_str())
            .collect();
        runs.sort_unstable();
        runs.dedup();
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn records(ts: &str) -> Vec<ChangeRecord> {
        vec![
            ChangeRecord::cell_modified(ts, "B", "age", Some("10"), Some("11")),
            ChangeRecord::cell_modified(ts, "B", "IQ", Some("100"), None),
            ChangeRecord::row_removed(ts, "C"),
            ChangeRecord::row_added(ts, "D"),
        ]
    }

    #[test]
    fn test_append_then_read_all() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let log = AuditLog::new(temp.path().join("audit"));
        let id = DatasetIdentity::new("cohort1")?;

        assert!(log.read_all(&id)?.is_empty());

        log.append(&id, &records("2024-03-01 09:00:00"))?;
        log.append(&id, &records("2024-03-02 09:00:00"))?;

        let all = log.read_all(&id)?;
        assert_eq!(all.len(), 8);
        assert_eq!(all[..4], records("2024-03-01 09:00:00"));
        assert_eq!(all[4..], records("2024-03-02 09:00:00"));

        let text = fs::read_to_string(log.path_for(&id))?;
        assert!(text.starts_with("timestamp,subjectkey,column,old_value,new_value\n"));
        assert_eq!(text.matches("timestamp,").count(), 1);
        Ok(())
    }

    #[test]
    fn test_append_after_truncated_last_line() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let log = AuditLog::new(temp.path());
        let id = DatasetIdentity::new("cohort1")?;
        fs::write(
            log.path_for(&id),
            "timestamp,subjectkey,column,old_value,new_value\nt,A,age,1,2",
        )?;

        log.append(&id, &[ChangeRecord::row_added("t2", "B")])?;

        let text = fs::read_to_string(log.path_for(&id))?;
        assert!(text.ends_with("t,A,age,1,2\nt2,B,ROW_STATUS,N/A,ADDED\n"));
        let all = log.read_all(&id)?;
        assert_eq!(
            all,
            [
                ChangeRecord::cell_modified("t", "A", "age", Some("1"), Some("2")),
                ChangeRecord::row_added("t2", "B"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_empty_append_writes_nothing() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let log = AuditLog::new(temp.path());
        let id = DatasetIdentity::new("cohort1")?;

        log.append(&id, &[])?;
        assert!(!log.path_for(&id).exists());
        Ok(())
    }

    #[test]
    fn test_foreign_header_is_rejected() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let log = AuditLog::new(temp.path());
        let id = DatasetIdentity::new("cohort1")?;
        fs::write(log.path_for(&id), "a,b\n1,2\n")?;

        let err = log.read_all(&id).unwrap_err();
        assert_eq!(err.kind(), "consistency");
        Ok(())
    }

    #[test]
    fn test_trail_partitions_by_kind() {
        let mut all = records("2024-03-01 09:00:00");
        all.extend(records("2024-03-02 09:00:00"));

        let trail = AuditTrail::from_records(all);

        assert_eq!(trail.added.len(), 2);
        assert_eq!(trail.removed.len(), 2);
        assert_eq!(trail.modified.len(), 4);
        assert_eq!(trail.runs(), ["2024-03-01 09:00:00", "2024-03-02 09:00:00"]);
    }
}
