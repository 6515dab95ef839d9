//! Hash-gated pipeline runs.
//!
//! The [`Orchestrator`] decides, per dataset identity, whether a raw upload needs
//! processing at all. Each identity moves through the [`RunState`] machine:
//!
//! ```text
//!            digest matches last hash log entry
//! upload ──► Unchanged
//!   │
//!   └──────► NeedsProcessing ──► Processing ──► Done
//!                                    │
//!                                    └────────► Failed
//! ```
//!
//! A processing run cleans the raw table, evaluates QC, diffs against the stored
//! snapshot, appends the audit log, saves the snapshot and finally appends the hash
//! log. The snapshot save and hash log append come last, so any earlier failure leaves
//! the last known good state untouched.

pub mod lock;

use crate::cleaning::{CleanOutput, CleanSummary, clean_table};
use crate::config::PipelineConfig;
use crate::dataset::{DatasetIdentity, parse_raw_csv, save_table};
use crate::error::{ClinqcError, Result, ResultExt as _};
use crate::integrity::{HashLog, HashLogEntry, read_with_digest};
use crate::lifecycle::{AuditLog, ChangeRecord, DiffOutcome, Snapshot, SnapshotStore, diff_snapshots};
use crate::qc::{QcOutcome, evaluate};
use crate::utils::now_timestamp;
use lock::IdentityLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle state of one dataset identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Unchanged,
    NeedsProcessing,
    Processing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unchanged => "UNCHANGED",
            Self::NeedsProcessing => "NEEDS_PROCESSING",
            Self::Processing => "PROCESSING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// What the snapshot diff found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiffStatus {
    /// First accepted upload; the snapshot was created
    Initial,
    NoChanges,
    Changed,
}

/// QC totals for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QcCounts {
    pub rows: usize,
    pub missing: usize,
    pub outliers: usize,
    pub flagged_rows: usize,
}

/// Report generated after a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub identity: DatasetIdentity,
    pub state: RunState,
    /// Digest of the raw upload
    pub digest: String,
    /// `None` when the run was skipped
    pub diff_status: Option<DiffStatus>,
    pub changes: Vec<ChangeRecord>,
    /// `None` when QC was skipped
    pub qc: Option<QcCounts>,
    pub clean: Option<CleanSummary>,
    /// Artifact write failures that did not fail the run
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl RunReport {
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Create a summary message
    pub fn summary(&self) -> String {
        let diff = match self.diff_status {
            None => "skipped (raw file unchanged)".to_owned(),
            Some(DiffStatus::Initial) => "initial snapshot created".to_owned(),
            Some(DiffStatus::NoChanges) => "no changes".to_owned(),
            Some(DiffStatus::Changed) => format!("{} change(s) logged", self.changes.len()),
        };
        let qc = self.qc.map_or_else(
            || "QC skipped".to_owned(),
            |qc| {
                format!(
                    "QC: {} rows, {} missing, {} outliers",
                    qc.rows, qc.missing, qc.outliers
                )
            },
        );
        format!(
            "{} [{}]: {diff}; {qc}; {} warning(s), {:.2}s",
            self.identity,
            self.state,
            self.warnings.len(),
            self.duration.as_secs_f64()
        )
    }
}

/// Whether the hash gate applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Skip byte-identical uploads and produce QC artifacts
    Gated,
    /// Always diff; no QC artifacts
    ForceDiff,
}

/// Cleaned table written by [`Orchestrator::clean`].
#[derive(Debug, Clone)]
pub struct CleanRun {
    pub output: CleanOutput,
    pub path: PathBuf,
}

pub struct Orchestrator {
    config: PipelineConfig,
    hash_log: HashLog,
    snapshots: SnapshotStore,
    audit: AuditLog,
    states: BTreeMap<DatasetIdentity, RunState>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            hash_log: HashLog::new(&config.hash_log_path),
            snapshots: SnapshotStore::new(&config.snapshot_dir),
            audit: AuditLog::new(&config.audit_dir),
            states: BTreeMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn hash_log(&self) -> &HashLog {
        &self.hash_log
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Last state `identity` reached in this orchestrator, if it ran at all.
    pub fn state(&self, identity: &DatasetIdentity) -> Option<RunState> {
        self.states.get(identity).copied()
    }

    /// Process the raw upload for `identity` unless its digest matches the last one
    /// logged for that identity.
    pub fn run(&mut self, identity: &DatasetIdentity) -> Result<RunReport> {
        self.execute(identity, RunMode::Gated)
    }

    /// Diff the raw upload against the snapshot regardless of the hash log. QC
    /// artifacts are not produced.
    pub fn force_diff(&mut self, identity: &DatasetIdentity) -> Result<RunReport> {
        self.execute(identity, RunMode::ForceDiff)
    }

    /// Clean the raw upload and write the cleaned CSV, without touching snapshots or
    /// logs.
    pub fn clean(&self, identity: &DatasetIdentity) -> Result<CleanRun> {
        let raw_path = self.config.raw_path(identity);
        let (raw_bytes, _) = read_with_digest(&raw_path)?;
        let output = self.parse_and_clean(identity, &raw_path, &raw_bytes)?;
        let path = self.config.cleaned_path(identity);
        save_table(&output.table, &path)?;
        tracing::info!(identity = %identity, path = %path.display(), "Wrote cleaned table");
        Ok(CleanRun { output, path })
    }

    fn set_state(&mut self, identity: &DatasetIdentity, state: RunState) {
        tracing::debug!(identity = %identity, %state, "State transition");
        self.states.insert(identity.clone(), state);
    }

    fn execute(&mut self, identity: &DatasetIdentity, mode: RunMode) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id, identity = %identity);
        let _guard = span.enter();
        let start = Instant::now();

        let raw_path = self.config.raw_path(identity);
        let (raw_bytes, digest) = match read_with_digest(&raw_path) {
            Ok(read) => read,
            Err(e) => {
                self.set_state(identity, RunState::Failed);
                tracing::error!("Run failed: {e}");
                return Err(e);
            }
        };

        let lock = match IdentityLock::acquire(&self.config.lock_path(identity), identity, &run_id)
        {
            Ok(lock) => lock,
            Err(e) => {
                self.set_state(identity, RunState::Failed);
                tracing::error!("Run failed: {e}");
                return Err(e);
            }
        };

        let mut report = RunReport {
            run_id,
            identity: identity.clone(),
            state: RunState::NeedsProcessing,
            digest,
            diff_status: None,
            changes: Vec::new(),
            qc: None,
            clean: None,
            warnings: Vec::new(),
            duration: Duration::ZERO,
        };

        if mode == RunMode::Gated {
            match self.hash_log.last_digest(identity) {
                Ok(Some(last)) if last == report.digest => {
                    self.set_state(identity, RunState::Unchanged);
                    report.state = RunState::Unchanged;
                    report.duration = start.elapsed();
                    tracing::info!("Raw file unchanged; skipping cleaning, QC and diff");
                    drop(lock);
                    return Ok(report);
                }
                Ok(_) => {}
                Err(e) => {
                    self.set_state(identity, RunState::Failed);
                    tracing::error!("Run failed: {e}");
                    return Err(e);
                }
            }
        }

        self.set_state(identity, RunState::NeedsProcessing);
        self.set_state(identity, RunState::Processing);

        let result = self.process(identity, &raw_path, &raw_bytes, mode, &mut report);
        drop(lock);

        match result {
            Ok(()) => {
                self.set_state(identity, RunState::Done);
                report.state = RunState::Done;
                report.duration = start.elapsed();
                tracing::info!("{}", report.summary());
                Ok(report)
            }
            Err(e) => {
                self.set_state(identity, RunState::Failed);
                tracing::error!(kind = e.kind(), "Run failed: {e}");
                Err(e)
            }
        }
    }

    fn process(
        &self,
        identity: &DatasetIdentity,
        raw_path: &Path,
        raw_bytes: &[u8],
        mode: RunMode,
        report: &mut RunReport,
    ) -> Result<()> {
        let schema = self.config.schema_for(identity);
        let timestamp = now_timestamp();

        let cleaned = self.parse_and_clean(identity, raw_path, raw_bytes)?;
        report.clean = Some(cleaned.summary.clone());

        if mode == RunMode::Gated {
            let cleaned_path = self.config.cleaned_path(identity);
            if let Err(e) = save_table(&cleaned.table, &cleaned_path) {
                warn_artifact(report, "cleaned table", &cleaned_path, &e);
            }

            let outcome = evaluate(&cleaned.table, schema, identity.as_str())?;
            report.qc = Some(QcCounts {
                rows: outcome.report.row_count,
                missing: outcome.report.total_missing(),
                outliers: outcome.report.total_outliers(),
                flagged_rows: outcome.flagged.height(),
            });
            self.write_qc_artifacts(identity, &outcome, report);
        }

        let current = Snapshot::from_table(&cleaned.table, &schema.subject_key)?;
        let previous = self.snapshots.load(identity)?;
        let outcome = diff_snapshots(previous.as_ref(), &current, &timestamp)?;

        report.diff_status = Some(match &outcome {
            DiffOutcome::Initial => DiffStatus::Initial,
            DiffOutcome::Unchanged => DiffStatus::NoChanges,
            DiffOutcome::Changed(_) => DiffStatus::Changed,
        });

        self.audit.append(identity, outcome.records())?;
        self.snapshots.save(identity, &current)?;
        self.hash_log.append(&HashLogEntry {
            timestamp,
            path: raw_path.display().to_string(),
            digest: report.digest.clone(),
        })?;

        if let DiffOutcome::Changed(records) = outcome {
            report.changes = records;
        }
        Ok(())
    }

    fn parse_and_clean(
        &self,
        identity: &DatasetIdentity,
        raw_path: &Path,
        raw_bytes: &[u8],
    ) -> Result<CleanOutput> {
        let raw = parse_raw_csv(raw_bytes).map_err(|e| {
            ClinqcError::Schema(format!("cannot read raw file {}: {e}", raw_path.display()))
        })?;
        for line in &raw.ragged_lines {
            tracing::warn!(
                "{}:{line}: more fields than the header; surplus fields dropped",
                raw_path.display()
            );
        }

        let mut output = clean_table(&raw.table, self.config.schema_for(identity))
            .with_context(|| format!("Cleaning {identity}"))?;
        output.summary.malformed_rows = raw.ragged_lines.len();
        Ok(output)
    }

    fn write_qc_artifacts(
        &self,
        identity: &DatasetIdentity,
        outcome: &QcOutcome,
        report: &mut RunReport,
    ) {
        let report_path = self.config.qc_report_path(identity);
        if let Err(e) = write_qc_report(outcome, &report_path) {
            warn_artifact(report, "QC report", &report_path, &e);
        }

        let flags_path = self.config.qc_flags_path(identity);
        if let Err(e) = save_table(&outcome.flagged, &flags_path) {
            warn_artifact(report, "QC flags", &flags_path, &e);
        }
    }
}

/// Write the rendered QC report as plain text.
pub fn write_qc_report(outcome: &QcOutcome, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, outcome.report.render())
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn warn_artifact(report: &mut RunReport, what: &str, path: &Path, err: &ClinqcError) {
    let message = format!("could not write {what} to {}: {err}", path.display());
    tracing::warn!("{message}");
    report.warnings.push(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "subjectkey,age,IQ,diagnosis,sex,site\n";

    fn setup(raw: &str) -> (TempDir, Orchestrator, DatasetIdentity) {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(temp.path());
        let id = DatasetIdentity::new("cohort1").unwrap();
        fs::create_dir_all(&config.raw_dir).unwrap();
        fs::write(config.raw_path(&id), raw).unwrap();
        (temp, Orchestrator::new(config), id)
    }

    #[test]
    fn test_first_run_creates_baseline_and_artifacts() {
        let (_temp, mut orchestrator, id) =
            setup(&format!("{HEADER}A,10,100,ASD,M,X\nB,12,95,TD,F,X\n"));

        let report = orchestrator.run(&id).unwrap();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.diff_status, Some(DiffStatus::Initial));
        assert_eq!(report.change_count(), 0);
        assert_eq!(orchestrator.state(&id), Some(RunState::Done));

        let config = orchestrator.config();
        assert!(config.cleaned_path(&id).exists());
        assert!(config.qc_report_path(&id).exists());
        assert!(config.qc_flags_path(&id).exists());
        assert!(!config.lock_path(&id).exists());
        assert_eq!(orchestrator.snapshots().load(&id).unwrap().unwrap().len(), 2);
        assert_eq!(orchestrator.hash_log().history(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_identical_upload_is_skipped() {
        let (_temp, mut orchestrator, id) = setup(&format!("{HEADER}A,10,100,ASD,M,X\n"));

        orchestrator.run(&id).unwrap();
        let report = orchestrator.run(&id).unwrap();

        assert_eq!(report.state, RunState::Unchanged);
        assert_eq!(report.diff_status, None);
        assert_eq!(orchestrator.state(&id), Some(RunState::Unchanged));
        assert_eq!(orchestrator.hash_log().history(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_force_diff_bypasses_gate_and_skips_qc() {
        let (_temp, mut orchestrator, id) = setup(&format!("{HEADER}A,10,100,ASD,M,X\n"));

        orchestrator.run(&id).unwrap();
        let report = orchestrator.force_diff(&id).unwrap();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.diff_status, Some(DiffStatus::NoChanges));
        assert!(report.qc.is_none());
        assert_eq!(orchestrator.hash_log().history(&id).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_raw_file_fails() {
        let (_temp, mut orchestrator, _) = setup(HEADER);
        let missing = DatasetIdentity::new("cohort2").unwrap();

        let err = orchestrator.run(&missing).unwrap_err();

        assert_eq!(err.kind(), "schema");
        assert_eq!(orchestrator.state(&missing), Some(RunState::Failed));
    }

    #[test]
    fn test_held_lock_fails_the_run() {
        let (_temp, mut orchestrator, id) = setup(&format!("{HEADER}A,10,100,ASD,M,X\n"));
        let lock_path = orchestrator.config().lock_path(&id);
        let _held = IdentityLock::acquire(&lock_path, &id, "other-run").unwrap();

        let err = orchestrator.run(&id).unwrap_err();

        assert_eq!(err.kind(), "consistency");
        assert_eq!(orchestrator.state(&id), Some(RunState::Failed));
    }

    #[test]
    fn test_row_with_surplus_fields_does_not_fail_the_run() {
        let (_temp, mut orchestrator, id) = setup(&format!(
            "{HEADER}A,9,100,ASD,M,X\nB,10,105,TD,F,X,EXTRA\nC,11,98,ASD,M,Y\n"
        ));

        let report = orchestrator.run(&id).unwrap();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.clean.as_ref().unwrap().malformed_rows, 1);
        let snapshot = orchestrator.snapshots().load(&id).unwrap().unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.value("B", "site"), Some("X"));
    }

    #[test]
    fn test_logged_digest_matches_processed_bytes() {
        let (_temp, mut orchestrator, id) = setup(&format!("{HEADER}A,10,100,ASD,M,X\n"));
        let raw_path = orchestrator.config().raw_path(&id);

        let report = orchestrator.run(&id).unwrap();

        let (_, digest) = read_with_digest(&raw_path).unwrap();
        assert_eq!(report.digest, digest);
        assert_eq!(
            orchestrator.hash_log().last_digest(&id).unwrap().as_deref(),
            Some(digest.as_str())
        );
    }

    #[test]
    fn test_clean_writes_cleaned_table_only() {
        let (_temp, orchestrator, id) = setup(&format!("{HEADER}A,-9999,100,ASD,M,X\n"));

        let run = orchestrator.clean(&id).unwrap();

        assert_eq!(run.output.table.value(0, "age"), None);
        assert!(run.path.exists());
        assert!(orchestrator.snapshots().load(&id).unwrap().is_none());
    }
}
