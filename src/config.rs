//! Pipeline configuration.
//!
//! Every component receives its paths from a [`PipelineConfig`] value instead of
//! process-wide constants. A configuration is either derived from a project root with
//! [`PipelineConfig::rooted_at`] or loaded from JSON, where absent fields fall back to
//! the rooted defaults.

use crate::dataset::{DatasetIdentity, DatasetSchema};
use crate::error::{Result, ResultExt as _};
use crate::lifecycle::{audit, snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw uploads, one `<identity>.csv` per dataset
    pub raw_dir: PathBuf,
    /// Cleaned tables, QC reports and flagged rows
    pub cleaned_dir: PathBuf,
    /// Last accepted snapshot per identity
    pub snapshot_dir: PathBuf,
    /// Append-only column diff history per identity
    pub audit_dir: PathBuf,
    /// Hash log shared by every identity
    pub hash_log_path: PathBuf,
    pub log_dir: PathBuf,
    /// Markdown changelog written by version comparisons
    pub changelog_path: PathBuf,
    /// Per-identity schema overrides
    pub schemas: BTreeMap<String, DatasetSchema>,
    pub default_schema: DatasetSchema,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::rooted_at(Path::new("."))
    }
}

impl PipelineConfig {
    /// Standard project layout under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let data = root.join("data");
        Self {
            raw_dir: data.join("raw"),
            cleaned_dir: data.join("cleaned"),
            snapshot_dir: data.join("snapshots"),
            audit_dir: data.join("audit"),
            hash_log_path: root.join("docs").join("data_change_log.csv"),
            log_dir: root.join("logs"),
            changelog_path: root.join("CHANGELOG.md"),
            schemas: BTreeMap::new(),
            default_schema: DatasetSchema::clinical(),
        }
    }

    /// Load a JSON configuration file and validate every schema in it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Resolve relative paths against `root`. Absolute paths are left alone.
    pub fn resolved_against(mut self, root: &Path) -> Self {
        for path in [
            &mut self.raw_dir,
            &mut self.cleaned_dir,
            &mut self.snapshot_dir,
            &mut self.audit_dir,
            &mut self.hash_log_path,
            &mut self.log_dir,
            &mut self.changelog_path,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.default_schema
            .validate()
            .context("default_schema")?;
        for (identity, schema) in &self.schemas {
            DatasetIdentity::new(identity)?;
            schema
                .validate()
                .with_context(|| format!("schema for '{identity}'"))?;
        }
        Ok(())
    }

    /// Schema for `identity`: its override when configured, the default otherwise.
    pub fn schema_for(&self, identity: &DatasetIdentity) -> &DatasetSchema {
        self.schemas
            .get(identity.as_str())
            .unwrap_or(&self.default_schema)
    }

    pub fn raw_path(&self, identity: &DatasetIdentity) -> PathBuf {
        self.raw_dir.join(format!("{identity}.csv"))
    }

    pub fn cleaned_path(&self, identity: &DatasetIdentity) -> PathBuf {
        self.cleaned_dir.join(format!("{identity}_cleaned.csv"))
    }

    pub fn qc_report_path(&self, identity: &DatasetIdentity) -> PathBuf {
        self.cleaned_dir.join(format!("{identity}_qc_report.txt"))
    }

    pub fn qc_flags_path(&self, identity: &DatasetIdentity) -> PathBuf {
        self.cleaned_dir.join(format!("{identity}_qc_flags.csv"))
    }

    pub fn snapshot_path(&self, identity: &DatasetIdentity) -> PathBuf {
        self.snapshot_dir.join(snapshot::file_name(identity))
    }

    pub fn audit_path(&self, identity: &DatasetIdentity) -> PathBuf {
        self.audit_dir.join(audit::file_name(identity))
    }

    pub fn lock_path(&self, identity: &DatasetIdentity) -> PathBuf {
        self.snapshot_dir.join(format!("{identity}.lock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rooted_layout() {
        let config = PipelineConfig::rooted_at(Path::new("/project"));
        let id = DatasetIdentity::new("cohort1").unwrap();

        assert_eq!(config.raw_path(&id), Path::new("/project/data/raw/cohort1.csv"));
        assert_eq!(
            config.cleaned_path(&id),
            Path::new("/project/data/cleaned/cohort1_cleaned.csv")
        );
        assert_eq!(
            config.snapshot_path(&id),
            Path::new("/project/data/snapshots/cohort1_snapshot.csv")
        );
        assert_eq!(
            config.audit_path(&id),
            Path::new("/project/data/audit/cohort1_column_diff_history.csv")
        );
        assert_eq!(
            config.hash_log_path,
            Path::new("/project/docs/data_change_log.csv")
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("clinqc.json");
        fs::write(
            &path,
            r#"{
                "raw_dir": "uploads",
                "schemas": { "cohort2": { "subject_key": "subject_id" } }
            }"#,
        )?;

        let config = PipelineConfig::load(&path)?.resolved_against(Path::new("/project"));

        assert_eq!(config.raw_dir, Path::new("/project/uploads"));
        let cohort2 = DatasetIdentity::new("cohort2")?;
        let cohort1 = DatasetIdentity::new("cohort1")?;
        assert_eq!(config.schema_for(&cohort2).subject_key, "subject_id");
        assert_eq!(config.schema_for(&cohort1).subject_key, "subjectkey");
        Ok(())
    }

    #[test]
    fn test_save_then_load() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("nested").join("clinqc.json");
        let config = PipelineConfig::rooted_at(temp.path());

        config.save(&path)?;
        assert_eq!(PipelineConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_invalid_schema_identity_is_rejected() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("clinqc.json");
        fs::write(&path, r#"{ "schemas": { "../escape": {} } }"#)?;

        let err = PipelineConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), "config");
        Ok(())
    }
}
