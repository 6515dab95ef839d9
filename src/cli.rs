use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use clinqc::config::PipelineConfig;
use clinqc::dataset::{DatasetIdentity, load_table};
use clinqc::lifecycle::{AuditTrail, ChangeRecord, append_to_changelog, subject_diff, write_version_diff};
use clinqc::orchestrator::{Orchestrator, RunReport, write_qc_report};
use clinqc::utils::now_timestamp;
use clinqc::{dataset, qc};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "clinqc",
    version,
    about = "Clinical dataset cleaning, QC, snapshot diff and audit trail"
)]
pub struct Cli {
    /// JSON configuration file. Relative paths in it resolve against --root.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root holding data/, docs/ and logs/
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hash-gated pipeline: clean, QC, diff, audit
    Run {
        /// Dataset identity (raw file name with or without .csv)
        identity: String,
    },
    /// Clean a raw upload and write the cleaned CSV
    Clean { identity: String },
    /// Evaluate QC on a cleaned CSV
    Qc {
        /// Path to the cleaned CSV
        cleaned_path: PathBuf,

        /// Report output path. Defaults to <stem>_qc_report.txt next to the input.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Flagged rows output path. Defaults to <stem>_qc_flags.csv next to the input.
        #[arg(long)]
        flags: Option<PathBuf>,

        /// Dataset identity whose schema applies. Defaults to the configured default.
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Diff a raw upload against its snapshot, ignoring the hash log
    Diff { identity: String },
    /// Show the audit trail and hash history of a dataset
    History { identity: String },
    /// Compare the subjects of two cleaned CSV versions
    Compare {
        old: PathBuf,
        new: PathBuf,

        /// Where to write the added/removed rows
        #[arg(short, long, default_value = "data/version_diff.csv")]
        output: PathBuf,

        /// Changelog path. Defaults to the configured changelog.
        #[arg(long)]
        changelog: Option<PathBuf>,

        /// Do not record the comparison in the changelog
        #[arg(long)]
        no_changelog: bool,

        /// Dataset identity whose subject key applies
        #[arg(long)]
        dataset: Option<String>,
    },
}

impl Cli {
    /// Configuration from `--config` (resolved against `--root`) or the rooted layout.
    pub fn load_config(&self) -> Result<PipelineConfig> {
        match &self.config {
            Some(path) => Ok(PipelineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
                .resolved_against(&self.root)),
            None => Ok(PipelineConfig::rooted_at(&self.root)),
        }
    }
}

pub fn run_command(command: Commands, config: PipelineConfig, root: &Path) -> Result<()> {
    match command {
        Commands::Run { identity } => handle_run(config, &identity),
        Commands::Clean { identity } => handle_clean(config, &identity),
        Commands::Qc {
            cleaned_path,
            report,
            flags,
            dataset,
        } => handle_qc(&config, &cleaned_path, report, flags, dataset.as_deref()),
        Commands::Diff { identity } => handle_diff(config, &identity),
        Commands::History { identity } => handle_history(config, &identity),
        Commands::Compare {
            old,
            new,
            output,
            changelog,
            no_changelog,
            dataset,
        } => {
            let output = if output.is_relative() {
                root.join(output)
            } else {
                output
            };
            let changelog = (!no_changelog)
                .then(|| changelog.unwrap_or_else(|| config.changelog_path.clone()));
            handle_compare(&config, &old, &new, &output, changelog.as_deref(), dataset.as_deref())
        }
    }
}

fn parse_identity(identity: &str) -> Result<DatasetIdentity> {
    DatasetIdentity::new(identity).with_context(|| format!("Invalid dataset identity '{identity}'"))
}

fn print_report(report: &RunReport) {
    println!("{}", report.summary());
    if let Some(clean) = &report.clean {
        println!(
            "  Cleaned: {} -> {} rows ({} dropped keys, {} missing cells, {} unparseable, {} malformed rows)",
            clean.rows_in,
            clean.rows_out,
            clean.dropped_keys,
            clean.missing_cells,
            clean.unparseable_cells,
            clean.malformed_rows
        );
    }
    for record in &report.changes {
        println!("  {}", format_change(record));
    }
    for warning in &report.warnings {
        println!("  Warning: {warning}");
    }
}

fn format_change(record: &ChangeRecord) -> String {
    format!(
        "{} {}: {} -> {}",
        record.subjectkey,
        record.column,
        record.old_value.as_deref().unwrap_or(""),
        record.new_value.as_deref().unwrap_or("")
    )
}

fn handle_run(config: PipelineConfig, identity: &str) -> Result<()> {
    let identity = parse_identity(identity)?;
    let mut orchestrator = Orchestrator::new(config);
    let report = orchestrator
        .run(&identity)
        .with_context(|| format!("Pipeline run for {identity} failed"))?;
    print_report(&report);
    Ok(())
}

fn handle_diff(config: PipelineConfig, identity: &str) -> Result<()> {
    let identity = parse_identity(identity)?;
    let mut orchestrator = Orchestrator::new(config);
    let report = orchestrator
        .force_diff(&identity)
        .with_context(|| format!("Snapshot diff for {identity} failed"))?;
    print_report(&report);
    Ok(())
}

fn handle_clean(config: PipelineConfig, identity: &str) -> Result<()> {
    let identity = parse_identity(identity)?;
    let orchestrator = Orchestrator::new(config);
    let run = orchestrator
        .clean(&identity)
        .with_context(|| format!("Cleaning {identity} failed"))?;

    let summary = &run.output.summary;
    println!(
        "Cleaned {identity}: {} -> {} rows, {} recoded, {} missing, {} unparseable, {} malformed",
        summary.rows_in,
        summary.rows_out,
        summary.remapped_cells,
        summary.missing_cells,
        summary.unparseable_cells,
        summary.malformed_rows
    );
    println!("Saved to {}", run.path.display());
    Ok(())
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_suffix("_cleaned").unwrap_or(&stem);
    path.with_file_name(format!("{stem}{suffix}"))
}

fn handle_qc(
    config: &PipelineConfig,
    cleaned_path: &Path,
    report_path: Option<PathBuf>,
    flags_path: Option<PathBuf>,
    dataset: Option<&str>,
) -> Result<()> {
    let schema = match dataset {
        Some(name) => config.schema_for(&parse_identity(name)?),
        None => &config.default_schema,
    };

    let table = load_table(cleaned_path)
        .with_context(|| format!("Failed to load {}", cleaned_path.display()))?;
    let source = cleaned_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let outcome = qc::evaluate(&table, schema, &source)?;

    let report_path = report_path.unwrap_or_else(|| sibling_path(cleaned_path, "_qc_report.txt"));
    let flags_path = flags_path.unwrap_or_else(|| sibling_path(cleaned_path, "_qc_flags.csv"));

    // Artifact write failures are warnings only
    if let Err(e) = write_qc_report(&outcome, &report_path) {
        tracing::warn!("{e}");
    }
    if let Err(e) = dataset::save_table(&outcome.flagged, &flags_path) {
        tracing::warn!("{e}");
    }

    print!("{}", outcome.report.render());
    println!("\nReport: {}", report_path.display());
    println!("Flagged rows ({}): {}", outcome.flagged.height(), flags_path.display());
    Ok(())
}

fn handle_history(config: PipelineConfig, identity: &str) -> Result<()> {
    let identity = parse_identity(identity)?;
    let orchestrator = Orchestrator::new(config);

    let records = orchestrator.audit().read_all(&identity)?;
    let trail = AuditTrail::from_records(records);
    let hashes = orchestrator.hash_log().history(&identity)?;

    println!("Audit trail for {identity}: {} record(s) over {} run(s)", trail.len(), trail.runs().len());

    println!("\nAdded subjects ({}):", trail.added.len());
    for record in &trail.added {
        println!("  {} {}", record.timestamp, record.subjectkey);
    }
    println!("\nRemoved subjects ({}):", trail.removed.len());
    for record in &trail.removed {
        println!("  {} {}", record.timestamp, record.subjectkey);
    }
    println!("\nModified cells ({}):", trail.modified.len());
    for record in &trail.modified {
        println!("  {} {}", record.timestamp, format_change(record));
    }

    println!("\nHash history ({}):", hashes.len());
    for entry in &hashes {
        println!("  {} {} {}", entry.timestamp, entry.digest, entry.path);
    }
    Ok(())
}

fn handle_compare(
    config: &PipelineConfig,
    old: &Path,
    new: &Path,
    output: &Path,
    changelog: Option<&Path>,
    dataset: Option<&str>,
) -> Result<()> {
    let key = match dataset {
        Some(name) => &config.schema_for(&parse_identity(name)?).subject_key,
        None => &config.default_schema.subject_key,
    };

    let old_table = load_table(old).with_context(|| format!("Failed to load {}", old.display()))?;
    let new_table = load_table(new).with_context(|| format!("Failed to load {}", new.display()))?;

    let diff = subject_diff(&old_table, &new_table, key)?;
    write_version_diff(&old_table, &new_table, key, &diff, output)?;

    println!("Subjects added ({}):", diff.added.len());
    for subject in &diff.added {
        println!("  {subject}");
    }
    println!("Subjects removed ({}):", diff.removed.len());
    for subject in &diff.removed {
        println!("  {subject}");
    }
    println!("Version diff written to {}", output.display());

    if let Some(changelog) = changelog {
        let label = |p: &Path| {
            p.file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        };
        let written =
            append_to_changelog(changelog, &label(old), &label(new), &diff, &now_timestamp())?;
        if written {
            println!("{} updated", changelog.display());
        } else {
            println!("Comparison already recorded in {}; skipped", changelog.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["clinqc", "run", "cohort1", "--root", "/project", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.root, PathBuf::from("/project"));
        assert!(matches!(cli.command, Commands::Run { ref identity } if identity == "cohort1"));
    }

    #[test]
    fn test_qc_sibling_paths() {
        let path = Path::new("data/cleaned/cohort1_cleaned.csv");
        assert_eq!(
            sibling_path(path, "_qc_report.txt"),
            Path::new("data/cleaned/cohort1_qc_report.txt")
        );
    }
}
