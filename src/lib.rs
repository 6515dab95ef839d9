//! # clinqc - clinical dataset cleaning, QC and change tracking
//!
//! clinqc ingests successive uploads of tabular clinical datasets (CSV), cleans them,
//! evaluates quality control, and keeps an append-only record of what changed between
//! uploads of the same dataset.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clinqc::config::PipelineConfig;
//! use clinqc::dataset::DatasetIdentity;
//! use clinqc::orchestrator::Orchestrator;
//! use std::path::Path;
//!
//! # fn example() -> clinqc::error::Result<()> {
//! // Expects data/raw/cohort1.csv under the project root
//! let config = PipelineConfig::rooted_at(Path::new("."));
//! let mut orchestrator = Orchestrator::new(config);
//!
//! let report = orchestrator.run(&DatasetIdentity::new("cohort1")?)?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Modules
//!
//! - [`dataset`]: identities, untyped tables, schema descriptors and CSV I/O
//! - [`cleaning`]: raw upload normalization
//! - [`qc`]: missing-value and range checks, report rendering
//! - [`integrity`]: streaming content digests and the shared hash log
//! - [`lifecycle`]: snapshots, the diff engine, the audit log and version comparison
//! - [`orchestrator`]: the hash-gated run state machine
//! - [`config`]: paths and per-dataset schemas
//! - [`error`]: error types and handling utilities
//! - [`logging`]: subscriber setup for the binary
//!
//! ## Idempotence
//!
//! Every successful run appends the raw file's SHA-256 digest to the hash log. A later
//! run whose raw file has the same digest stops before cleaning, so re-uploading
//! identical bytes never duplicates audit records or reports.

#![warn(clippy::all, rust_2018_idioms)]

pub mod cleaning;
pub mod config;
pub mod dataset;
pub mod error;
pub mod integrity;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod qc;
pub mod utils;
