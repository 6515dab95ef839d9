//! Dataset lifecycle: snapshots, diffs and the audit trail.
//!
//! ## Key Principles
//!
//! - **One snapshot per identity**: the last accepted cleaned table, overwritten after
//!   every successful run. History lives only in the audit log.
//! - **Append-only audit log**: every change record ever detected, never rewritten.
//! - **Pure diffing**: [`diff_snapshots`] computes changes without side effects.
//!
//! ## Change records
//!
//! | Kind          | `column`      | `old_value` | `new_value` |
//! |---------------|---------------|-------------|-------------|
//! | row added     | `ROW_STATUS`  | `N/A`       | `ADDED`     |
//! | row removed   | `ROW_STATUS`  | `REMOVED`   | `N/A`       |
//! | cell modified | field name    | old cell    | new cell    |
//!
//! ```no_run
//! use clinqc::dataset::DatasetIdentity;
//! use clinqc::lifecycle::{AuditLog, SnapshotStore, diff_snapshots};
//!
//! # fn example(current: clinqc::lifecycle::Snapshot) -> anyhow::Result<()> {
//! let id = DatasetIdentity::new("cohort1")?;
//! let store = SnapshotStore::new("data/snapshots");
//! let audit = AuditLog::new("data/audit");
//!
//! let previous = store.load(&id)?;
//! let outcome = diff_snapshots(previous.as_ref(), &current, "2024-03-01 09:00:00")?;
//! audit.append(&id, outcome.records())?;
//! store.save(&id, &current)?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod compare;
pub mod diff;
pub mod snapshot;

pub use audit::{AUDIT_COLUMNS, AuditLog, AuditTrail};
pub use compare::{SubjectDiff, append_to_changelog, subject_diff, write_version_diff};
pub use diff::{
    ADDED_MARKER, ChangeKind, ChangeRecord, DiffOutcome, KeyPartition, NOT_APPLICABLE,
    REMOVED_MARKER, ROW_STATUS, check_compatible, diff_snapshots, partition_keys,
};
pub use snapshot::{Snapshot, SnapshotStore};
