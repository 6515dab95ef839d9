//! Identity-scoped run lock.

use crate::dataset::DatasetIdentity;
use crate::error::{ClinqcError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Exclusive claim on one dataset identity, released on drop.
///
/// The lock file is created with `create_new`, so a second run for the same identity
/// fails instead of interleaving writes to its snapshot and logs.
#[derive(Debug)]
pub struct IdentityLock {
    path: PathBuf,
}

impl IdentityLock {
    pub fn acquire(path: &Path, identity: &DatasetIdentity, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                return Err(ClinqcError::Consistency(format!(
                    "dataset '{identity}' is locked by another run ({}); remove {} if that run is gone",
                    holder.trim(),
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let lock = Self::claim(file, path, run_id)?;
        tracing::debug!(identity = %identity, lock = %path.display(), "Acquired identity lock");
        Ok(lock)
    }

    /// Record `run_id` in a freshly created lock file. The guard exists before the
    /// write, so a failed write still removes the file.
    fn claim<W: Write>(mut file: W, path: &Path, run_id: &str) -> Result<Self> {
        let lock = Self {
            path: path.to_path_buf(),
        };
        writeln!(file, "{run_id}")?;
        file.flush()?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IdentityLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release lock {}: {e}", self.path.display());
        }
    }
}
