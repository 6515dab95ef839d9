//! Dataset identity keys.

use crate::error::{ClinqcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical name of a dataset, e.g. `clinical_data`.
///
/// Every derived artifact (cleaned file, snapshot, audit log) uses this name as its
/// file-name root, so it must be a single path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetIdentity(String);

impl DatasetIdentity {
    /// Build an identity from user input. A trailing `.csv` is dropped so that a raw
    /// file name and its identity are interchangeable.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let trimmed = name.as_ref().trim();
        let stem = trimmed.strip_suffix(".csv").unwrap_or(trimmed);

        if stem.is_empty() {
            return Err(ClinqcError::Config(
                "dataset identity must not be empty".to_owned(),
            ));
        }
        if stem.contains(['/', '\\']) || stem == "." || stem == ".." {
            return Err(ClinqcError::Config(format!(
                "dataset identity '{stem}' must be a plain name, not a path"
            )));
        }

        Ok(Self(stem.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DatasetIdentity {
    type Error = ClinqcError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DatasetIdentity> for String {
    fn from(identity: DatasetIdentity) -> Self {
        identity.0
    }
}
