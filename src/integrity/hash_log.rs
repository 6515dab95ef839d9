//! Append-only content-digest history shared by every dataset identity.

use crate::dataset::{DatasetIdentity, append_line};
use crate::error::{Result, ResultExt as _};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// One processed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashLogEntry {
    pub timestamp: String,
    pub path: String,
    pub digest: String,
}

impl HashLogEntry {
    /// Parse one log line. Blank and malformed lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (timestamp, rest) = line.split_once(',')?;
        let (path, digest) = rest.rsplit_once(',')?;
        if timestamp.trim().is_empty() || digest.trim().is_empty() {
            return None;
        }
        Some(Self {
            timestamp: timestamp.trim().to_owned(),
            path: path.trim().to_owned(),
            digest: digest.trim().to_owned(),
        })
    }

    pub fn to_line(&self) -> String {
        format!("{},{},{}", self.timestamp, self.path, self.digest)
    }

    /// Whether this entry was logged for `identity`.
    ///
    /// The identity is the file stem of the logged path, compared exactly, so
    /// `cohort1` does not match entries for `cohort10`.
    pub fn belongs_to(&self, identity: &DatasetIdentity) -> bool {
        let file_name = self
            .path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str());
        DatasetIdentity::new(file_name).is_ok_and(|id| id == *identity)
    }
}

/// Handle on the hash log file.
#[derive(Debug, Clone)]
pub struct HashLog {
    path: PathBuf,
}

impl HashLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every well-formed entry, in file order. A missing log is empty.
    pub fn entries(&self) -> Result<Vec<HashLogEntry>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match HashLogEntry::parse(line) {
                Some(entry) => entries.push(entry),
                None => tracing::warn!(
                    "{}:{}: skipping malformed hash log line",
                    self.path.display(),
                    line_no + 1
                ),
            }
        }
        Ok(entries)
    }

    /// Every entry for `identity`, oldest first.
    pub fn history(&self, identity: &DatasetIdentity) -> Result<Vec<HashLogEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.belongs_to(identity))
            .collect())
    }

    /// Digest of the most recent entry for `identity`, scanning from the end.
    pub fn last_digest(&self, identity: &DatasetIdentity) -> Result<Option<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|entry| entry.belongs_to(identity))
            .map(|entry| entry.digest))
    }

    /// Append an entry on its own line.
    pub fn append(&self, entry: &HashLogEntry) -> Result<()> {
        append_line(&self.path, &entry.to_line())?;
        tracing::debug!(path = %entry.path, digest = %entry.digest, "Appended hash log entry");
        Ok(())
    }
}
