//! Centralized error handling for clinqc.
//!
//! The variants follow the pipeline's failure taxonomy:
//!
//! - [`ClinqcError::Schema`]: a required column is missing or the input cannot be read.
//!   Fatal for the run; persisted state is untouched.
//! - [`ClinqcError::Parse`]: a malformed cell (date, number). Callers recover by coding the
//!   cell as missing, so this never aborts a run.
//! - [`ClinqcError::Io`]: a report or log path could not be written.
//! - [`ClinqcError::Consistency`]: duplicate subject keys, or two snapshots whose column
//!   sets disagree. Fatal for the run and reported separately from schema problems.
//!
//! ```
//! use clinqc::error::ClinqcError;
//!
//! fn describe(err: &ClinqcError) -> &'static str {
//!     match err {
//!         ClinqcError::Schema(_) => "fix the upload",
//!         ClinqcError::Consistency(_) => "inspect the snapshot",
//!         _ => "retry",
//!     }
//! }
//! ```

use std::fmt;

/// Main error type for clinqc operations.
#[derive(Debug)]
pub enum ClinqcError {
    /// I/O errors (file operations)
    Io(std::io::Error),

    /// Required column missing or unreadable input file
    Schema(String),

    /// Malformed cell value
    Parse(String),

    /// Duplicate keys or incompatible snapshot schemas
    Consistency(String),

    /// CSV engine errors
    Data(String),

    /// Configuration errors (JSON, identities, paths)
    Config(String),

    /// Generic error with context
    Other(String),
}

impl ClinqcError {
    /// Stable short label used in run reports and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Schema(_) => "schema",
            Self::Parse(_) => "parse",
            Self::Consistency(_) => "consistency",
            Self::Data(_) => "data",
            Self::Config(_) => "config",
            Self::Other(_) => "other",
        }
    }

    /// Parse errors are recovered where they happen; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }
}

impl fmt::Display for ClinqcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Schema(msg) => write!(f, "Schema error: {msg}"),
            Self::Parse(msg) => write!(f, "Parse error: {msg}"),
            Self::Consistency(msg) => write!(f, "Consistency error: {msg}"),
            Self::Data(msg) => write!(f, "Data processing error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ClinqcError {}

impl From<std::io::Error> for ClinqcError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ClinqcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for ClinqcError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::Data(err.to_string())
    }
}

/// Result type alias for clinqc operations.
pub type Result<T> = std::result::Result<T, ClinqcError>;

/// Extension trait to add context to results.
///
/// The context is prepended to the message while the variant is preserved, so a
/// schema error stays a schema error after passing through several layers.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ClinqcError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        let msg = msg.into();
        self.map_err(|e| prefix(e.into(), &msg))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| prefix(e.into(), &f()))
    }
}

fn prefix(err: ClinqcError, msg: &str) -> ClinqcError {
    match err {
        ClinqcError::Io(e) => {
            ClinqcError::Io(std::io::Error::new(e.kind(), format!("{msg}: {e}")))
        }
        ClinqcError::Schema(m) => ClinqcError::Schema(format!("{msg}: {m}")),
        ClinqcError::Parse(m) => ClinqcError::Parse(format!("{msg}: {m}")),
        ClinqcError::Consistency(m) => ClinqcError::Consistency(format!("{msg}: {m}")),
        ClinqcError::Data(m) => ClinqcError::Data(format!("{msg}: {m}")),
        ClinqcError::Config(m) => ClinqcError::Config(format!("{msg}: {m}")),
        ClinqcError::Other(m) => ClinqcError::Other(format!("{msg}: {m}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClinqcError::Schema("column 'IQ' not found".to_owned());
        assert_eq!(err.to_string(), "Schema error: column 'IQ' not found");
    }

    #[test]
    fn test_parse_errors_are_recoverable() {
        assert!(!ClinqcError::Parse("bad date".to_owned()).is_fatal());
        assert!(ClinqcError::Consistency("dup".to_owned()).is_fatal());
        assert_eq!(ClinqcError::Consistency("dup".to_owned()).kind(), "consistency");
    }

    #[test]
    fn test_result_context_keeps_variant() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file.txt",
        ));

        let err = result.context("Failed to read file").unwrap_err();
        assert!(matches!(err, ClinqcError::Io(_)));
        assert!(err.to_string().contains("Failed to read file"));

        let schema: Result<()> = Err(ClinqcError::Schema("missing 'age'".to_owned()));
        let err = schema.with_context(|| "cleaning cohort1".to_owned()).unwrap_err();
        assert_eq!(err.kind(), "schema");
        assert!(err.to_string().contains("cleaning cohort1: missing 'age'"));
    }
}
