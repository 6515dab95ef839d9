//! Content hashing and the shared hash log.
//!
//! Every raw upload is fingerprinted with a streaming SHA-256 digest. The digest of
//! each successfully processed upload is appended to one hash log shared by all
//! dataset identities; the orchestrator compares a new upload's digest against the
//! most recent entry for its identity to skip byte-identical re-uploads.
//!
//! ## Hash log format
//!
//! Headerless CSV, one line per processed run:
//!
//! ```text
//! 2024-03-01 09:15:02,data/raw/cohort1.csv,9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! ```
//!
//! The timestamp is everything before the first comma and the digest everything after
//! the last one, so paths containing commas still parse.

pub mod hash_log;
pub mod hasher;

pub use hash_log::{HashLog, HashLogEntry};
pub use hasher::{DIGEST_LEN, compute_file_digest, hash_reader, read_with_digest};
