//! Streaming SHA-256 digests.
//!
//! Files are read through a fixed buffer, so memory use does not grow with the size
//! of the upload.

use crate::error::{ClinqcError, Result, ResultExt as _};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read buffer size (8 KiB).
const BUFFER_SIZE: usize = 8192;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_LEN: usize = 64;

/// Hash everything `reader` yields.
///
/// Returns the digest as lowercase hex.
pub fn hash_reader<R: Read>(reader: R) -> std::io::Result<String> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, reader);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Digest of a raw upload.
///
/// # Errors
///
/// An unreadable raw file is a [`ClinqcError::Schema`] error: the pipeline cannot
/// establish what it is being asked to process.
pub fn compute_file_digest(path: &Path) -> Result<String> {
    let digest = hash_reader(open_raw(path)?)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    tracing::debug!(path = %path.display(), %digest, "Computed content digest");
    Ok(digest)
}

/// Read a raw upload into memory, hashing each chunk as it is read.
///
/// The digest covers exactly the returned bytes, so a file replaced while a run is in
/// progress can never be logged under the digest of different content.
///
/// # Errors
///
/// Same as [`compute_file_digest`].
pub fn read_with_digest(path: &Path) -> Result<(Vec<u8>, String)> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, open_raw(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut bytes = Vec::new();

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        bytes.extend_from_slice(&buffer[..bytes_read]);
    }

    let digest = format!("{:x}", hasher.finalize());
    tracing::debug!(path = %path.display(), %digest, size = bytes.len(), "Read raw upload");
    Ok((bytes, digest))
}

fn open_raw(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        ClinqcError::Schema(format!("cannot open {} for hashing: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[test]
    fn test_digest_of_known_content() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(
            compute_file_digest(temp_file.path()).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_hash_reader_empty_input() {
        assert_eq!(
            hash_reader(std::io::empty()).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..BUFFER_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();

        let streamed = hash_reader(data.as_slice()).unwrap();
        let one_shot = format!("{:x}", Sha256::digest(&data));

        assert_eq!(streamed, one_shot);
        assert_eq!(streamed.len(), DIGEST_LEN);
    }

    #[test]
    fn test_single_byte_change_changes_digest() {
        let a = hash_reader(&b"subjectkey,age\nA,10\n"[..]).unwrap();
        let b = hash_reader(&b"subjectkey,age\nA,11\n"[..]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_file_is_schema_error() {
        let err = compute_file_digest(Path::new("/nonexistent/raw.csv")).unwrap_err();
        assert_eq!(err.kind(), "schema");
        let err = read_with_digest(Path::new("/nonexistent/raw.csv")).unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn test_read_with_digest_returns_the_hashed_bytes() {
        let data: Vec<u8> = (0..BUFFER_SIZE * 2 + 5).map(|i| (i % 97) as u8).collect();
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let (bytes, digest) = read_with_digest(temp_file.path()).unwrap();

        assert_eq!(bytes, data);
        assert_eq!(digest, format!("{:x}", Sha256::digest(&data)));
        assert_eq!(digest, compute_file_digest(temp_file.path()).unwrap());
    }
}
