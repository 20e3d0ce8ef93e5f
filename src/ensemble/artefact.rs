use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while checking a model artefact on disk.
#[derive(Debug, Error)]
pub enum ArtefactError {
    #[error("failed to read artefact at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artefact at {path} expected SHA-256 {expected} but found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Model file belonging to one checkpoint, optionally pinned to a checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtefact {
    /// Location of the model file on disk.
    pub path: PathBuf,
    /// Expected SHA-256 checksum expressed as hexadecimal, when recorded.
    pub sha256: Option<String>,
}

impl ModelArtefact {
    /// Verifies the artefact checksum when one is recorded.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` when the computed digest does not match
    /// `sha256` and propagates I/O errors while reading the file.
    pub fn verify(&self) -> Result<(), ArtefactError> {
        let Some(expected) = self.sha256.as_deref() else {
            return Ok(());
        };
        let expected = normalise_hex(expected);
        let actual = compute_sha256(&self.path)?;
        if actual == expected {
            Ok(())
        } else {
            Err(ArtefactError::ChecksumMismatch {
                path: self.path.clone(),
                expected,
                actual,
            })
        }
    }
}

/// Computes the SHA-256 digest of the file at `path`.
///
/// # Errors
///
/// Returns I/O errors from opening or reading the file.
pub fn compute_sha256(path: &Path) -> Result<String, ArtefactError> {
    let io_error = |source| ArtefactError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = reader.read(&mut buffer).map_err(io_error)?;
        if read == 0 {
            break;
        }
        let chunk = buffer
            .get(..read)
            .ok_or_else(|| io_error(std::io::Error::other("read past buffer end")))?;
        hasher.update(chunk);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn normalise_hex(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
