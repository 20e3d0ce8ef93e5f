//! Discovery and validation of the checkpoints that make up an ensemble.
//!
//! A model directory either carries an `ensemble.toml` manifest listing its
//! members, or every visible subdirectory is taken as one checkpoint. In both
//! cases all entries are validated up front so a broken member is reported
//! before any model is loaded.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
};

use figment::{
    Figment,
    providers::{Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::artefact::{ArtefactError, ModelArtefact};

/// Name of the optional manifest inside the model directory.
pub const MANIFEST_FILE: &str = "ensemble.toml";

/// Model file expected inside each checkpoint directory when no manifest is
/// present.
pub const DEFAULT_MODEL_FILE: &str = "model.onnx";

/// One ensemble member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Display name, unique within the set.
    pub name: String,
    /// Model file to load.
    pub model: ModelArtefact,
}

impl Checkpoint {
    /// Creates an unpinned checkpoint.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            model: ModelArtefact {
                path: path.into(),
                sha256: None,
            },
        }
    }
}

/// A rejected checkpoint entry and the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCheckpoint {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for InvalidCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Errors produced while assembling a [`CheckpointSet`].
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to list checkpoints in {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse checkpoint manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },
    #[error("no checkpoints found in {path}")]
    Empty { path: PathBuf },
    #[error("invalid checkpoints in {path}: {}", list_invalid(.entries))]
    Invalid {
        path: PathBuf,
        entries: Vec<InvalidCheckpoint>,
    },
    #[error("checkpoint \"{name}\" failed verification: {source}")]
    Artefact {
        name: String,
        #[source]
        source: ArtefactError,
    },
}

fn list_invalid(entries: &[InvalidCheckpoint]) -> String {
    entries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    checkpoints: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestEntry {
    name: String,
    model: PathBuf,
    #[serde(default)]
    sha256: Option<String>,
}

/// Ordered, non-empty collection of checkpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSet {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointSet {
    /// Wraps an explicit list of checkpoints, keeping its order.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Empty`] when `checkpoints` is empty and
    /// [`CheckpointError::Invalid`] when two checkpoints share a name.
    pub fn new(checkpoints: Vec<Checkpoint>) -> Result<Self, CheckpointError> {
        let origin = PathBuf::from("<memory>");
        if checkpoints.is_empty() {
            return Err(CheckpointError::Empty { path: origin });
        }
        let invalid = duplicate_names(&checkpoints);
        if !invalid.is_empty() {
            return Err(CheckpointError::Invalid {
                path: origin,
                entries: invalid,
            });
        }
        Ok(Self { checkpoints })
    }

    /// Finds the checkpoints under `root`.
    ///
    /// Reads [`MANIFEST_FILE`] when present. Otherwise every visible
    /// subdirectory is a checkpoint whose model lives at `<dir>/<model_file>`,
    /// ordered by directory name.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::ReadDir`] or [`CheckpointError::Manifest`]
    /// when the directory or manifest cannot be read,
    /// [`CheckpointError::Invalid`] listing every entry whose model file is
    /// missing, and [`CheckpointError::Empty`] when nothing is found.
    pub fn discover(root: &Path, model_file: &str) -> Result<Self, CheckpointError> {
        let manifest = root.join(MANIFEST_FILE);
        let checkpoints = if manifest.is_file() {
            debug!(path = %manifest.display(), "reading checkpoint manifest");
            from_manifest(root, &manifest)?
        } else {
            from_directories(root, model_file)?
        };

        if checkpoints.is_empty() {
            return Err(CheckpointError::Empty {
                path: root.to_path_buf(),
            });
        }

        let mut invalid = duplicate_names(&checkpoints);
        invalid.extend(checkpoints.iter().filter_map(missing_model));
        if !invalid.is_empty() {
            return Err(CheckpointError::Invalid {
                path: root.to_path_buf(),
                entries: invalid,
            });
        }

        info!(
            path = %root.display(),
            count = checkpoints.len(),
            "discovered checkpoints"
        );
        Ok(Self { checkpoints })
    }

    /// Checks every recorded checksum.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Artefact`] for the first checkpoint whose
    /// model cannot be read or does not match its checksum.
    pub fn verify(&self) -> Result<(), CheckpointError> {
        for checkpoint in &self.checkpoints {
            checkpoint
                .model
                .verify()
                .map_err(|source| CheckpointError::Artefact {
                    name: checkpoint.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Checkpoint> {
        self.checkpoints.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Checkpoint names in set order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.checkpoints.iter().map(|c| c.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a CheckpointSet {
    type Item = &'a Checkpoint;
    type IntoIter = std::slice::Iter<'a, Checkpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn from_manifest(root: &Path, manifest: &Path) -> Result<Vec<Checkpoint>, CheckpointError> {
    let parsed: Manifest = Figment::from(Toml::file(manifest))
        .extract()
        .map_err(|source| CheckpointError::Manifest {
            path: manifest.to_path_buf(),
            source: Box::new(source),
        })?;
    Ok(parsed
        .checkpoints
        .into_iter()
        .map(|entry| Checkpoint {
            name: entry.name,
            model: ModelArtefact {
                path: root.join(entry.model),
                sha256: entry.sha256,
            },
        })
        .collect())
}

fn from_directories(root: &Path, model_file: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
    let read_dir_error = |source| CheckpointError::ReadDir {
        path: root.to_path_buf(),
        source,
    };
    let mut directories = Vec::new();
    for entry in std::fs::read_dir(root).map_err(read_dir_error)? {
        let entry = entry.map_err(read_dir_error)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().map_err(read_dir_error)?.is_dir() {
            directories.push((name, entry.path()));
        }
    }
    directories.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(directories
        .into_iter()
        .map(|(name, dir)| Checkpoint::new(name, dir.join(model_file)))
        .collect())
}

fn missing_model(checkpoint: &Checkpoint) -> Option<InvalidCheckpoint> {
    (!checkpoint.model.path.is_file()).then(|| InvalidCheckpoint {
        name: checkpoint.name.clone(),
        reason: format!("model file {} not found", checkpoint.model.path.display()),
    })
}

fn duplicate_names(checkpoints: &[Checkpoint]) -> Vec<InvalidCheckpoint> {
    let mut seen = HashSet::new();
    checkpoints
        .iter()
        .filter(|checkpoint| !seen.insert(checkpoint.name.as_str()))
        .map(|checkpoint| InvalidCheckpoint {
            name: checkpoint.name.clone(),
            reason: "duplicate checkpoint name".into(),
        })
        .collect()
}
