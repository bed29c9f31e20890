//! Loading of training-time JSON artifacts.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while reading or validating a training artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The artifact file could not be read.
    #[error("Failed to read {kind} artifact {path}: {source}")]
    Read {
        kind: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    /// The artifact is not valid JSON for its kind.
    #[error("Invalid {kind} artifact {path}: {source}")]
    Parse {
        kind: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The artifact parsed but its contents are inconsistent.
    #[error("Invalid {kind} artifact: {message}")]
    Invalid { kind: &'static str, message: String },
}

impl ArtifactError {
    pub(crate) fn invalid(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            message: message.into(),
        }
    }
}

/// Read and deserialize a JSON artifact; `kind` names it in errors.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path, kind: &'static str) -> Result<T, ArtifactError> {
    let bytes = std::fs::read(path).map_err(|source| ArtifactError::Read {
        kind,
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Parse {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reports_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let err = read_json::<Vec<f64>>(&missing, "normalization").unwrap_err();
        assert!(matches!(err, ArtifactError::Read { kind: "normalization", .. }));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        let err = read_json::<Vec<f64>>(&broken, "model").unwrap_err();
        assert!(err.to_string().contains("Invalid model artifact"));
    }
}
