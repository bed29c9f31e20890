//! Per-channel standardization with training-time statistics.

use std::path::Path;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{self, ArtifactError};

/// Offset added to every standard deviation before dividing.
pub const EPSILON: f64 = 1e-8;

const KIND: &str = "normalization";

/// Raised when a window's channel count disagrees with the statistics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Shape mismatch: expected {expected} channels, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// Mean and standard deviation per channel plus the trained window length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParams")]
pub struct NormalizationParams {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub window_size: usize,
}

#[derive(Deserialize)]
struct RawParams {
    mean: Stat,
    std: Stat,
    window_size: usize,
}

/// Statistics exported either flat or with one extra singleton-style level.
#[derive(Deserialize)]
#[serde(untagged)]
enum Stat {
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

impl Stat {
    fn squeeze(self, field: &str) -> Result<Vec<f64>, String> {
        match self {
            Stat::Flat(values) => Ok(values),
            Stat::Nested(mut rows) if rows.len() == 1 => Ok(rows.remove(0)),
            Stat::Nested(rows) if rows.iter().all(|row| row.len() == 1) => {
                Ok(rows.into_iter().flatten().collect())
            }
            Stat::Nested(rows) => Err(format!(
                "{field} must be one-dimensional, got {} rows",
                rows.len()
            )),
        }
    }
}

impl TryFrom<RawParams> for NormalizationParams {
    type Error = String;

    fn try_from(raw: RawParams) -> Result<Self, Self::Error> {
        let params = Self {
            mean: raw.mean.squeeze("mean")?,
            std: raw.std.squeeze("std")?,
            window_size: raw.window_size,
        };
        params.validate()?;
        Ok(params)
    }
}

impl NormalizationParams {
    /// Identity statistics: zero mean and unit deviation.
    pub fn identity(channels: usize, window_size: usize) -> Self {
        Self {
            mean: vec![0.0; channels],
            std: vec![1.0; channels],
            window_size,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        artifact::read_json(path, KIND)
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 {
            return Err("window_size must be positive".to_string());
        }
        if self.mean.is_empty() {
            return Err("mean must not be empty".to_string());
        }
        if self.mean.len() != self.std.len() {
            return Err(format!(
                "mean has {} channels but std has {}",
                self.mean.len(),
                self.std.len()
            ));
        }
        if self.mean.iter().chain(&self.std).any(|v| !v.is_finite()) {
            return Err("statistics must be finite".to_string());
        }
        Ok(())
    }
}

/// Applies `(value - mean[ch]) / (std[ch] + EPSILON)` to windows.
#[derive(Debug, Clone)]
pub struct Normalizer {
    params: NormalizationParams,
}

impl Normalizer {
    pub fn new(params: NormalizationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }

    /// Fail unless `channels` matches the statistics.
    pub fn check_channels(&self, channels: usize) -> Result<(), NormalizeError> {
        if channels != self.params.channels() {
            return Err(NormalizeError::ShapeMismatch {
                expected: self.params.channels(),
                actual: channels,
            });
        }
        Ok(())
    }

    /// Normalize a `time x channel` window.
    pub fn normalize(&self, window: ArrayView2<'_, f64>) -> Result<Array2<f64>, NormalizeError> {
        self.check_channels(window.ncols())?;
        let mut out = window.to_owned();
        for (ch, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let mean = self.params.mean[ch];
            let denom = self.params.std[ch] + EPSILON;
            column.mapv_inplace(|v| (v - mean) / denom);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn identity_stats_leave_window_unchanged() {
        let normalizer = Normalizer::new(NormalizationParams::identity(2, 3));
        let window = array![[1.5, -2.0], [0.0, 300.0], [-7.25, 4.0]];
        let out = normalizer.normalize(window.view()).unwrap();
        for (got, want) in out.iter().zip(window.iter()) {
            assert!((got - want).abs() <= want.abs() * 1e-7 + 1e-12);
        }
    }

    #[test]
    fn applies_per_channel_statistics() {
        let normalizer = Normalizer::new(NormalizationParams {
            mean: vec![1.0, 10.0],
            std: vec![2.0, 0.0],
            window_size: 2,
        });
        let out = normalizer.normalize(array![[3.0, 10.0], [1.0, 10.0]].view()).unwrap();
        assert!((out[[0, 0]] - 1.0).abs() < 1e-7);
        assert_eq!(out[[1, 0]], 0.0);
        // Zero-variance channel stays finite.
        assert_eq!(out[[0, 1]], 0.0);
    }

    #[test]
    fn channel_count_mismatch_is_rejected() {
        let normalizer = Normalizer::new(NormalizationParams::identity(2, 4));
        let err = normalizer.normalize(Array2::zeros((4, 3)).view()).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::ShapeMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn loads_flat_and_nested_statistics() {
        let dir = tempdir().unwrap();
        let flat = dir.path().join("flat.json");
        std::fs::write(&flat, r#"{"mean": [1.0, 2.0], "std": [3.0, 4.0], "window_size": 200}"#).unwrap();
        let nested = dir.path().join("nested.json");
        std::fs::write(&nested, r#"{"mean": [[1.0, 2.0]], "std": [[3.0], [4.0]], "window_size": 200}"#)
            .unwrap();

        let a = NormalizationParams::load(&flat).unwrap();
        let b = NormalizationParams::load(&nested).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.channels(), 2);
        assert_eq!(a.window_size, 200);
    }

    #[test]
    fn rejects_inconsistent_statistics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"mean": [1.0, 2.0], "std": [3.0], "window_size": 200}"#).unwrap();
        assert!(matches!(
            NormalizationParams::load(&path),
            Err(ArtifactError::Parse { .. })
        ));
        std::fs::write(&path, r#"{"mean": [1.0], "std": [3.0], "window_size": 0}"#).unwrap();
        assert!(NormalizationParams::load(&path).is_err());
    }
}
