//! Inference adapter around the frozen gesture classifier.

mod sequential;

use std::sync::Arc;

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use thiserror::Error;

pub use sequential::{Activation, LayerSpec, ModelArtifact, Padding, SequentialModel};

/// Failure inside a single inference call. Callers skip the tick and continue.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model inference failed: {0}")]
    Inference(String),
}

/// A classifier mapping a batch of `window_size x n_channels` windows to
/// per-class probabilities.
pub trait GestureModel: Send + Sync {
    /// `(window_size, n_channels)` the model was trained on.
    fn input_shape(&self) -> (usize, usize);
    fn class_count(&self) -> usize;
    /// Returns a `batch x n_classes` matrix.
    fn predict(&self, batch: ArrayView3<'_, f64>) -> Result<Array2<f64>, ModelError>;
}

/// Batches a single normalized window and extracts its probability vector.
///
/// The output is passed through unchanged; the model is trusted to emit a
/// probability distribution.
#[derive(Clone)]
pub struct InferenceAdapter {
    model: Arc<dyn GestureModel>,
}

impl InferenceAdapter {
    pub fn new(model: Arc<dyn GestureModel>) -> Self {
        Self { model }
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.model.input_shape()
    }

    pub fn class_count(&self) -> usize {
        self.model.class_count()
    }

    pub fn infer(&self, window: ArrayView2<'_, f64>) -> Result<Vec<f64>, ModelError> {
        let expected = self.model.input_shape();
        if window.dim() != expected {
            return Err(ModelError::Inference(format!(
                "window shape {:?} does not match model input {expected:?}",
                window.dim()
            )));
        }
        let batch = window.insert_axis(Axis(0));
        let output = self.model.predict(batch)?;
        if output.nrows() != 1 {
            return Err(ModelError::Inference(format!(
                "model returned {} rows for a single window",
                output.nrows()
            )));
        }
        let probabilities = output.row(0).to_vec();
        if probabilities.len() != self.model.class_count() {
            return Err(ModelError::Inference(format!(
                "model returned {} scores for {} classes",
                probabilities.len(),
                self.model.class_count()
            )));
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::Inference("model returned non-finite scores".to_string()));
        }
        Ok(probabilities)
    }
}

impl std::fmt::Debug for InferenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceAdapter")
            .field("input_shape", &self.model.input_shape())
            .field("class_count", &self.model.class_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Scores each window by its mean, ignoring weights.
    struct MeanModel {
        shape: (usize, usize),
        rows: usize,
    }

    impl GestureModel for MeanModel {
        fn input_shape(&self) -> (usize, usize) {
            self.shape
        }

        fn class_count(&self) -> usize {
            2
        }

        fn predict(&self, batch: ArrayView3<'_, f64>) -> Result<Array2<f64>, ModelError> {
            assert_eq!(batch.len_of(Axis(0)), 1);
            let mean = batch.mean().unwrap_or(0.0);
            Ok(Array2::from_shape_fn((self.rows, 2), |(_, c)| {
                if c == 0 { mean } else { 1.0 - mean }
            }))
        }
    }

    #[test]
    fn batches_single_window_and_passes_scores_through() {
        let adapter = InferenceAdapter::new(Arc::new(MeanModel {
            shape: (4, 1),
            rows: 1,
        }));
        let window = Array2::from_elem((4, 1), 0.25);
        assert_eq!(adapter.infer(window.view()).unwrap(), vec![0.25, 0.75]);
    }

    #[test]
    fn wrong_shape_is_an_inference_error() {
        let adapter = InferenceAdapter::new(Arc::new(MeanModel {
            shape: (4, 1),
            rows: 1,
        }));
        let err = adapter.infer(Array2::zeros((3, 1)).view()).unwrap_err();
        assert!(matches!(err, ModelError::Inference(_)));
    }

    #[test]
    fn malformed_model_output_is_an_inference_error() {
        let adapter = InferenceAdapter::new(Arc::new(MeanModel {
            shape: (2, 1),
            rows: 3,
        }));
        assert!(adapter.infer(Array2::zeros((2, 1)).view()).is_err());

        let adapter = InferenceAdapter::new(Arc::new(MeanModel {
            shape: (2, 1),
            rows: 1,
        }));
        let nan = Array2::from_elem((2, 1), f64::NAN);
        assert!(adapter.infer(nan.view()).is_err());
    }
}
