//! Frozen sequential 1-D convolutional network loaded from JSON weights.
//!
//! Layers follow channels-last conventions: a sequence activation is a
//! `time x features` matrix, and `flatten` walks it time-major.

use std::fmt;
use std::path::Path;

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use super::{GestureModel, ModelError};
use crate::artifact::{self, ArtifactError};

const KIND: &str = "model";

/// Serialized network description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// `[window_size, n_channels]`.
    pub input_shape: [usize; 2],
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Softmax,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    Valid,
    Same,
}

fn default_batch_norm_epsilon() -> f64 {
    1e-3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv1d {
        /// `[kernel_size][in_features][filters]`.
        kernel: Vec<Vec<Vec<f64>>>,
        bias: Vec<f64>,
        #[serde(default)]
        padding: Padding,
        #[serde(default)]
        activation: Activation,
    },
    BatchNorm {
        gamma: Vec<f64>,
        beta: Vec<f64>,
        moving_mean: Vec<f64>,
        moving_variance: Vec<f64>,
        #[serde(default = "default_batch_norm_epsilon")]
        epsilon: f64,
    },
    MaxPool1d {
        pool_size: usize,
        #[serde(default)]
        stride: Option<usize>,
    },
    GlobalAveragePool1d,
    Flatten,
    Dense {
        /// `[in_features][units]`.
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
        #[serde(default)]
        activation: Activation,
    },
    Dropout {
        #[serde(default)]
        rate: f64,
    },
}

impl ModelArtifact {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        artifact::read_json(path, KIND)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Sequence { len: usize, features: usize },
    Flat(usize),
}

impl Shape {
    fn features(self) -> usize {
        match self {
            Shape::Sequence { features, .. } => features,
            Shape::Flat(len) => len,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Sequence { len, features } => write!(f, "({len}, {features})"),
            Shape::Flat(len) => write!(f, "({len})"),
        }
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Conv1d {
        kernel: Array3<f64>,
        bias: Array1<f64>,
        padding: Padding,
        activation: Activation,
    },
    BatchNorm {
        scale: Array1<f64>,
        shift: Array1<f64>,
    },
    MaxPool1d {
        pool_size: usize,
        stride: usize,
    },
    GlobalAveragePool1d,
    Flatten,
    Dense {
        weights: Array2<f64>,
        bias: Array1<f64>,
        activation: Activation,
    },
    Dropout,
}

impl Layer {
    fn name(&self) -> &'static str {
        match self {
            Layer::Conv1d { .. } => "conv1d",
            Layer::BatchNorm { .. } => "batch_norm",
            Layer::MaxPool1d { .. } => "max_pool1d",
            Layer::GlobalAveragePool1d => "global_average_pool1d",
            Layer::Flatten => "flatten",
            Layer::Dense { .. } => "dense",
            Layer::Dropout => "dropout",
        }
    }

    fn output_shape(&self, input: Shape) -> Result<Shape, String> {
        match (self, input) {
            (Layer::Conv1d { kernel, padding, .. }, Shape::Sequence { len, features }) => {
                let (k, in_features, filters) = kernel.dim();
                if in_features != features {
                    return Err(format!("expects {in_features} input features, got {features}"));
                }
                let len = match padding {
                    Padding::Same => len,
                    Padding::Valid if len >= k => len - k + 1,
                    Padding::Valid => {
                        return Err(format!("kernel {k} longer than sequence {len}"));
                    }
                };
                Ok(Shape::Sequence {
                    len,
                    features: filters,
                })
            }
            (Layer::BatchNorm { scale, .. }, shape) => {
                if scale.len() != shape.features() {
                    return Err(format!(
                        "has {} channels, input has {}",
                        scale.len(),
                        shape.features()
                    ));
                }
                Ok(shape)
            }
            (Layer::MaxPool1d { pool_size, stride }, Shape::Sequence { len, features }) => {
                if len < *pool_size {
                    return Err(format!("pool {pool_size} longer than sequence {len}"));
                }
                Ok(Shape::Sequence {
                    len: (len - pool_size) / stride + 1,
                    features,
                })
            }
            (Layer::GlobalAveragePool1d, Shape::Sequence { features, .. }) => Ok(Shape::Flat(features)),
            (Layer::Flatten, Shape::Sequence { len, features }) => Ok(Shape::Flat(len * features)),
            (Layer::Flatten, flat @ Shape::Flat(_)) => Ok(flat),
            (Layer::Dense { weights, .. }, Shape::Flat(len)) => {
                let (in_features, units) = weights.dim();
                if in_features != len {
                    return Err(format!("expects {in_features} inputs, got {len}"));
                }
                Ok(Shape::Flat(units))
            }
            (Layer::Dropout, shape) => Ok(shape),
            (layer, shape) => Err(format!("cannot take input of shape {shape} at {}", layer.name())),
        }
    }
}

/// Activation flowing between layers for a single window.
enum Tensor {
    Sequence(Array2<f64>),
    Flat(Array1<f64>),
}

/// Compiled network ready for batch-size-1 inference.
#[derive(Debug, Clone)]
pub struct SequentialModel {
    input_shape: (usize, usize),
    layers: Vec<Layer>,
    shapes: Vec<Shape>,
    class_count: usize,
}

impl SequentialModel {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        Self::from_artifact(ModelArtifact::load(path)?)
    }

    /// Convert weights to dense arrays and validate every layer's shape.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ArtifactError> {
        let [window_size, channels] = artifact.input_shape;
        if window_size == 0 || channels == 0 {
            return Err(ArtifactError::invalid(KIND, "input_shape must be positive"));
        }
        let mut shape = Shape::Sequence {
            len: window_size,
            features: channels,
        };
        let mut layers = Vec::with_capacity(artifact.layers.len());
        let mut shapes = Vec::with_capacity(artifact.layers.len());
        for (idx, spec) in artifact.layers.into_iter().enumerate() {
            let layer = compile_layer(spec).map_err(|msg| layer_error(idx, msg))?;
            shape = layer
                .output_shape(shape)
                .map_err(|msg| layer_error(idx, format!("{} {msg}", layer.name())))?;
            layers.push(layer);
            shapes.push(shape);
        }
        let class_count = match shape {
            Shape::Flat(classes) if classes > 0 => classes,
            other => {
                return Err(ArtifactError::invalid(
                    KIND,
                    format!("network must end in a flat class vector, ends in {other}"),
                ));
            }
        };
        Ok(Self {
            input_shape: (window_size, channels),
            layers,
            shapes,
            class_count,
        })
    }

    /// One line per layer with its output shape.
    pub fn summary(&self) -> Vec<String> {
        let (window, channels) = self.input_shape;
        let mut lines = vec![format!("input -> ({window}, {channels})")];
        lines.extend(
            self.layers
                .iter()
                .zip(&self.shapes)
                .map(|(layer, shape)| format!("{} -> {shape}", layer.name())),
        );
        lines
    }

    fn forward(&self, window: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut tensor = Tensor::Sequence(window.to_owned());
        for layer in &self.layers {
            tensor = apply_layer(layer, tensor);
        }
        match tensor {
            Tensor::Flat(values) => values,
            Tensor::Sequence(values) => values.into_iter().collect(),
        }
    }
}

impl GestureModel for SequentialModel {
    fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    fn class_count(&self) -> usize {
        self.class_count
    }

    fn predict(&self, batch: ArrayView3<'_, f64>) -> Result<Array2<f64>, ModelError> {
        let (_, window, channels) = batch.dim();
        if (window, channels) != self.input_shape {
            return Err(ModelError::Inference(format!(
                "model expects windows of {:?}, got ({window}, {channels})",
                self.input_shape
            )));
        }
        let mut out = Array2::zeros((batch.len_of(Axis(0)), self.class_count));
        for (item, mut row) in batch.outer_iter().zip(out.outer_iter_mut()) {
            row.assign(&self.forward(item));
        }
        Ok(out)
    }
}

fn layer_error(idx: usize, message: String) -> ArtifactError {
    ArtifactError::invalid(KIND, format!("layer {idx}: {message}"))
}

fn compile_layer(spec: LayerSpec) -> Result<Layer, String> {
    match spec {
        LayerSpec::Conv1d {
            kernel,
            bias,
            padding,
            activation,
        } => {
            let k = kernel.len();
            let in_features = kernel.first().map_or(0, Vec::len);
            let filters = kernel
                .first()
                .and_then(|taps| taps.first())
                .map_or(0, Vec::len);
            if k == 0 || in_features == 0 || filters == 0 {
                return Err("conv1d kernel must be non-empty".to_string());
            }
            let flat: Vec<f64> = kernel.into_iter().flatten().flatten().collect();
            let kernel = Array3::from_shape_vec((k, in_features, filters), flat)
                .map_err(|_| "conv1d kernel is ragged".to_string())?;
            if bias.len() != filters {
                return Err(format!("conv1d bias has {} entries for {filters} filters", bias.len()));
            }
            Ok(Layer::Conv1d {
                kernel,
                bias: Array1::from(bias),
                padding,
                activation,
            })
        }
        LayerSpec::BatchNorm {
            gamma,
            beta,
            moving_mean,
            moving_variance,
            epsilon,
        } => {
            let n = gamma.len();
            if n == 0 || beta.len() != n || moving_mean.len() != n || moving_variance.len() != n {
                return Err("batch_norm parameter vectors must share a non-zero length".to_string());
            }
            // Fold into a per-channel affine transform.
            let scale: Array1<f64> = gamma
                .iter()
                .zip(&moving_variance)
                .map(|(g, var)| g / (var + epsilon).sqrt())
                .collect();
            let shift: Array1<f64> = beta
                .iter()
                .zip(&moving_mean)
                .zip(&scale)
                .map(|((b, mean), s)| b - mean * s)
                .collect();
            Ok(Layer::BatchNorm { scale, shift })
        }
        LayerSpec::MaxPool1d { pool_size, stride } => {
            let stride = stride.unwrap_or(pool_size);
            if pool_size == 0 || stride == 0 {
                return Err("max_pool1d pool_size and stride must be positive".to_string());
            }
            Ok(Layer::MaxPool1d { pool_size, stride })
        }
        LayerSpec::GlobalAveragePool1d => Ok(Layer::GlobalAveragePool1d),
        LayerSpec::Flatten => Ok(Layer::Flatten),
        LayerSpec::Dense {
            weights,
            bias,
            activation,
        } => {
            let in_features = weights.len();
            let units = weights.first().map_or(0, Vec::len);
            if in_features == 0 || units == 0 {
                return Err("dense weights must be non-empty".to_string());
            }
            let flat: Vec<f64> = weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((in_features, units), flat)
                .map_err(|_| "dense weights are ragged".to_string())?;
            if bias.len() != units {
                return Err(format!("dense bias has {} entries for {units} units", bias.len()));
            }
            Ok(Layer::Dense {
                weights,
                bias: Array1::from(bias),
                activation,
            })
        }
        LayerSpec::Dropout { .. } => Ok(Layer::Dropout),
    }
}

fn apply_layer(layer: &Layer, tensor: Tensor) -> Tensor {
    match (layer, tensor) {
        (
            Layer::Conv1d {
                kernel,
                bias,
                padding,
                activation,
            },
            Tensor::Sequence(x),
        ) => {
            let mut out = conv1d(x.view(), kernel.view(), bias, *padding);
            for mut row in out.outer_iter_mut() {
                activate(row.as_slice_mut(), *activation);
            }
            Tensor::Sequence(out)
        }
        (Layer::BatchNorm { scale, shift }, Tensor::Sequence(mut x)) => {
            for mut row in x.outer_iter_mut() {
                row *= scale;
                row += shift;
            }
            Tensor::Sequence(x)
        }
        (Layer::BatchNorm { scale, shift }, Tensor::Flat(x)) => Tensor::Flat(x * scale + shift),
        (Layer::MaxPool1d { pool_size, stride }, Tensor::Sequence(x)) => {
            let (len, features) = x.dim();
            let out_len = (len - pool_size) / stride + 1;
            let out = Array2::from_shape_fn((out_len, features), |(t, f)| {
                let start = t * stride;
                (start..start + pool_size)
                    .map(|i| x[[i, f]])
                    .fold(f64::NEG_INFINITY, f64::max)
            });
            Tensor::Sequence(out)
        }
        (Layer::GlobalAveragePool1d, Tensor::Sequence(x)) => {
            let features = x.ncols();
            Tensor::Flat(x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(features)))
        }
        (Layer::Flatten, Tensor::Sequence(x)) => Tensor::Flat(x.into_iter().collect()),
        (
            Layer::Dense {
                weights,
                bias,
                activation,
            },
            Tensor::Flat(x),
        ) => {
            let mut out = x.dot(weights) + bias;
            activate(out.as_slice_mut(), *activation);
            Tensor::Flat(out)
        }
        // Shapes were validated at load; remaining pairs pass through.
        (_, tensor) => tensor,
    }
}

fn conv1d(x: ArrayView2<'_, f64>, kernel: ArrayView3<'_, f64>, bias: &Array1<f64>, padding: Padding) -> Array2<f64> {
    let (len, _) = x.dim();
    let (k, _, filters) = kernel.dim();
    let (out_len, pad_left) = match padding {
        Padding::Same => (len, (k - 1) / 2),
        Padding::Valid => (len + 1 - k, 0),
    };
    let mut out = Array2::zeros((out_len, filters));
    for (t, mut row) in out.outer_iter_mut().enumerate() {
        row.assign(bias);
        for tap in 0..k {
            let Some(src) = (t + tap).checked_sub(pad_left) else {
                continue;
            };
            if src >= len {
                continue;
            }
            row += &x.row(src).dot(&kernel.index_axis(Axis(0), tap));
        }
    }
    out
}

fn activate(values: Option<&mut [f64]>, activation: Activation) {
    let Some(values) = values else {
        return;
    };
    match activation {
        Activation::Linear => {}
        Activation::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
        Activation::Softmax => softmax_inplace(values),
    }
}

fn softmax_inplace(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / values.len() as f64;
        values.iter_mut().for_each(|v| *v = uniform);
        return;
    }
    values.iter_mut().for_each(|v| *v /= sum);
}
