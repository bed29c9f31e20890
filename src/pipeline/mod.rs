//! Per-window stage chain: buffer, filter, normalize, infer, decide.
//!
//! [`Pipeline`] is owned by the acquisition loop. The classification half
//! ([`Classifier`]) is immutable and shared by reference, so it can run on the
//! loop thread or on the inference worker.

pub mod diagnostics;
mod worker;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::board::BoardError;
use crate::config::{FilterMode, ResolvedArtifactPaths, Settings};
use crate::decision::{Decision, DecisionError, GestureDecider, GestureNames, LabelEncoder};
use crate::filters::{FilterChain, FilterError, FilterSpec, StreamingChannel, flatten_signal};
use crate::model::{GestureModel, InferenceAdapter, ModelError, SequentialModel};
use crate::normalize::{NormalizationParams, NormalizeError, Normalizer};
use crate::spectrum::WindowStats;
use crate::window::{WindowBuffer, WindowError};

pub use diagnostics::{ChannelDiagnostics, DiagnosticsSchedule, WindowReport};
pub use worker::InferenceWorker;

/// Any failure raised while turning samples into a prediction.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Board(#[from] BoardError),
    /// Normalization and model disagree on the window length.
    #[error("Shape mismatch: normalization window_size {normalization} but model expects {model}")]
    WindowSizeMismatch { normalization: usize, model: usize },
    /// An active channel index is outside the board's EMG channel list.
    #[error("Active channel {index} is not among the board's {available} EMG channels")]
    UnknownChannel { index: usize, available: usize },
    /// The inference worker thread is gone.
    #[error("Inference worker stopped: {0}")]
    WorkerStopped(String),
}

impl PipelineError {
    /// Whether the tick can be skipped and the loop continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Filter(_)
                | PipelineError::Model(_)
                | PipelineError::Decision(_)
                | PipelineError::Window(_)
        )
    }
}

/// Frozen training outputs shared for the session.
#[derive(Clone)]
pub struct Artifacts {
    pub model: Arc<dyn GestureModel>,
    pub normalization: NormalizationParams,
    pub encoder: LabelEncoder,
}

impl Artifacts {
    pub fn load(paths: &ResolvedArtifactPaths) -> Result<Self, ArtifactError> {
        let model = SequentialModel::load(&paths.model)?;
        let normalization = NormalizationParams::load(&paths.normalization)?;
        let encoder = LabelEncoder::load(&paths.label_encoder)?;
        tracing::info!(
            model = %paths.model.display(),
            window_size = normalization.window_size,
            channels = normalization.channels(),
            classes = encoder.len(),
            "Artifacts loaded"
        );
        Ok(Self {
            model: Arc::new(model),
            normalization,
            encoder,
        })
    }

    /// Fail unless normalization, model and live channel count agree.
    pub fn check_compatibility(&self, live_channels: usize) -> Result<(), PipelineError> {
        let (model_window, model_channels) = self.model.input_shape();
        if self.normalization.window_size != model_window {
            return Err(PipelineError::WindowSizeMismatch {
                normalization: self.normalization.window_size,
                model: model_window,
            });
        }
        let normalizer_channels = self.normalization.channels();
        for actual in [model_channels, live_channels] {
            if actual != normalizer_channels {
                return Err(NormalizeError::ShapeMismatch {
                    expected: normalizer_channels,
                    actual,
                }
                .into());
            }
        }
        if self.encoder.len() != self.model.class_count() {
            tracing::warn!(
                encoder_classes = self.encoder.len(),
                model_classes = self.model.class_count(),
                "Label encoder and model disagree on class count; unmatched classes decode as Unknown"
            );
        }
        Ok(())
    }
}

/// Pipeline parameters that do not come from artifacts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sampling_rate: f64,
    pub channels: usize,
    pub filters: FilterSpec,
    pub filter_mode: FilterMode,
    pub names: GestureNames,
    pub diagnostics_interval: u64,
}

impl PipelineConfig {
    /// Settings-derived defaults; the loop overrides rate and channel count
    /// with what the prepared board reports.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sampling_rate: settings.board.sampling_rate_hz,
            channels: settings.acquisition.active_channels.len(),
            filters: settings.filters.to_spec(),
            filter_mode: settings.filters.mode,
            names: settings.gestures.names.clone(),
            diagnostics_interval: settings.diagnostics.interval,
        }
    }
}

/// Normalize, infer and decide. Immutable and thread-safe.
#[derive(Debug)]
pub struct Classifier {
    normalizer: Normalizer,
    adapter: InferenceAdapter,
    decider: GestureDecider,
}

impl Classifier {
    pub fn new(normalizer: Normalizer, adapter: InferenceAdapter, decider: GestureDecider) -> Self {
        Self {
            normalizer,
            adapter,
            decider,
        }
    }

    /// Classify a filtered `window_size x channels` window.
    pub fn classify(&self, filtered: ArrayView2<'_, f64>) -> Result<Decision, PipelineError> {
        let normalized = self.normalizer.normalize(filtered)?;
        let probabilities = self.adapter.infer(normalized.view())?;
        Ok(self.decider.decide(probabilities)?)
    }

    /// Display names for every class, in class order.
    pub fn class_names(&self) -> Vec<String> {
        self.decider.class_names()
    }

    /// Run [`Classifier::classify`] on a prepared window. A model that panics
    /// yields a recoverable [`ModelError`] instead of unwinding the caller.
    pub fn predict(&self, window: &PreparedWindow) -> Result<PredictionResult, PipelineError> {
        let decision = catch_unwind(AssertUnwindSafe(|| self.classify(window.filtered.view())))
            .unwrap_or_else(|_| {
                Err(ModelError::Inference("model panicked during inference".into()).into())
            })?;
        Ok(PredictionResult {
            sequence: window.sequence,
            decision,
            raw: WindowStats::of(&window.raw.iter().copied().collect::<Vec<_>>()),
        })
    }
}

/// One full window ready for classification.
#[derive(Debug, Clone)]
pub struct PreparedWindow {
    /// Zero-based arrival order of full windows.
    pub sequence: u64,
    pub raw: Array2<f64>,
    pub filtered: Array2<f64>,
}

/// Structured record emitted per classified window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub sequence: u64,
    #[serde(flatten)]
    pub decision: Decision,
    /// Range and moments of the raw window across all channels.
    pub raw: WindowStats,
}

/// A prepared window together with its classification outcome.
#[derive(Debug)]
pub struct WindowOutcome {
    pub window: PreparedWindow,
    pub result: Result<PredictionResult, PipelineError>,
}

enum Preprocessor {
    Window(FilterChain),
    Streaming {
        channels: Vec<StreamingChannel>,
        filtered: WindowBuffer,
    },
}

/// Stateful front half of the chain plus the shared classifier.
pub struct Pipeline {
    raw: WindowBuffer,
    preprocessor: Preprocessor,
    classifier: Arc<Classifier>,
    schedule: DiagnosticsSchedule,
    sampling_rate: f64,
    next_sequence: u64,
}

impl Pipeline {
    /// Validate artifacts against the live configuration and design filters.
    pub fn new(config: PipelineConfig, artifacts: Artifacts) -> Result<Self, PipelineError> {
        artifacts.check_compatibility(config.channels)?;
        let window_size = artifacts.normalization.window_size;
        let chain = FilterChain::design(&config.filters, config.sampling_rate)?;
        let preprocessor = match config.filter_mode {
            FilterMode::Window => Preprocessor::Window(chain),
            FilterMode::Streaming => Preprocessor::Streaming {
                channels: (0..config.channels).map(|_| chain.streaming()).collect(),
                filtered: WindowBuffer::new(window_size, config.channels)?,
            },
        };
        let classifier = Classifier::new(
            Normalizer::new(artifacts.normalization),
            InferenceAdapter::new(artifacts.model),
            GestureDecider::new(artifacts.encoder, config.names),
        );
        Ok(Self {
            raw: WindowBuffer::new(window_size, config.channels)?,
            preprocessor,
            classifier: Arc::new(classifier),
            schedule: DiagnosticsSchedule::new(config.diagnostics_interval),
            sampling_rate: config.sampling_rate,
            next_sequence: 0,
        })
    }

    pub fn classifier(&self) -> Arc<Classifier> {
        Arc::clone(&self.classifier)
    }

    pub fn window_size(&self) -> usize {
        self.raw.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.raw.is_full()
    }

    /// Append one active-channel sample.
    pub fn push_sample(&mut self, sample: &[f64]) -> Result<(), PipelineError> {
        self.raw.push(sample)?;
        if let Preprocessor::Streaming { channels, filtered } = &mut self.preprocessor {
            let out: Vec<f64> = channels
                .iter_mut()
                .zip(sample)
                .map(|(filter, &x)| filter.process(x))
                .collect();
            filtered.push(&out)?;
        }
        Ok(())
    }

    /// Snapshot and filter the current window once the buffer is full.
    pub fn prepare_window(&mut self) -> Result<Option<PreparedWindow>, PipelineError> {
        if !self.raw.is_full() {
            return Ok(None);
        }
        let raw = self.raw.snapshot()?;
        let filtered = match &self.preprocessor {
            Preprocessor::Window(chain) => filter_columns(chain, raw.view())?,
            Preprocessor::Streaming { filtered, .. } => filtered.snapshot()?,
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(Some(PreparedWindow {
            sequence,
            raw,
            filtered,
        }))
    }

    /// Count a successful decision; returns a report when one is due.
    pub fn record_success(&mut self, window: &PreparedWindow) -> Option<WindowReport> {
        if !self.schedule.record_decision() {
            return None;
        }
        Some(WindowReport::analyze(
            window.raw.view(),
            window.filtered.view(),
            self.sampling_rate,
            self.schedule.decisions(),
        ))
    }
}

/// Filter each channel of a `time x channel` window independently.
pub fn filter_columns(chain: &FilterChain, window: ArrayView2<'_, f64>) -> Result<Array2<f64>, FilterError> {
    let mut out = Array2::zeros(window.raw_dim());
    for (column, mut target) in window.columns().into_iter().zip(out.columns_mut()) {
        let (filtered, _) = chain.apply(&flatten_signal(column.into_dyn())?)?;
        for (slot, value) in target.iter_mut().zip(filtered) {
            *slot = value;
        }
    }
    Ok(out)
}
