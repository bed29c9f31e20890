use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::decision::GestureNames;
use crate::filters::{Band, FilterSpec};

pub const MODEL_FILE_NAME: &str = "model.json";
pub const LABEL_ENCODER_FILE_NAME: &str = "label_encoder.json";
pub const NORMALIZATION_FILE_NAME: &str = "normalization.json";

/// All runtime settings, persisted as `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub board: BoardSettings,
    pub acquisition: AcquisitionSettings,
    pub filters: FilterSettings,
    pub artifacts: ArtifactPaths,
    pub gestures: GestureSettings,
    pub diagnostics: DiagnosticsSettings,
}

/// Which board implementation to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    /// Seeded EMG-like generator.
    #[default]
    Synthetic,
    /// Recorded CSV played back at the sampling rate.
    Replay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub kind: BoardKind,
    /// Serial port of a hardware board; logged for reference.
    pub serial_port: Option<String>,
    /// Seconds allowed for preparing a session.
    pub timeout_secs: u64,
    /// CSV recording used by the replay board.
    pub replay_path: Option<PathBuf>,
    pub sampling_rate_hz: f64,
    /// EMG channels exposed by the synthetic and replay boards.
    pub channel_count: usize,
    pub seed: u64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            kind: BoardKind::default(),
            serial_port: None,
            timeout_secs: 15,
            replay_path: None,
            sampling_rate_hz: 200.0,
            channel_count: 4,
            seed: 42,
        }
    }
}

/// Where inference runs relative to the tick loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// On the tick loop thread.
    #[default]
    Inline,
    /// On one dedicated worker thread, results emitted in window order.
    Worker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Indices into the board's EMG channel list.
    pub active_channels: Vec<usize>,
    pub tick_interval_ms: u64,
    pub max_samples_per_read: usize,
    pub inference: InferenceMode,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            active_channels: vec![0],
            tick_interval_ms: 50,
            max_samples_per_read: 200,
            inference: InferenceMode::default(),
        }
    }
}

impl AcquisitionSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// How filters relate to window boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Filter every full window independently.
    #[default]
    Window,
    /// Carry causal filter state per channel across reads.
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub notch_hz: f64,
    pub notch_quality: f64,
    pub highpass_hz: f64,
    /// Upper cutoff; turns the highpass into a bandpass.
    pub lowpass_hz: Option<f64>,
    pub order: usize,
    pub mode: FilterMode,
}

impl Default for FilterSettings {
    fn default() -> Self {
        let spec = FilterSpec::default();
        let highpass_hz = match spec.band {
            Band::Highpass { cutoff_hz } => cutoff_hz,
            Band::Bandpass { low_hz, .. } => low_hz,
        };
        Self {
            notch_hz: spec.notch_hz,
            notch_quality: spec.notch_quality,
            highpass_hz,
            lowpass_hz: None,
            order: spec.order,
            mode: FilterMode::default(),
        }
    }
}

impl FilterSettings {
    pub fn to_spec(&self) -> FilterSpec {
        let band = match self.lowpass_hz {
            Some(high_hz) => Band::Bandpass {
                low_hz: self.highpass_hz,
                high_hz,
            },
            None => Band::Highpass {
                cutoff_hz: self.highpass_hz,
            },
        };
        FilterSpec {
            band,
            order: self.order,
            notch_hz: self.notch_hz,
            notch_quality: self.notch_quality,
        }
    }
}

/// Artifact locations; unset paths resolve inside `<app root>/artifacts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub model_path: Option<PathBuf>,
    pub label_encoder_path: Option<PathBuf>,
    pub normalization_path: Option<PathBuf>,
}

/// Fully resolved artifact locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifactPaths {
    pub model: PathBuf,
    pub label_encoder: PathBuf,
    pub normalization: PathBuf,
}

impl ArtifactPaths {
    pub fn resolve(&self) -> Result<ResolvedArtifactPaths, ConfigError> {
        let needs_default = self.model_path.is_none()
            || self.label_encoder_path.is_none()
            || self.normalization_path.is_none();
        let base = if needs_default {
            Some(crate::app_dirs::artifacts_dir()?)
        } else {
            None
        };
        let pick = |explicit: &Option<PathBuf>, file_name: &str| -> PathBuf {
            match (explicit, &base) {
                (Some(path), _) => path.clone(),
                (None, Some(base)) => base.join(file_name),
                (None, None) => PathBuf::from(file_name),
            }
        };
        Ok(ResolvedArtifactPaths {
            model: pick(&self.model_path, MODEL_FILE_NAME),
            label_encoder: pick(&self.label_encoder_path, LABEL_ENCODER_FILE_NAME),
            normalization: pick(&self.normalization_path, NORMALIZATION_FILE_NAME),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureSettings {
    /// Decoded label to display name.
    pub names: GestureNames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Run the spectral summary every N predictions; 0 disables it.
    pub interval: u64,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self { interval: 20 }
    }
}

impl Settings {
    /// Clean up values that deserialize but carry no meaning.
    pub fn normalized(mut self) -> Self {
        let blank = |value: &Option<String>| value.as_deref().is_some_and(|v| v.trim().is_empty());
        if blank(&self.board.serial_port) {
            self.board.serial_port = None;
        }
        for path in [
            &mut self.board.replay_path,
            &mut self.artifacts.model_path,
            &mut self.artifacts.label_encoder_path,
            &mut self.artifacts.normalization_path,
        ] {
            if path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                *path = None;
            }
        }
        self
    }

    /// Check every range the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let board = &self.board;
        ensure(
            board.sampling_rate_hz.is_finite() && board.sampling_rate_hz > 0.0,
            "board.sampling_rate_hz",
            || format!("must be positive, got {}", board.sampling_rate_hz),
        )?;
        ensure(board.channel_count > 0, "board.channel_count", || {
            "must be at least 1".to_string()
        })?;
        ensure(
            board.kind != BoardKind::Replay || board.replay_path.is_some(),
            "board.replay_path",
            || "required when board.kind = \"replay\"".to_string(),
        )?;

        let acq = &self.acquisition;
        ensure(!acq.active_channels.is_empty(), "acquisition.active_channels", || {
            "must list at least one channel".to_string()
        })?;
        let unique: BTreeSet<_> = acq.active_channels.iter().collect();
        ensure(
            unique.len() == acq.active_channels.len(),
            "acquisition.active_channels",
            || format!("contains duplicates: {:?}", acq.active_channels),
        )?;
        ensure(
            (1..=1000).contains(&acq.tick_interval_ms),
            "acquisition.tick_interval_ms",
            || format!("must be within 1..=1000, got {}", acq.tick_interval_ms),
        )?;
        ensure(
            (1..=10_000).contains(&acq.max_samples_per_read),
            "acquisition.max_samples_per_read",
            || format!("must be within 1..=10000, got {}", acq.max_samples_per_read),
        )?;

        let filters = &self.filters;
        ensure(filters.order >= 1, "filters.order", || "must be at least 1".to_string())?;
        ensure(
            filters.notch_quality.is_finite() && filters.notch_quality > 0.0,
            "filters.notch_quality",
            || format!("must be positive, got {}", filters.notch_quality),
        )?;
        ensure(filters.notch_hz > 0.0, "filters.notch_hz", || {
            format!("must be positive, got {}", filters.notch_hz)
        })?;
        ensure(filters.highpass_hz > 0.0, "filters.highpass_hz", || {
            format!("must be positive, got {}", filters.highpass_hz)
        })?;
        if let Some(lowpass) = filters.lowpass_hz {
            ensure(lowpass > filters.highpass_hz, "filters.lowpass_hz", || {
                format!(
                    "must exceed filters.highpass_hz ({}), got {lowpass}",
                    filters.highpass_hz
                )
            })?;
        }
        Ok(())
    }
}

fn ensure(
    condition: bool,
    field: &'static str,
    message: impl FnOnce() -> String,
) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            message: message(),
        })
    }
}
