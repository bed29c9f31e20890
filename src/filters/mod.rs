//! Per-channel digital filters that isolate the EMG band.
//!
//! Every filtering call is a pure function of its input and coefficients
//! designed once per session. Zero-phase filtering is used when the signal is
//! longer than the pad length `3 * (max(len(b), len(a)) - 1)`; shorter signals
//! fall back to a causal single pass. The zero-phase path extends each edge by
//! `3 * max(len(b), len(a))` samples, or one less than the signal length when
//! that is shorter. Both paths return exactly as many samples as they receive.
//!
//! Independent per-window filtering restarts the filters at every window edge,
//! so consecutive windows can disagree near their boundaries. [`IirState`]
//! offers the carried-state alternative.

mod apply;
mod design;

use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use apply::IirState;
use apply::{Normalized, filtfilt, lfilter};

/// Default powerline notch frequency (Hz).
pub const DEFAULT_NOTCH_HZ: f64 = 60.0;
/// Default notch quality factor.
pub const DEFAULT_NOTCH_QUALITY: f64 = 30.0;
/// Default Butterworth order.
pub const DEFAULT_ORDER: usize = 4;

/// Errors raised while designing or applying filters.
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    /// The input is not a usable 1-D sample sequence or the sampling rate is not positive.
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
    /// Design parameters cannot produce a filter at this sampling rate.
    #[error("Invalid filter design: {0}")]
    InvalidDesign(String),
}

/// Transfer-function coefficients: numerator `b` and denominator `a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

impl Coefficients {
    /// Signal length at or below which zero-phase filtering is skipped.
    pub fn pad_length(&self) -> usize {
        3 * self.b.len().max(self.a.len()).saturating_sub(1)
    }

    /// Edge extension used by zero-phase filtering: `3 * max(len(b), len(a))`,
    /// clamped so it stays shorter than the signal.
    pub fn edge_padding(&self, signal_len: usize) -> usize {
        (3 * self.b.len().max(self.a.len())).min(signal_len.saturating_sub(1))
    }
}

/// Butterworth band selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Band {
    Highpass { cutoff_hz: f64 },
    Bandpass { low_hz: f64, high_hz: f64 },
}

/// Which evaluation path a filtering call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPath {
    /// Forward-backward filtering with edge padding.
    ZeroPhase,
    /// Single causal pass; the signal was too short for padding.
    Causal,
}

/// Design a second-order powerline notch.
pub fn design_notch(sampling_rate: f64, notch_hz: f64, quality: f64) -> Result<Coefficients, FilterError> {
    check_sampling_rate(sampling_rate)?;
    design::notch(notch_hz, quality, sampling_rate)
}

/// Design a Butterworth highpass or bandpass filter.
pub fn design_band(sampling_rate: f64, band: Band, order: usize) -> Result<Coefficients, FilterError> {
    check_sampling_rate(sampling_rate)?;
    design::butterworth(order, band, sampling_rate)
}

/// Remove powerline interference around `notch_hz`.
pub fn notch_filter(
    signal: &[f64],
    sampling_rate: f64,
    notch_hz: f64,
    quality: f64,
) -> Result<Vec<f64>, FilterError> {
    let coeffs = design_notch(sampling_rate, notch_hz, quality)?;
    apply_coefficients(&coeffs, signal).map(|(out, _)| out)
}

/// Highpass (single cutoff) or bandpass (two cutoffs) Butterworth filtering.
pub fn highpass_or_bandpass_filter(
    signal: &[f64],
    sampling_rate: f64,
    band: Band,
    order: usize,
) -> Result<Vec<f64>, FilterError> {
    let coeffs = design_band(sampling_rate, band, order)?;
    apply_coefficients(&coeffs, signal).map(|(out, _)| out)
}

/// Apply designed coefficients, choosing zero-phase or causal by signal length.
pub fn apply_coefficients(coeffs: &Coefficients, signal: &[f64]) -> Result<(Vec<f64>, FilterPath), FilterError> {
    if signal.is_empty() {
        return Err(FilterError::InvalidSignal(
            "signal must contain at least one sample".to_string(),
        ));
    }
    let normalized = Normalized::new(coeffs);
    if signal.len() <= coeffs.pad_length() {
        return Ok((lfilter(&normalized, signal), FilterPath::Causal));
    }
    let padding = coeffs.edge_padding(signal.len());
    Ok((filtfilt(&normalized, signal, padding), FilterPath::ZeroPhase))
}

/// Flatten an n-dimensional view to a 1-D signal.
///
/// Succeeds only when at most one axis is longer than one sample.
pub fn flatten_signal(data: ArrayViewD<'_, f64>) -> Result<Vec<f64>, FilterError> {
    let long_axes = data.shape().iter().filter(|&&len| len > 1).count();
    if long_axes > 1 {
        return Err(FilterError::InvalidSignal(format!(
            "expected a 1-D signal, got shape {:?}",
            data.shape()
        )));
    }
    Ok(data.iter().copied().collect())
}

fn check_sampling_rate(sampling_rate: f64) -> Result<(), FilterError> {
    if sampling_rate > 0.0 && sampling_rate.is_finite() {
        Ok(())
    } else {
        Err(FilterError::InvalidSignal(format!(
            "sampling rate must be positive, got {sampling_rate}"
        )))
    }
}

/// Filter parameters resolved from settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub band: Band,
    pub order: usize,
    pub notch_hz: f64,
    pub notch_quality: f64,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            band: Band::Highpass { cutoff_hz: 20.0 },
            order: DEFAULT_ORDER,
            notch_hz: DEFAULT_NOTCH_HZ,
            notch_quality: DEFAULT_NOTCH_QUALITY,
        }
    }
}

/// Band filter followed by the notch, designed once per session.
#[derive(Debug, Clone)]
pub struct FilterChain {
    band: Coefficients,
    notch: Coefficients,
}

impl FilterChain {
    pub fn design(spec: &FilterSpec, sampling_rate: f64) -> Result<Self, FilterError> {
        Ok(Self {
            band: design_band(sampling_rate, spec.band, spec.order)?,
            notch: design_notch(sampling_rate, spec.notch_hz, spec.notch_quality)?,
        })
    }

    /// Filter one channel of a window independently of any previous window.
    pub fn apply(&self, signal: &[f64]) -> Result<(Vec<f64>, FilterPath), FilterError> {
        let (banded, path) = apply_coefficients(&self.band, signal)?;
        let (out, _) = apply_coefficients(&self.notch, &banded)?;
        Ok((out, path))
    }

    /// Fresh carried-state filters for one channel.
    pub fn streaming(&self) -> StreamingChannel {
        StreamingChannel {
            band: IirState::new(&self.band),
            notch: IirState::new(&self.notch),
        }
    }
}

/// Causal band + notch filters with delay lines carried across batches.
#[derive(Debug, Clone)]
pub struct StreamingChannel {
    band: IirState,
    notch: IirState,
}

impl StreamingChannel {
    pub fn process(&mut self, x: f64) -> f64 {
        let banded = self.band.process(x);
        self.notch.process(banded)
    }
}
