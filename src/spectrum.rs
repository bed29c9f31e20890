//! Frequency-domain summaries for diagnostics.
//!
//! Welch power spectral density with a periodic Hann window, half-overlapping
//! segments of at most 256 samples, per-segment mean removal and density
//! scaling. Band powers integrate the one-sided PSD with the trapezoid rule.

use std::f64::consts::PI;

use rustfft::{FftPlanner, num_complex::Complex64};
use serde::Serialize;

/// Longest Welch segment.
pub const MAX_SEGMENT_LEN: usize = 256;
/// Motion-artifact band upper edge (Hz).
pub const MOTION_BAND_MAX_HZ: f64 = 20.0;
/// Useful EMG band upper edge (Hz).
pub const EMG_BAND_MAX_HZ: f64 = 90.0;

/// One-sided power spectral density.
#[derive(Debug, Clone, PartialEq)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
}

/// Estimate the PSD of `signal` sampled at `sampling_rate` Hz.
///
/// Returns an empty estimate for an empty signal.
pub fn welch(signal: &[f64], sampling_rate: f64) -> Psd {
    let seg_len = signal.len().min(MAX_SEGMENT_LEN);
    if seg_len == 0 {
        return Psd {
            freqs: Vec::new(),
            power: Vec::new(),
        };
    }
    let overlap = seg_len / 2;
    let step = seg_len - overlap;
    let segments = (signal.len() - seg_len) / step + 1;
    let window = periodic_hann(seg_len);
    let window_energy: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (sampling_rate * window_energy);
    let bins = seg_len / 2 + 1;

    let fft = FftPlanner::<f64>::new().plan_fft_forward(seg_len);
    let mut buffer = vec![Complex64::new(0.0, 0.0); seg_len];
    let mut power = vec![0.0; bins];
    for seg in 0..segments {
        let chunk = &signal[seg * step..seg * step + seg_len];
        let mean = chunk.iter().sum::<f64>() / seg_len as f64;
        for ((slot, &x), &w) in buffer.iter_mut().zip(chunk).zip(&window) {
            *slot = Complex64::new((x - mean) * w, 0.0);
        }
        fft.process(&mut buffer);
        for (acc, value) in power.iter_mut().zip(&buffer) {
            *acc += value.norm_sqr() * scale;
        }
    }

    // Fold negative frequencies; DC and an even-length Nyquist bin are unique.
    let last_doubled = if seg_len % 2 == 0 { bins - 1 } else { bins };
    for (idx, value) in power.iter_mut().enumerate() {
        *value /= segments as f64;
        if idx > 0 && idx < last_doubled {
            *value *= 2.0;
        }
    }
    let freqs = (0..bins)
        .map(|k| k as f64 * sampling_rate / seg_len as f64)
        .collect();
    Psd { freqs, power }
}

impl Psd {
    /// Frequency of the strongest non-DC bin, or 0 when there is none.
    pub fn dominant_frequency(&self) -> f64 {
        let Some(tail) = self.power.get(1..) else {
            return 0.0;
        };
        let mut best: Option<(usize, f64)> = None;
        for (idx, &value) in tail.iter().enumerate() {
            if best.is_none_or(|(_, top)| value > top) {
                best = Some((idx, value));
            }
        }
        best.map(|(idx, _)| self.freqs[idx + 1]).unwrap_or(0.0)
    }

    /// Integrated power over bins with `min_hz <= f <= max_hz`.
    pub fn band_power(&self, min_hz: f64, max_hz: f64) -> f64 {
        let (freqs, power): (Vec<f64>, Vec<f64>) = self
            .freqs
            .iter()
            .zip(&self.power)
            .filter(|(f, _)| **f >= min_hz && **f <= max_hz)
            .map(|(f, p)| (*f, *p))
            .unzip();
        trapezoid(&freqs, &power)
    }

    pub fn total_power(&self) -> f64 {
        trapezoid(&self.freqs, &self.power)
    }
}

fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]))
        .sum()
}

fn periodic_hann(len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / len as f64).cos())
        .collect()
}

/// Dominant frequency and power split across the motion, EMG and high bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectralSummary {
    pub dominant_hz: f64,
    pub total_power: f64,
    pub motion_power: f64,
    pub emg_power: f64,
    pub high_power: f64,
}

impl SpectralSummary {
    pub fn analyze(signal: &[f64], sampling_rate: f64) -> Self {
        let psd = welch(signal, sampling_rate);
        let nyquist = sampling_rate / 2.0;
        Self {
            dominant_hz: psd.dominant_frequency(),
            total_power: psd.total_power(),
            motion_power: psd.band_power(0.0, MOTION_BAND_MAX_HZ),
            emg_power: psd.band_power(MOTION_BAND_MAX_HZ, EMG_BAND_MAX_HZ),
            high_power: psd.band_power(EMG_BAND_MAX_HZ, nyquist),
        }
    }

    pub fn motion_percent(&self) -> f64 {
        percent(self.motion_power, self.total_power)
    }

    pub fn emg_percent(&self) -> f64 {
        percent(self.emg_power, self.total_power)
    }

    pub fn high_percent(&self) -> f64 {
        percent(self.high_power, self.total_power)
    }
}

fn percent(part: f64, total: f64) -> f64 {
    if total > 0.0 { part / total * 100.0 } else { 0.0 }
}

/// Range and moments of one channel of a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
}

impl WindowStats {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std: variance.sqrt(),
        }
    }
}
