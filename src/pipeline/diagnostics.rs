//! Periodic read-only signal report attached to every Nth prediction.

use ndarray::ArrayView2;
use serde::Serialize;

use crate::spectrum::{SpectralSummary, WindowStats};

/// Fires on every `interval`-th successful decision; 0 never fires.
#[derive(Debug, Clone)]
pub struct DiagnosticsSchedule {
    interval: u64,
    decisions: u64,
}

impl DiagnosticsSchedule {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            decisions: 0,
        }
    }

    /// Count one successful decision and report whether a report is due.
    pub fn record_decision(&mut self) -> bool {
        self.decisions += 1;
        self.interval > 0 && self.decisions % self.interval == 0
    }

    pub fn decisions(&self) -> u64 {
        self.decisions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDiagnostics {
    /// One-based channel number.
    pub channel: usize,
    pub raw_stats: WindowStats,
    pub raw: SpectralSummary,
    pub filtered: SpectralSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowReport {
    /// Successful decisions so far, this one included.
    pub decisions: u64,
    pub sampling_rate: f64,
    pub channels: Vec<ChannelDiagnostics>,
}

impl WindowReport {
    pub fn analyze(
        raw: ArrayView2<'_, f64>,
        filtered: ArrayView2<'_, f64>,
        sampling_rate: f64,
        decisions: u64,
    ) -> Self {
        let channels = raw
            .columns()
            .into_iter()
            .zip(filtered.columns())
            .enumerate()
            .map(|(idx, (raw_col, filtered_col))| {
                let raw_col = raw_col.to_vec();
                let filtered_col = filtered_col.to_vec();
                ChannelDiagnostics {
                    channel: idx + 1,
                    raw_stats: WindowStats::of(&raw_col),
                    raw: SpectralSummary::analyze(&raw_col, sampling_rate),
                    filtered: SpectralSummary::analyze(&filtered_col, sampling_rate),
                }
            })
            .collect();
        Self {
            decisions,
            sampling_rate,
            channels,
        }
    }

    /// Emit the report through `tracing` at info level.
    pub fn log(&self) {
        let nyquist = self.sampling_rate / 2.0;
        for ch in &self.channels {
            tracing::info!(
                channel = ch.channel,
                decisions = self.decisions,
                min = round(ch.raw_stats.min),
                max = round(ch.raw_stats.max),
                mean = round(ch.raw_stats.mean),
                std = round(ch.raw_stats.std),
                "Raw signal"
            );
            tracing::info!(
                channel = ch.channel,
                dominant_hz = round(ch.raw.dominant_hz),
                artifacts_pct = round(ch.raw.motion_percent()),
                emg_pct = round(ch.raw.emg_percent()),
                high_pct = round(ch.raw.high_percent()),
                nyquist_hz = nyquist,
                "Raw spectrum"
            );
            tracing::info!(
                channel = ch.channel,
                dominant_hz = round(ch.filtered.dominant_hz),
                emg_pct = round(ch.filtered.emg_percent()),
                "Filtered spectrum"
            );
        }
    }
}

fn round(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
