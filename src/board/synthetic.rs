use std::f64::consts::PI;
use std::time::Instant;

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{BoardData, BoardError, BoardSession, Lifecycle};

const NOISE_AMPLITUDE: f64 = 4.0;
const HUM_AMPLITUDE: f64 = 12.0;
const MOTION_AMPLITUDE: f64 = 30.0;
const MOTION_HZ: f64 = 1.5;
const BURST_AMPLITUDE: f64 = 40.0;
const BURST_PERIOD_SECS: f64 = 2.0;
const BURST_ACTIVE_SECS: f64 = 0.8;
const POWERLINE_HZ: f64 = 60.0;

/// How many samples become available between reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Samples accrue in real time at the sampling rate.
    WallClock,
    /// Every read finds exactly this many new samples.
    Fixed(usize),
}

/// Deterministic EMG-like signal source.
///
/// Row 0 is a package counter; rows `1..=channels` carry EMG made of a noise
/// floor, powerline hum, slow motion drift and periodic muscle bursts.
pub struct SyntheticBoard {
    channels: usize,
    sampling_rate: f64,
    pacing: Pacing,
    rng: StdRng,
    lifecycle: Lifecycle,
    started_at: Option<Instant>,
    /// Samples produced so far; also the next sample's index.
    produced: u64,
    /// Samples made available but not yet read (fixed pacing).
    pending: u64,
}

impl SyntheticBoard {
    pub fn new(channels: usize, sampling_rate: f64, seed: u64, pacing: Pacing) -> Self {
        Self {
            channels,
            sampling_rate,
            pacing,
            rng: StdRng::seed_from_u64(seed),
            lifecycle: Lifecycle::default(),
            started_at: None,
            produced: 0,
            pending: 0,
        }
    }

    fn available(&mut self) -> u64 {
        match self.pacing {
            Pacing::WallClock => {
                let elapsed = self.started_at.map_or(0.0, |start| start.elapsed().as_secs_f64());
                let due = (elapsed * self.sampling_rate) as u64;
                due.saturating_sub(self.produced)
            }
            Pacing::Fixed(per_read) => {
                self.pending += per_read as u64;
                self.pending
            }
        }
    }

    fn sample(&mut self, index: u64, channel: usize) -> f64 {
        let t = index as f64 / self.sampling_rate;
        let phase = channel as f64 * 0.7;
        let hum = HUM_AMPLITUDE * (2.0 * PI * POWERLINE_HZ * t + phase).sin();
        let motion = MOTION_AMPLITUDE * (2.0 * PI * MOTION_HZ * t + phase).sin();
        let in_burst = (t + channel as f64 * 0.25) % BURST_PERIOD_SECS < BURST_ACTIVE_SECS;
        let noise = self.rng.random_range(-1.0..1.0) * NOISE_AMPLITUDE;
        let burst = if in_burst {
            self.rng.random_range(-1.0..1.0) * BURST_AMPLITUDE
        } else {
            0.0
        };
        hum + motion + noise + burst
    }
}

impl BoardSession for SyntheticBoard {
    fn prepare_session(&mut self) -> Result<(), BoardError> {
        if self.channels == 0 || !(self.sampling_rate > 0.0) {
            return Err(BoardError::DeviceUnavailable(format!(
                "synthetic board needs channels and a positive rate, got {} channels at {} Hz",
                self.channels, self.sampling_rate
            )));
        }
        self.lifecycle.prepare()
    }

    fn start_stream(&mut self) -> Result<(), BoardError> {
        self.lifecycle.start()?;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), BoardError> {
        self.lifecycle.stop()
    }

    fn release_session(&mut self) -> Result<(), BoardError> {
        self.lifecycle.release()
    }

    fn get_current_board_data(&mut self, max_samples: usize) -> Result<BoardData, BoardError> {
        self.lifecycle.ensure_streaming()?;
        let count = self.available().min(max_samples as u64) as usize;
        if let Pacing::Fixed(_) = self.pacing {
            self.pending -= count as u64;
        }
        let mut data = BoardData::zeros((self.channels + 1, count));
        for col in 0..count {
            let index = self.produced + col as u64;
            data[[0, col]] = (index % 256) as f64;
            for ch in 0..self.channels {
                data[[ch + 1, col]] = self.sample(index, ch);
            }
        }
        self.produced += count as u64;
        Ok(data)
    }

    fn emg_channels(&self) -> Vec<usize> {
        (1..=self.channels).collect()
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn describe(&self) -> String {
        format!("synthetic ({} ch @ {} Hz)", self.channels, self.sampling_rate)
    }
}
