//! Fixed-capacity sliding window of multi-channel samples.

use std::collections::VecDeque;

use ndarray::Array2;
use thiserror::Error;

/// Errors raised by [`WindowBuffer`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// Window size or channel count was zero.
    #[error("Window buffer needs a non-zero size, got {window_size} samples x {channels} channels")]
    EmptyShape { window_size: usize, channels: usize },
    /// A pushed sample had the wrong number of channels.
    #[error("Sample has {actual} channels, window expects {expected}")]
    ChannelCount { expected: usize, actual: usize },
    /// A full window was requested before enough samples arrived.
    #[error("Window holds {filled} of {capacity} samples")]
    NotFull { filled: usize, capacity: usize },
}

/// Bounded FIFO of the most recent samples, oldest first.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    samples: VecDeque<Vec<f64>>,
    capacity: usize,
    channels: usize,
}

/// Window contents before the buffer has filled.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialWindow {
    /// `filled x channels`, oldest first.
    pub data: Array2<f64>,
    pub filled: usize,
    pub capacity: usize,
}

impl WindowBuffer {
    pub fn new(window_size: usize, channels: usize) -> Result<Self, WindowError> {
        if window_size == 0 || channels == 0 {
            return Err(WindowError::EmptyShape {
                window_size,
                channels,
            });
        }
        Ok(Self {
            samples: VecDeque::with_capacity(window_size),
            capacity: window_size,
            channels,
        })
    }

    /// Append one sample, evicting the oldest when at capacity.
    pub fn push(&mut self, sample: &[f64]) -> Result<(), WindowError> {
        if sample.len() != self.channels {
            return Err(WindowError::ChannelCount {
                expected: self.channels,
                actual: sample.len(),
            });
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample.to_vec());
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The last `window_size` samples as a `time x channel` matrix.
    pub fn snapshot(&self) -> Result<Array2<f64>, WindowError> {
        if !self.is_full() {
            return Err(WindowError::NotFull {
                filled: self.samples.len(),
                capacity: self.capacity,
            });
        }
        Ok(self.to_matrix())
    }

    /// Current contents regardless of fill level, marked with the fill count.
    pub fn partial_snapshot(&self) -> PartialWindow {
        PartialWindow {
            data: self.to_matrix(),
            filled: self.samples.len(),
            capacity: self.capacity,
        }
    }

    fn to_matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.samples.len(), self.channels), |(t, ch)| {
            self.samples[t][ch]
        })
    }
}
