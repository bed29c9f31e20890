#![allow(dead_code)]

pub mod myoflow_env;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use myoflow::acquisition::PredictionSink;
use myoflow::board::{BoardData, BoardError, BoardSession};
use myoflow::config::ResolvedArtifactPaths;
use myoflow::pipeline::{PredictionResult, WindowReport};
use serde_json::json;

/// Lifecycle call counters shared with the test after the board moves.
#[derive(Debug, Default)]
pub struct BoardCalls {
    pub prepare: AtomicUsize,
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
    pub release: AtomicUsize,
    pub reads: AtomicUsize,
}

impl BoardCalls {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        Self::count(&self.stop)
    }

    pub fn releases(&self) -> usize {
        Self::count(&self.release)
    }

    pub fn starts(&self) -> usize {
        Self::count(&self.start)
    }

    pub fn read_count(&self) -> usize {
        Self::count(&self.reads)
    }
}

/// Scripted board: serves queued samples a fixed number per read.
pub struct FakeBoard {
    channels: usize,
    sampling_rate: f64,
    per_read: usize,
    samples: VecDeque<Vec<f64>>,
    calls: Arc<BoardCalls>,
    unavailable: bool,
    fail_on_read: Option<usize>,
}

impl FakeBoard {
    pub fn new(channels: usize, sampling_rate: f64) -> Self {
        Self {
            channels,
            sampling_rate,
            per_read: 0,
            samples: VecDeque::new(),
            calls: Arc::new(BoardCalls::default()),
            unavailable: false,
            fail_on_read: None,
        }
    }

    /// Queue `samples` (one value per channel) and serve `per_read` at a time.
    pub fn with_samples(mut self, samples: impl IntoIterator<Item = Vec<f64>>, per_read: usize) -> Self {
        self.samples.extend(samples);
        self.per_read = per_read;
        self
    }

    /// Make `prepare_session` fail.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// The `n`-th read (1-based) fails with a communication error.
    pub fn failing_on_read(mut self, n: usize) -> Self {
        self.fail_on_read = Some(n);
        self
    }

    pub fn calls(&self) -> Arc<BoardCalls> {
        Arc::clone(&self.calls)
    }
}

impl BoardSession for FakeBoard {
    fn prepare_session(&mut self) -> Result<(), BoardError> {
        self.calls.prepare.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(BoardError::DeviceUnavailable("fake board unplugged".into()));
        }
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), BoardError> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), BoardError> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_session(&mut self) -> Result<(), BoardError> {
        self.calls.release.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_current_board_data(&mut self, max_samples: usize) -> Result<BoardData, BoardError> {
        let read = self.calls.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_read == Some(read) {
            return Err(BoardError::Communication("fake board stopped answering".into()));
        }
        let count = self.per_read.min(max_samples).min(self.samples.len());
        let mut data = BoardData::zeros((self.channels + 1, count));
        for col in 0..count {
            let Some(sample) = self.samples.pop_front() else {
                break;
            };
            data[[0, col]] = col as f64;
            for (ch, value) in sample.into_iter().enumerate().take(self.channels) {
                data[[ch + 1, col]] = value;
            }
        }
        Ok(data)
    }

    fn emg_channels(&self) -> Vec<usize> {
        (1..=self.channels).collect()
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

/// Keeps everything a run emits.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub results: Vec<PredictionResult>,
    pub reports: Vec<WindowReport>,
    pub finished: usize,
}

impl RecordingSink {
    pub fn sequences(&self) -> Vec<u64> {
        self.results.iter().map(|r| r.sequence).collect()
    }
}

impl PredictionSink for RecordingSink {
    fn emit(&mut self, result: &PredictionResult) -> std::io::Result<()> {
        self.results.push(result.clone());
        Ok(())
    }

    fn diagnostics(&mut self, report: &WindowReport) -> std::io::Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        self.finished += 1;
        Ok(())
    }
}

/// Write a flatten + dense softmax model whose output ignores its input:
/// zero weights and a bias favoring class 0.
pub fn write_artifacts(dir: &Path, window: usize, channels: usize) -> ResolvedArtifactPaths {
    let features = window * channels;
    let model = json!({
        "input_shape": [window, channels],
        "layers": [
            { "type": "flatten" },
            {
                "type": "dense",
                "weights": vec![vec![0.0, 0.0]; features],
                "bias": [1.0, 0.0],
                "activation": "softmax"
            }
        ]
    });
    let normalization = json!({
        "mean": [vec![0.0; channels]],
        "std": [vec![1.0; channels]],
        "window_size": window
    });
    let encoder = json!({ "classes": [0, 1] });

    let paths = ResolvedArtifactPaths {
        model: dir.join("model.json"),
        label_encoder: dir.join("label_encoder.json"),
        normalization: dir.join("normalization.json"),
    };
    std::fs::create_dir_all(dir).expect("create artifact dir");
    for (path, value) in [
        (&paths.model, model),
        (&paths.normalization, normalization),
        (&paths.label_encoder, encoder),
    ] {
        std::fs::write(path, serde_json::to_vec_pretty(&value).expect("encode artifact"))
            .expect("write artifact");
    }
    paths
}

/// Samples `0.0, 1.0, 2.0, ...` on every channel.
pub fn ramp(count: usize, channels: usize) -> Vec<Vec<f64>> {
    (0..count).map(|i| vec![i as f64; channels]).collect()
}
