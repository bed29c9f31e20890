//! Real-time driver: board lifecycle, tick pacing and per-tick error policy.
//!
//! The loop moves through `Idle -> SessionPrepared -> Streaming` and ends in
//! `Stopped` (interrupt, tick limit) or `Faulted` (board communication
//! failure, startup check). A failed prediction write skips its tick like a
//! model error; only closing the output at shutdown can fault the session. Stream stop and session release run exactly once on every exit
//! path, including unwinding, through [`SessionGuard`].

mod sink;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::board::{BoardData, BoardError, BoardSession};
use crate::config::{AcquisitionSettings, InferenceMode};
use crate::pipeline::{
    Artifacts, InferenceWorker, Pipeline, PipelineConfig, PipelineError, PreparedWindow,
    WindowOutcome,
};

pub use sink::{ConsoleSink, JsonLinesSink, PredictionSink};

const STOP_POLL_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SessionPrepared,
    Streaming,
    Stopped,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::SessionPrepared => "session prepared",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
            SessionState::Faulted => "faulted",
        };
        f.write_str(label)
    }
}

/// Failures that end the loop.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Board(#[from] BoardError),
    /// Artifacts or configuration do not fit the board; raised before streaming.
    #[error("Startup check failed: {0}")]
    Startup(#[source] PipelineError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// The sink could not be finished at shutdown.
    #[error("Failed to finish prediction output: {0}")]
    Output(#[from] std::io::Error),
    #[error("Acquisition loop already ran (state: {0})")]
    AlreadyRan(SessionState),
}

/// Shared flag asking the loop to stop after the current tick.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Explicit loop parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Indices into the board's EMG channel list.
    pub active_channels: Vec<usize>,
    pub tick_interval: Duration,
    pub max_samples_per_read: usize,
    pub inference: InferenceMode,
    /// Stop after this many ticks.
    pub max_ticks: Option<u64>,
}

impl LoopConfig {
    pub fn from_settings(settings: &AcquisitionSettings) -> Self {
        Self {
            active_channels: settings.active_channels.clone(),
            tick_interval: settings.tick_interval(),
            max_samples_per_read: settings.max_samples_per_read,
            inference: settings.inference,
            max_ticks: None,
        }
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub samples: u64,
    pub predictions: u64,
    pub skipped: u64,
}

/// Stops and releases the board exactly once, on close or on drop.
pub struct SessionGuard<'a, B: BoardSession> {
    board: &'a mut B,
    streaming: bool,
    released: bool,
}

impl<'a, B: BoardSession> SessionGuard<'a, B> {
    /// Wrap a board whose session is already prepared.
    pub fn new(board: &'a mut B) -> Self {
        Self {
            board,
            streaming: false,
            released: false,
        }
    }

    pub fn start_stream(&mut self) -> Result<(), BoardError> {
        self.board.start_stream()?;
        self.streaming = true;
        Ok(())
    }

    pub fn board(&mut self) -> &mut B {
        self.board
    }

    /// Stop the stream and release the session; reports the first failure.
    pub fn close(mut self) -> Result<(), BoardError> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> Result<(), BoardError> {
        let mut first_err = None;
        if self.streaming {
            self.streaming = false;
            if let Err(err) = self.board.stop_stream() {
                tracing::warn!("Failed to stop stream: {err}");
                first_err.get_or_insert(err);
            }
        }
        if !self.released {
            self.released = true;
            if let Err(err) = self.board.release_session() {
                tracing::warn!("Failed to release session: {err}");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<B: BoardSession> Drop for SessionGuard<'_, B> {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

enum Inference {
    Inline,
    Worker(InferenceWorker),
}

/// Owns the board and drives it from `Idle` to `Stopped` or `Faulted`.
pub struct AcquisitionLoop<B: BoardSession> {
    board: B,
    config: LoopConfig,
    stop: StopHandle,
    state: SessionState,
}

impl<B: BoardSession> AcquisitionLoop<B> {
    pub fn new(board: B, config: LoopConfig, stop: StopHandle) -> Self {
        Self {
            board,
            config,
            stop,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    /// Prepare, validate, stream until stopped, then clean up.
    ///
    /// `pipeline` supplies filter, naming and diagnostics settings; its rate
    /// and channel count are replaced by what the prepared board reports.
    pub fn run(
        &mut self,
        artifacts: Artifacts,
        pipeline: PipelineConfig,
        sink: &mut dyn PredictionSink,
    ) -> Result<RunSummary, AcquisitionError> {
        let Self {
            board,
            config,
            stop,
            state,
        } = self;
        if *state != SessionState::Idle {
            return Err(AcquisitionError::AlreadyRan(*state));
        }
        tracing::info!(board = %board.describe(), "Preparing board session");
        if let Err(err) = board.prepare_session() {
            transition(state, SessionState::Faulted);
            return Err(err.into());
        }
        transition(state, SessionState::SessionPrepared);

        let mut summary = RunSummary::default();
        let mut guard = SessionGuard::new(board);
        let outcome = stream(
            &mut guard,
            config,
            stop,
            state,
            artifacts,
            pipeline,
            sink,
            &mut summary,
        );
        let cleanup = guard.close();
        let end = if outcome.is_ok() {
            SessionState::Stopped
        } else {
            SessionState::Faulted
        };
        transition(state, end);
        tracing::info!(
            ticks = summary.ticks,
            samples = summary.samples,
            predictions = summary.predictions,
            skipped = summary.skipped,
            "Board session closed"
        );
        outcome?;
        cleanup?;
        Ok(summary)
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    tracing::info!(from = %state, to = %next, "Session state changed");
    *state = next;
}

/// Map active channel indices to board rows.
pub fn resolve_rows(active: &[usize], emg_channels: &[usize]) -> Result<Vec<usize>, PipelineError> {
    active
        .iter()
        .map(|&index| {
            emg_channels
                .get(index)
                .copied()
                .ok_or(PipelineError::UnknownChannel {
                    index,
                    available: emg_channels.len(),
                })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn stream<B: BoardSession>(
    guard: &mut SessionGuard<'_, B>,
    config: &LoopConfig,
    stop: &StopHandle,
    state: &mut SessionState,
    artifacts: Artifacts,
    mut pipeline_config: PipelineConfig,
    sink: &mut dyn PredictionSink,
    summary: &mut RunSummary,
) -> Result<(), AcquisitionError> {
    let board = guard.board();
    let rows = resolve_rows(&config.active_channels, &board.emg_channels())
        .map_err(AcquisitionError::Startup)?;
    pipeline_config.sampling_rate = board.sampling_rate();
    pipeline_config.channels = rows.len();
    let mut pipeline = Pipeline::new(pipeline_config, artifacts).map_err(AcquisitionError::Startup)?;
    let mut inference = match config.inference {
        InferenceMode::Inline => Inference::Inline,
        InferenceMode::Worker => Inference::Worker(InferenceWorker::spawn(pipeline.classifier())?),
    };

    guard.start_stream()?;
    transition(state, SessionState::Streaming);
    tracing::info!(
        rows = ?rows,
        window_size = pipeline.window_size(),
        tick_ms = config.tick_interval.as_millis() as u64,
        "Streaming"
    );

    let result = run_ticks(guard, config, stop, &rows, &mut pipeline, &mut inference, sink, summary);
    let flushed = flush_output(inference, &mut pipeline, sink, summary);
    match (result, flushed) {
        (Err(err), Err(late)) => {
            tracing::warn!("Output shutdown also failed: {late}");
            Err(err)
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Emit windows still queued in the worker, then finish the sink.
///
/// Every step runs; the first failure is returned and later ones are logged.
fn flush_output(
    inference: Inference,
    pipeline: &mut Pipeline,
    sink: &mut dyn PredictionSink,
    summary: &mut RunSummary,
) -> Result<(), AcquisitionError> {
    let mut first_err = None;
    if let Inference::Worker(worker) = inference {
        for outcome in worker.shutdown() {
            if let Err(err) = handle_outcome(outcome, pipeline, sink, summary) {
                keep_first(&mut first_err, err);
            }
        }
    }
    if let Err(err) = sink.finish() {
        keep_first(&mut first_err, err.into());
    }
    first_err.map_or(Ok(()), Err)
}

fn keep_first(slot: &mut Option<AcquisitionError>, err: AcquisitionError) {
    match slot {
        Some(_) => tracing::warn!("Output shutdown failed: {err}"),
        None => *slot = Some(err),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_ticks<B: BoardSession>(
    guard: &mut SessionGuard<'_, B>,
    config: &LoopConfig,
    stop: &StopHandle,
    rows: &[usize],
    pipeline: &mut Pipeline,
    inference: &mut Inference,
    sink: &mut dyn PredictionSink,
    summary: &mut RunSummary,
) -> Result<(), AcquisitionError> {
    loop {
        if stop.is_stop_requested() {
            tracing::info!("Stop requested");
            return Ok(());
        }
        if config.max_ticks.is_some_and(|max| summary.ticks >= max) {
            tracing::info!(ticks = summary.ticks, "Tick limit reached");
            return Ok(());
        }
        let started = Instant::now();
        summary.ticks += 1;
        let data = guard.board().get_current_board_data(config.max_samples_per_read)?;
        tick(&data, rows, pipeline, inference, sink, summary)?;
        pace(started, config.tick_interval, stop);
    }
}

fn tick(
    data: &BoardData,
    rows: &[usize],
    pipeline: &mut Pipeline,
    inference: &mut Inference,
    sink: &mut dyn PredictionSink,
    summary: &mut RunSummary,
) -> Result<(), AcquisitionError> {
    if let Inference::Worker(worker) = inference {
        for outcome in worker.try_drain()? {
            handle_outcome(outcome, pipeline, sink, summary)?;
        }
    }
    if data.ncols() == 0 {
        tracing::trace!("No new samples");
        return Ok(());
    }
    if let Some(&row) = rows.iter().find(|&&row| row >= data.nrows()) {
        return Err(BoardError::Communication(format!(
            "read returned {} rows, EMG row {row} missing",
            data.nrows()
        ))
        .into());
    }

    let mut sample = vec![0.0; rows.len()];
    for column in data.columns() {
        for (slot, &row) in sample.iter_mut().zip(rows) {
            *slot = column[row];
        }
        if let Err(err) = pipeline.push_sample(&sample) {
            return skip(err, summary);
        }
        summary.samples += 1;
    }

    let window = match pipeline.prepare_window() {
        Ok(Some(window)) => window,
        Ok(None) => return Ok(()),
        Err(err) => return skip(err, summary),
    };
    match inference {
        Inference::Inline => {
            let outcome = classify_inline(pipeline, window);
            handle_outcome(outcome, pipeline, sink, summary)
        }
        Inference::Worker(worker) => Ok(worker.submit(window)?),
    }
}

fn classify_inline(pipeline: &Pipeline, window: PreparedWindow) -> WindowOutcome {
    let result = pipeline.classifier().predict(&window);
    WindowOutcome { window, result }
}

fn handle_outcome(
    outcome: WindowOutcome,
    pipeline: &mut Pipeline,
    sink: &mut dyn PredictionSink,
    summary: &mut RunSummary,
) -> Result<(), AcquisitionError> {
    match outcome.result {
        Ok(result) => {
            match sink.emit(&result) {
                Ok(()) => summary.predictions += 1,
                Err(err) => {
                    summary.skipped += 1;
                    tracing::warn!(sequence = result.sequence, "Skipping tick, output failed: {err}");
                }
            }
            if let Some(report) = pipeline.record_success(&outcome.window) {
                report.log();
                if let Err(err) = sink.diagnostics(&report) {
                    tracing::warn!("Failed to write diagnostics: {err}");
                }
            }
            Ok(())
        }
        Err(err) => skip(err, summary),
    }
}

fn skip(err: PipelineError, summary: &mut RunSummary) -> Result<(), AcquisitionError> {
    if !err.is_recoverable() {
        return Err(err.into());
    }
    summary.skipped += 1;
    tracing::warn!("Skipping tick: {err}");
    Ok(())
}

/// Sleep out the rest of the tick, waking early on a stop request.
fn pace(started: Instant, interval: Duration, stop: &StopHandle) {
    let deadline = started + interval;
    loop {
        let now = Instant::now();
        if now >= deadline || stop.is_stop_requested() {
            return;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL_SLICE));
    }
}
