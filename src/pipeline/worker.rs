use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};

use super::{Classifier, PipelineError, PreparedWindow, WindowOutcome};

/// Runs classification on one dedicated thread.
///
/// Jobs are handled strictly in submission order, so results come back in
/// window order. One window is classified at a time; later windows queue.
pub struct InferenceWorker {
    jobs: Option<Sender<PreparedWindow>>,
    results: Receiver<WindowOutcome>,
    handle: Option<JoinHandle<()>>,
    in_flight: usize,
}

impl InferenceWorker {
    pub fn spawn(classifier: Arc<Classifier>) -> Result<Self, PipelineError> {
        let (job_tx, job_rx) = channel::<PreparedWindow>();
        let (result_tx, result_rx) = channel::<WindowOutcome>();
        let handle = thread::Builder::new()
            .name("myoflow-inference".into())
            .spawn(move || {
                while let Ok(window) = job_rx.recv() {
                    let result = classifier.predict(&window);
                    if result_tx.send(WindowOutcome { window, result }).is_err() {
                        break;
                    }
                }
                tracing::debug!("Inference worker exiting");
            })
            .map_err(|err| PipelineError::WorkerStopped(err.to_string()))?;
        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
            in_flight: 0,
        })
    }

    pub fn submit(&mut self, window: PreparedWindow) -> Result<(), PipelineError> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| PipelineError::WorkerStopped("worker already shut down".into()))?;
        jobs.send(window)
            .map_err(|_| PipelineError::WorkerStopped("worker thread is gone".into()))?;
        self.in_flight += 1;
        Ok(())
    }

    /// Collect finished results without blocking.
    pub fn try_drain(&mut self) -> Result<Vec<WindowOutcome>, PipelineError> {
        let mut outcomes = Vec::new();
        loop {
            match self.results.try_recv() {
                Ok(outcome) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    outcomes.push(outcome);
                }
                Err(TryRecvError::Empty) => return Ok(outcomes),
                Err(TryRecvError::Disconnected) if self.in_flight == 0 => return Ok(outcomes),
                Err(TryRecvError::Disconnected) => {
                    return Err(PipelineError::WorkerStopped(format!(
                        "{} window(s) lost",
                        self.in_flight
                    )));
                }
            }
        }
    }

    /// Stop accepting work, wait for the thread and return what it finished.
    pub fn shutdown(mut self) -> Vec<WindowOutcome> {
        self.finish()
    }

    fn finish(&mut self) -> Vec<WindowOutcome> {
        self.jobs = None;
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("Inference worker thread panicked");
        }
        let outcomes: Vec<WindowOutcome> = self.results.try_iter().collect();
        self.in_flight = 0;
        outcomes
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let dropped = self.finish().len();
            if dropped > 0 {
                tracing::debug!(dropped, "Discarded inference results on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{GestureDecider, GestureNames, LabelEncoder};
    use crate::model::{GestureModel, InferenceAdapter, ModelError};
    use crate::normalize::{NormalizationParams, Normalizer};
    use ndarray::{Array2, ArrayView3};
    use std::time::{Duration, Instant};

    struct SlowModel {
        panic_on_negative: bool,
    }

    impl GestureModel for SlowModel {
        fn input_shape(&self) -> (usize, usize) {
            (4, 1)
        }

        fn class_count(&self) -> usize {
            2
        }

        fn predict(&self, batch: ArrayView3<'_, f64>) -> Result<Array2<f64>, ModelError> {
            let first = batch[[0, 0, 0]];
            if self.panic_on_negative && first < 0.0 {
                panic!("negative input");
            }
            // Earlier windows take longer so reordering would show up.
            thread::sleep(Duration::from_millis(((10.0 - first).max(0.0) * 3.0) as u64));
            Ok(Array2::from_shape_vec((1, 2), vec![0.7, 0.3]).unwrap())
        }
    }

    fn classifier(panic_on_negative: bool) -> Arc<Classifier> {
        Arc::new(Classifier::new(
            Normalizer::new(NormalizationParams::identity(1, 4)),
            InferenceAdapter::new(Arc::new(SlowModel { panic_on_negative })),
            GestureDecider::new(LabelEncoder::identity(2), GestureNames::default()),
        ))
    }

    fn window(sequence: u64, value: f64) -> PreparedWindow {
        let data = Array2::from_elem((4, 1), value);
        PreparedWindow {
            sequence,
            raw: data.clone(),
            filtered: data,
        }
    }

    fn drain_all(worker: &mut InferenceWorker, expected: usize) -> Vec<WindowOutcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < expected && Instant::now() < deadline {
            out.extend(worker.try_drain().unwrap());
            thread::sleep(Duration::from_millis(2));
        }
        out
    }

    #[test]
    fn results_arrive_in_submission_order() {
        let mut worker = InferenceWorker::spawn(classifier(false)).unwrap();
        for seq in 0..5 {
            worker.submit(window(seq, seq as f64)).unwrap();
        }
        let outcomes = drain_all(&mut worker, 5);
        let order: Vec<u64> = outcomes.iter().map(|o| o.window.sequence).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(worker.shutdown().is_empty());
    }

    #[test]
    fn model_panic_becomes_a_recoverable_error() {
        let mut worker = InferenceWorker::spawn(classifier(true)).unwrap();
        worker.submit(window(0, -1.0)).unwrap();
        worker.submit(window(1, 1.0)).unwrap();
        let outcomes = drain_all(&mut worker, 2);
        assert_eq!(outcomes.len(), 2);
        let err = outcomes[0].result.as_ref().unwrap_err();
        assert!(err.is_recoverable(), "{err}");
        assert!(outcomes[1].result.is_ok());
    }

    #[test]
    fn shutdown_waits_for_pending_work() {
        let mut worker = InferenceWorker::spawn(classifier(false)).unwrap();
        worker.submit(window(7, 0.0)).unwrap();
        let outcomes = worker.shutdown();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].window.sequence, 7);
    }
}
