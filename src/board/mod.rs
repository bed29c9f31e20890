//! Acquisition collaborators: the board session contract and its providers.
//!
//! A board exposes a pull-based read of newly available samples as a
//! `rows x samples` matrix. Rows cover every board channel; `emg_channels`
//! lists the rows carrying EMG, in order.

mod replay;
mod synthetic;

use std::path::PathBuf;

use ndarray::Array2;
use thiserror::Error;

use crate::config::{BoardKind, BoardSettings};

pub use replay::{Recording, ReplayBoard};
pub use synthetic::{Pacing, SyntheticBoard};

/// `rows x samples`; zero columns when nothing new is available.
pub type BoardData = Array2<f64>;

#[derive(Debug, Error)]
pub enum BoardError {
    /// The session could not be prepared. Fatal at startup.
    #[error("Board unavailable: {0}")]
    DeviceUnavailable(String),
    /// The board stopped responding mid-session. Terminates the loop.
    #[error("Board communication failed: {0}")]
    Communication(String),
    /// A lifecycle call arrived in the wrong state.
    #[error("Board is not {expected}")]
    InvalidState { expected: &'static str },
    /// A recording could not be read.
    #[error("Failed to read recording {path}: {source}")]
    RecordingIo {
        path: PathBuf,
        source: csv::Error,
    },
    /// A recording is not in the `ch1..chN,label,trial,timestamp` layout.
    #[error("Malformed recording {path} at line {line}: {message}")]
    RecordingFormat {
        path: PathBuf,
        line: u64,
        message: String,
    },
}

/// Lifecycle and data access for one exclusive board session.
pub trait BoardSession: Send {
    /// Acquire the device. Fails with [`BoardError::DeviceUnavailable`].
    fn prepare_session(&mut self) -> Result<(), BoardError>;
    fn start_stream(&mut self) -> Result<(), BoardError>;
    fn stop_stream(&mut self) -> Result<(), BoardError>;
    fn release_session(&mut self) -> Result<(), BoardError>;
    /// Up to `max_samples` samples not returned by a previous read. Never blocks.
    fn get_current_board_data(&mut self, max_samples: usize) -> Result<BoardData, BoardError>;
    /// Row indices of the EMG channels, in channel order.
    fn emg_channels(&self) -> Vec<usize>;
    fn sampling_rate(&self) -> f64;
    /// Short label for logs.
    fn describe(&self) -> String {
        "board".to_string()
    }
}

impl<B: BoardSession + ?Sized> BoardSession for Box<B> {
    fn prepare_session(&mut self) -> Result<(), BoardError> {
        (**self).prepare_session()
    }

    fn start_stream(&mut self) -> Result<(), BoardError> {
        (**self).start_stream()
    }

    fn stop_stream(&mut self) -> Result<(), BoardError> {
        (**self).stop_stream()
    }

    fn release_session(&mut self) -> Result<(), BoardError> {
        (**self).release_session()
    }

    fn get_current_board_data(&mut self, max_samples: usize) -> Result<BoardData, BoardError> {
        (**self).get_current_board_data(max_samples)
    }

    fn emg_channels(&self) -> Vec<usize> {
        (**self).emg_channels()
    }

    fn sampling_rate(&self) -> f64 {
        (**self).sampling_rate()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Build the board named by `settings`. The session is not yet prepared.
pub fn open(settings: &BoardSettings) -> Result<Box<dyn BoardSession>, BoardError> {
    if let Some(port) = &settings.serial_port {
        tracing::info!(port = %port, timeout_secs = settings.timeout_secs, "Hardware port configured");
    }
    match settings.kind {
        BoardKind::Synthetic => Ok(Box::new(SyntheticBoard::new(
            settings.channel_count,
            settings.sampling_rate_hz,
            settings.seed,
            Pacing::WallClock,
        ))),
        BoardKind::Replay => {
            let path = settings.replay_path.as_ref().ok_or_else(|| {
                BoardError::DeviceUnavailable("replay board needs board.replay_path".to_string())
            })?;
            Ok(Box::new(ReplayBoard::new(
                path.clone(),
                settings.sampling_rate_hz,
                Pacing::WallClock,
            )))
        }
    }
}

/// Session flags shared by the bundled boards.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lifecycle {
    prepared: bool,
    streaming: bool,
}

impl Lifecycle {
    pub(crate) fn prepare(&mut self) -> Result<(), BoardError> {
        if self.prepared {
            return Err(BoardError::DeviceUnavailable(
                "session already prepared".to_string(),
            ));
        }
        self.prepared = true;
        Ok(())
    }

    pub(crate) fn start(&mut self) -> Result<(), BoardError> {
        if !self.prepared {
            return Err(BoardError::InvalidState {
                expected: "prepared",
            });
        }
        self.streaming = true;
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<(), BoardError> {
        if !self.streaming {
            return Err(BoardError::InvalidState {
                expected: "streaming",
            });
        }
        self.streaming = false;
        Ok(())
    }

    pub(crate) fn release(&mut self) -> Result<(), BoardError> {
        if !self.prepared {
            return Err(BoardError::InvalidState {
                expected: "prepared",
            });
        }
        self.prepared = false;
        self.streaming = false;
        Ok(())
    }

    pub(crate) fn ensure_streaming(&self) -> Result<(), BoardError> {
        if self.streaming {
            Ok(())
        } else {
            Err(BoardError::InvalidState {
                expected: "streaming",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_enforces_order() {
        let mut lifecycle = Lifecycle::default();
        assert!(lifecycle.start().is_err());
        lifecycle.prepare().unwrap();
        assert!(matches!(
            lifecycle.prepare(),
            Err(BoardError::DeviceUnavailable(_))
        ));
        assert!(lifecycle.ensure_streaming().is_err());
        lifecycle.start().unwrap();
        lifecycle.ensure_streaming().unwrap();
        lifecycle.stop().unwrap();
        assert!(lifecycle.stop().is_err());
        lifecycle.release().unwrap();
        assert!(lifecycle.release().is_err());
    }

    #[test]
    fn open_builds_configured_board() {
        let settings = BoardSettings {
            channel_count: 3,
            sampling_rate_hz: 250.0,
            ..BoardSettings::default()
        };
        let board = open(&settings).unwrap();
        assert_eq!(board.emg_channels(), vec![1, 2, 3]);
        assert_eq!(board.sampling_rate(), 250.0);

        let replay = BoardSettings {
            kind: BoardKind::Replay,
            replay_path: None,
            ..BoardSettings::default()
        };
        assert!(matches!(
            open(&replay),
            Err(BoardError::DeviceUnavailable(_))
        ));
    }
}
