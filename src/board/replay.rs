use std::path::{Path, PathBuf};
use std::time::Instant;

use csv::{ReaderBuilder, Trim};

use super::{BoardData, BoardError, BoardSession, Lifecycle, Pacing};

/// Samples from a recorded session CSV (`ch1..chN,label,trial,timestamp`).
///
/// Only `ch*` columns are kept, in header order.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub channel_names: Vec<String>,
    /// One entry per sample, one value per channel.
    pub samples: Vec<Vec<f64>>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self, BoardError> {
        let reader = reader_builder()
            .from_path(path)
            .map_err(|source| csv_error(path, source))?;
        Self::read(reader, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, BoardError> {
        Self::read(reader_builder().from_reader(text.as_bytes()), path)
    }

    fn read<R: std::io::Read>(mut reader: csv::Reader<R>, path: &Path) -> Result<Self, BoardError> {
        let headers = reader
            .headers()
            .map_err(|source| csv_error(path, source))?
            .clone();
        let channel_columns: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, name)| is_channel_column(name))
            .map(|(idx, _)| idx)
            .collect();
        if channel_columns.is_empty() {
            return Err(BoardError::RecordingFormat {
                path: path.to_path_buf(),
                line: 1,
                message: "header has no ch* columns".to_string(),
            });
        }

        let mut samples = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|source| csv_error(path, source))?;
            let line = record.position().map_or(0, |pos| pos.line());
            let sample = channel_columns
                .iter()
                .map(|&col| {
                    let field = record.get(col).unwrap_or_default();
                    field.parse::<f64>().map_err(|err| BoardError::RecordingFormat {
                        path: path.to_path_buf(),
                        line,
                        message: format!("{}: {err}", &headers[col]),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            samples.push(sample);
        }
        Ok(Self {
            channel_names: channel_columns
                .iter()
                .map(|&col| headers[col].to_string())
                .collect(),
            samples,
        })
    }

    pub fn channels(&self) -> usize {
        self.channel_names.len()
    }
}

fn reader_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(true).trim(Trim::All);
    builder
}

/// I/O failures keep the `csv` error; layout problems carry the line.
fn csv_error(path: &Path, source: csv::Error) -> BoardError {
    if matches!(source.kind(), csv::ErrorKind::Io(_)) {
        return BoardError::RecordingIo {
            path: path.to_path_buf(),
            source,
        };
    }
    BoardError::RecordingFormat {
        path: path.to_path_buf(),
        line: source.position().map_or(0, |pos| pos.line()),
        message: source.to_string(),
    }
}

fn is_channel_column(name: &str) -> bool {
    name.strip_prefix("ch")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// Plays a [`Recording`] back at the sampling rate; an exhausted recording
/// yields empty reads.
pub struct ReplayBoard {
    path: PathBuf,
    sampling_rate: f64,
    pacing: Pacing,
    lifecycle: Lifecycle,
    recording: Option<Recording>,
    started_at: Option<Instant>,
    cursor: usize,
    released_until: usize,
}

impl ReplayBoard {
    pub fn new(path: PathBuf, sampling_rate: f64, pacing: Pacing) -> Self {
        Self {
            path,
            sampling_rate,
            pacing,
            lifecycle: Lifecycle::default(),
            recording: None,
            started_at: None,
            cursor: 0,
            released_until: 0,
        }
    }

    /// Index one past the last sample the clock has made available.
    fn available_until(&mut self, total: usize) -> usize {
        let until = match self.pacing {
            Pacing::WallClock => {
                let elapsed = self.started_at.map_or(0.0, |start| start.elapsed().as_secs_f64());
                (elapsed * self.sampling_rate) as usize
            }
            Pacing::Fixed(per_read) => self.released_until + per_read,
        };
        self.released_until = until.min(total);
        self.released_until
    }
}

impl BoardSession for ReplayBoard {
    fn prepare_session(&mut self) -> Result<(), BoardError> {
        if !(self.sampling_rate > 0.0) {
            return Err(BoardError::DeviceUnavailable(format!(
                "replay needs a positive sampling rate, got {}",
                self.sampling_rate
            )));
        }
        let recording = Recording::load(&self.path)
            .map_err(|err| BoardError::DeviceUnavailable(err.to_string()))?;
        self.lifecycle.prepare()?;
        tracing::info!(
            samples = recording.samples.len(),
            channels = recording.channels(),
            "Recording loaded for replay"
        );
        self.recording = Some(recording);
        self.cursor = 0;
        self.released_until = 0;
        Ok(())
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
        self.lifecycle.release()?;
        self.recording = None;
        Ok(())
    }

    fn get_current_board_data(&mut self, max_samples: usize) -> Result<BoardData, BoardError> {
        self.lifecycle.ensure_streaming()?;
        let total = self.recording.as_ref().map_or(0, |rec| rec.samples.len());
        let until = self.available_until(total);
        let start = self.cursor;
        let end = until.min(start + max_samples).max(start);
        let Some(recording) = self.recording.as_ref() else {
            return Err(BoardError::InvalidState {
                expected: "prepared",
            });
        };
        let channels = recording.channels();
        let mut data = BoardData::zeros((channels + 1, end - start));
        for (col, index) in (start..end).enumerate() {
            data[[0, col]] = (index % 256) as f64;
            for (ch, value) in recording.samples[index].iter().enumerate() {
                data[[ch + 1, col]] = *value;
            }
        }
        self.cursor = end;
        Ok(data)
    }

    fn emg_channels(&self) -> Vec<usize> {
        let channels = self.recording.as_ref().map_or(0, Recording::channels);
        (1..=channels).collect()
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn describe(&self) -> String {
        format!("replay ({})", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CSV: &str = "ch1,ch3,label,trial,timestamp\n\
                       1.0,10.0,0,1,1700000000.5\n\
                       2.0,20.0,0,1,1700000000.5\n\
                       3.0,30.0,1,2,1700000001.5\n";

    #[test]
    fn parses_channel_columns_only() {
        let recording = Recording::parse(CSV, Path::new("mem.csv")).unwrap();
        assert_eq!(recording.channel_names, vec!["ch1", "ch3"]);
        assert_eq!(recording.samples[2], vec![3.0, 30.0]);
    }

    #[test]
    fn reports_malformed_rows_with_line_numbers() {
        let err = Recording::parse("ch1,label\n1.0,0\nabc,0\n", Path::new("bad.csv")).unwrap_err();
        assert!(matches!(err, BoardError::RecordingFormat { line: 3, .. }), "{err}");
        assert!(Recording::parse("label,trial\n0,1\n", Path::new("x.csv")).is_err());
        assert!(matches!(
            Recording::parse("ch1,ch2\n1.0,2.0\n1.0\n", Path::new("x.csv")),
            Err(BoardError::RecordingFormat { line: 3, .. })
        ));
    }

    #[test]
    fn quoted_fields_and_headers_are_unwrapped() {
        let text = "\"ch1\",\"label, raw\",ch2\n\"1.5\",\"0, rest\", 2.5 \n\"-3\",1,4\n";
        let recording = Recording::parse(text, Path::new("quoted.csv")).unwrap();
        assert_eq!(recording.channel_names, vec!["ch1", "ch2"]);
        assert_eq!(recording.samples, vec![vec![1.5, 2.5], vec![-3.0, 4.0]]);
    }

    #[test]
    fn replays_in_order_then_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.csv");
        std::fs::write(&path, CSV).unwrap();
        let mut board = ReplayBoard::new(path, 200.0, Pacing::Fixed(2));
        assert!(board.emg_channels().is_empty());
        board.prepare_session().unwrap();
        assert_eq!(board.emg_channels(), vec![1, 2]);
        board.start_stream().unwrap();

        let first = board.get_current_board_data(10).unwrap();
        assert_eq!(first.row(1).to_vec(), vec![1.0, 2.0]);
        let second = board.get_current_board_data(10).unwrap();
        assert_eq!(second.row(2).to_vec(), vec![30.0]);
        assert_eq!(board.get_current_board_data(10).unwrap().ncols(), 0);
        board.stop_stream().unwrap();
        board.release_session().unwrap();
    }

    #[test]
    fn missing_recording_means_device_unavailable() {
        let dir = tempdir().unwrap();
        let mut board = ReplayBoard::new(dir.path().join("nope.csv"), 200.0, Pacing::WallClock);
        assert!(matches!(
            board.prepare_session(),
            Err(BoardError::DeviceUnavailable(_))
        ));
    }
}
