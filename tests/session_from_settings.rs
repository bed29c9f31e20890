mod support;

use myoflow::acquisition::{AcquisitionLoop, JsonLinesSink, LoopConfig, StopHandle};
use myoflow::board::{Pacing, ReplayBoard, SyntheticBoard};
use myoflow::pipeline::{Artifacts, PipelineConfig};
use myoflow::{app_dirs, config};
use support::myoflow_env::ConfigHomeGuard;
use support::{RecordingSink, write_artifacts};

#[test]
fn default_settings_drive_a_synthetic_session() {
    let temp = tempfile::tempdir().unwrap();
    let _env = ConfigHomeGuard::set(temp.path().to_path_buf());
    write_artifacts(&app_dirs::artifacts_dir().unwrap(), 16, 1);

    let settings = config::load(None).unwrap();
    let paths = settings.artifacts.resolve().unwrap();
    assert!(paths.model.starts_with(temp.path()));
    let artifacts = Artifacts::load(&paths).unwrap();

    let board = SyntheticBoard::new(
        settings.board.channel_count,
        settings.board.sampling_rate_hz,
        settings.board.seed,
        Pacing::Fixed(20),
    );
    let mut loop_config = LoopConfig::from_settings(&settings.acquisition);
    loop_config.max_ticks = Some(5);
    let mut acquisition = AcquisitionLoop::new(board, loop_config, StopHandle::new());
    let mut sink = RecordingSink::default();
    let summary = acquisition
        .run(artifacts, PipelineConfig::from_settings(&settings), &mut sink)
        .unwrap();

    assert_eq!(summary.samples, 100);
    assert_eq!(summary.predictions, 5);
    assert_eq!(sink.sequences(), vec![0, 1, 2, 3, 4]);
    assert!(sink.results.iter().all(|r| r.decision.gesture == "Propulsion"));
    assert!(sink.results.iter().all(|r| r.raw.max > r.raw.min));
}

#[test]
fn replayed_recording_streams_as_json_lines() {
    let temp = tempfile::tempdir().unwrap();
    let paths = write_artifacts(&temp.path().join("artifacts"), 16, 2);
    let csv_path = temp.path().join("session.csv");
    let mut csv = String::from("ch1,ch2,label,trial,timestamp\n");
    for i in 0..40 {
        let t = i as f64 / 200.0;
        csv.push_str(&format!("{:.4},{:.4},0,1,{t}\n", (i as f64 * 0.7).sin(), (i as f64 * 0.3).cos()));
    }
    std::fs::write(&csv_path, csv).unwrap();

    let mut settings = config::Settings::default();
    settings.acquisition.active_channels = vec![1, 0];
    settings.acquisition.tick_interval_ms = 1;
    let board = ReplayBoard::new(csv_path, 200.0, Pacing::Fixed(10));
    let mut loop_config = LoopConfig::from_settings(&settings.acquisition);
    loop_config.max_ticks = Some(6);
    let mut acquisition = AcquisitionLoop::new(board, loop_config, StopHandle::new());
    let mut sink = JsonLinesSink::new(Vec::new());
    let summary = acquisition
        .run(
            Artifacts::load(&paths).unwrap(),
            PipelineConfig::from_settings(&settings),
            &mut sink,
        )
        .unwrap();

    // 40 samples: full on tick 2, then ticks 3 and 4; ticks 5 and 6 read nothing.
    assert_eq!(summary.samples, 40);
    assert_eq!(summary.predictions, 3);
    let text = String::from_utf8(sink.into_inner()).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r["kind"] == "prediction"));
    assert_eq!(records[2]["sequence"], 2);
}
