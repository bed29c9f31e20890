mod support;

use myoflow::config::FilterMode;
use myoflow::decision::GestureNames;
use myoflow::filters::{FilterChain, FilterSpec};
use myoflow::normalize::{NormalizeError, Normalizer};
use myoflow::pipeline::{Artifacts, Pipeline, PipelineConfig, PipelineError, filter_columns};
use myoflow::spectrum::SpectralSummary;
use ndarray::Array2;
use support::write_artifacts;

fn config(channels: usize) -> PipelineConfig {
    PipelineConfig {
        sampling_rate: 200.0,
        channels,
        filters: FilterSpec::default(),
        filter_mode: FilterMode::Window,
        names: GestureNames::default(),
        diagnostics_interval: 20,
    }
}

#[test]
fn constant_zero_window_normalizes_to_zeros_and_classifies() {
    let temp = tempfile::tempdir().unwrap();
    let paths = write_artifacts(temp.path(), 16, 1);
    let artifacts = Artifacts::load(&paths).unwrap();
    let normalization = artifacts.normalization.clone();
    let mut pipeline = Pipeline::new(config(1), artifacts).unwrap();

    for _ in 0..15 {
        pipeline.push_sample(&[0.0]).unwrap();
        assert!(pipeline.prepare_window().unwrap().is_none());
    }
    pipeline.push_sample(&[0.0]).unwrap();
    let window = pipeline.prepare_window().unwrap().expect("full window");
    assert_eq!(window.raw.dim(), (16, 1));
    assert!(window.raw.iter().all(|&v| v == 0.0));
    assert!(window.filtered.iter().all(|&v| v == 0.0));

    let normalized = Normalizer::new(normalization).normalize(window.filtered.view()).unwrap();
    assert_eq!(normalized, Array2::<f64>::zeros((16, 1)));

    let result = pipeline.classifier().predict(&window).unwrap();
    assert_eq!(result.decision.gesture, "Propulsion");
    assert_eq!(result.decision.class_index, 0);
    let expected = 1.0 / (1.0 + (-1.0f64).exp());
    assert!((result.decision.confidence - expected).abs() < 1e-12);
    let total: f64 = result.decision.probabilities.iter().sum();
    assert!((total - 1.0).abs() < 1e-12);
}

#[test]
fn channel_mismatch_fails_before_any_sample_is_pushed() {
    let temp = tempfile::tempdir().unwrap();
    let paths = write_artifacts(temp.path(), 16, 1);
    let artifacts = Artifacts::load(&paths).unwrap();
    let err = Pipeline::new(config(2), artifacts).err().expect("mismatch");
    assert!(
        matches!(
            err,
            PipelineError::Normalize(NormalizeError::ShapeMismatch {
                expected: 1,
                actual: 2
            })
        ),
        "{err}"
    );
}

#[test]
fn malformed_artifacts_are_reported_at_load() {
    let temp = tempfile::tempdir().unwrap();
    let paths = write_artifacts(temp.path(), 16, 2);
    std::fs::write(
        &paths.normalization,
        r#"{"mean": [0.0, 0.0], "std": [1.0], "window_size": 16}"#,
    )
    .unwrap();
    assert!(Artifacts::load(&paths).is_err());

    std::fs::remove_file(&paths.model).unwrap();
    let err = Artifacts::load(&paths).err().expect("missing model");
    assert!(err.to_string().contains("model"), "{err}");
}

#[test]
fn highpass_chain_moves_dominant_frequency_out_of_motion_band() {
    let fs = 200.0;
    let window = Array2::from_shape_fn((400, 1), |(t, _)| {
        let t = t as f64 / fs;
        (2.0 * std::f64::consts::PI * 10.0 * t).sin()
            + 0.2 * (2.0 * std::f64::consts::PI * 45.0 * t).sin()
    });
    let chain = FilterChain::design(&FilterSpec::default(), fs).unwrap();
    let filtered = filter_columns(&chain, window.view()).unwrap();

    let raw = SpectralSummary::analyze(&window.column(0).to_vec(), fs);
    let clean = SpectralSummary::analyze(&filtered.column(0).to_vec(), fs);
    assert!((raw.dominant_hz - 10.0).abs() < 1.0, "raw {}", raw.dominant_hz);
    assert!((clean.dominant_hz - raw.dominant_hz).abs() > 20.0, "filtered {}", clean.dominant_hz);
    assert!(clean.emg_percent() > raw.emg_percent());
}

#[test]
fn pure_sine_below_cutoff_keeps_its_peak_but_loses_its_power() {
    let fs = 200.0;
    let window = Array2::from_shape_fn((400, 1), |(t, _)| {
        (2.0 * std::f64::consts::PI * 10.0 * t as f64 / fs).sin()
    });
    let chain = FilterChain::design(&FilterSpec::default(), fs).unwrap();
    let filtered = filter_columns(&chain, window.view()).unwrap();

    let raw = SpectralSummary::analyze(&window.column(0).to_vec(), fs);
    let clean = SpectralSummary::analyze(&filtered.column(0).to_vec(), fs);
    // Nothing else is left in the spectrum, so the residue still peaks at 10 Hz.
    assert!((raw.dominant_hz - 10.0).abs() < 1.0, "raw {}", raw.dominant_hz);
    assert!((clean.dominant_hz - 10.0).abs() < 1.0, "filtered {}", clean.dominant_hz);
    assert!(
        clean.total_power < raw.total_power * 1e-3,
        "raw {} filtered {}",
        raw.total_power,
        clean.total_power
    );
}
