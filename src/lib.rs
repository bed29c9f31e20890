//! Library exports for the predictor binaries, benchmarks and tests.
/// Board lifecycle, tick loop and prediction sinks.
pub mod acquisition;
/// Application directory helpers.
pub mod app_dirs;
/// Shared JSON artifact loading.
pub mod artifact;
/// Board session contract and bundled boards.
pub mod board;
/// TOML settings.
pub mod config;
/// Stable arg-max decisions and gesture naming.
pub mod decision;
/// IIR filter design and application.
pub mod filters;
/// Tracing subscriber setup.
pub mod logging;
/// Frozen gesture classifier.
pub mod model;
/// Training-time channel standardization.
pub mod normalize;
/// Per-window stage chain and inference worker.
pub mod pipeline;
/// Welch spectral density and band summaries.
pub mod spectrum;
/// Fixed-size sliding sample window.
pub mod window;
