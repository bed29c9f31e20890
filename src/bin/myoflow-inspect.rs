//! Validate artifacts and settings without opening a board.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Array2;

use myoflow::config;
use myoflow::decision::LabelEncoder;
use myoflow::model::SequentialModel;
use myoflow::normalize::NormalizationParams;
use myoflow::pipeline::{Artifacts, Pipeline, PipelineConfig, PreparedWindow};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    init: bool,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let config_path = match &options.config_path {
        Some(path) => path.clone(),
        None => config::config_path().map_err(|err| err.to_string())?,
    };
    if options.init {
        if config_path.exists() {
            return Err(format!("Refusing to overwrite {}", config_path.display()));
        }
        config::save_to_path(&config::Settings::default(), &config_path)
            .map_err(|err| err.to_string())?;
        println!("Wrote default settings to {}", config_path.display());
        return Ok(());
    }

    let settings = config::load(Some(&config_path)).map_err(|err| err.to_string())?;
    let paths = settings.artifacts.resolve().map_err(|err| err.to_string())?;
    println!("settings: {}", config_path.display());
    println!("model: {}", paths.model.display());
    println!("label encoder: {}", paths.label_encoder.display());
    println!("normalization: {}", paths.normalization.display());

    let model = SequentialModel::load(&paths.model).map_err(|err| err.to_string())?;
    let normalization =
        NormalizationParams::load(&paths.normalization).map_err(|err| err.to_string())?;
    let encoder = LabelEncoder::load(&paths.label_encoder).map_err(|err| err.to_string())?;
    println!();
    for line in model.summary() {
        println!("  {line}");
    }
    println!(
        "  window_size={} channels={} classes={}",
        normalization.window_size,
        normalization.channels(),
        encoder.len()
    );

    let artifacts = Artifacts {
        model: Arc::new(model),
        normalization,
        encoder,
    };
    let pipeline = Pipeline::new(PipelineConfig::from_settings(&settings), artifacts)
        .map_err(|err| format!("Startup check failed: {err}"))?;
    let classifier = pipeline.classifier();
    let zeros: Array2<f64> = Array2::zeros((pipeline.window_size(), settings.acquisition.active_channels.len()));
    let window = PreparedWindow {
        sequence: 0,
        raw: zeros.clone(),
        filtered: zeros,
    };
    let result = classifier
        .predict(&window)
        .map_err(|err| format!("Zero-window inference failed: {err}"))?;
    println!();
    println!(
        "zero window -> {} (class {}, confidence {:.4})",
        result.decision.gesture, result.decision.class_index, result.decision.confidence
    );
    for (name, p) in classifier.class_names().iter().zip(&result.decision.probabilities) {
        println!("  {name:<12} {p:.4}");
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--init" => options.init = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "myoflow-inspect",
        "",
        "Usage:",
        "  myoflow-inspect [--config <path>] [--init]",
        "",
        "Options:",
        "  --config <path>  Settings file (default: <app root>/config.toml).",
        "  --init           Write default settings to the config path and exit.",
    ]
    .join("\n")
}
