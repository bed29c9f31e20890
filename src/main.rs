//! Real-time gesture predictor.

use std::io::IsTerminal;
use std::path::PathBuf;

use myoflow::acquisition::{
    AcquisitionLoop, ConsoleSink, JsonLinesSink, LoopConfig, PredictionSink, StopHandle,
};
use myoflow::pipeline::{Artifacts, PipelineConfig};
use myoflow::{board, config, logging};

#[derive(Debug, Clone, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    json: bool,
    max_ticks: Option<u64>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }

    let settings = config::load(options.config_path.as_deref()).map_err(|err| err.to_string())?;
    let paths = settings.artifacts.resolve().map_err(|err| err.to_string())?;
    let artifacts = Artifacts::load(&paths).map_err(|err| err.to_string())?;
    let board = board::open(&settings.board).map_err(|err| err.to_string())?;

    let stop = StopHandle::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.request_stop())
        .map_err(|err| format!("Failed to install Ctrl-C handler: {err}"))?;

    let mut loop_config = LoopConfig::from_settings(&settings.acquisition);
    loop_config.max_ticks = options.max_ticks;
    let pipeline = PipelineConfig::from_settings(&settings);

    let stdout = std::io::stdout();
    let mut sink: Box<dyn PredictionSink> = if options.json {
        Box::new(JsonLinesSink::new(stdout.lock()))
    } else {
        let live = stdout.is_terminal();
        Box::new(ConsoleSink::new(stdout.lock(), live).with_class_names(class_names(&artifacts, &pipeline)))
    };

    let mut acquisition = AcquisitionLoop::new(board, loop_config, stop);
    let summary = acquisition
        .run(artifacts, pipeline, sink.as_mut())
        .map_err(|err| err.to_string())?;
    tracing::info!(
        predictions = summary.predictions,
        skipped = summary.skipped,
        "Predictor finished"
    );
    Ok(())
}

fn class_names(artifacts: &Artifacts, pipeline: &PipelineConfig) -> Vec<String> {
    myoflow::decision::GestureDecider::new(artifacts.encoder.clone(), pipeline.names.clone()).class_names()
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
            "--json" => options.json = true,
            "--ticks" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--ticks requires a value".to_string())?;
                let ticks = value
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid --ticks value: {value}"))?;
                options.max_ticks = Some(ticks);
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "myoflow",
        "",
        "Usage:",
        "  myoflow [options]",
        "",
        "Options:",
        "  --config <path>  Settings file (default: <app root>/config.toml).",
        "  --json           Emit one JSON object per prediction instead of a status line.",
        "  --ticks <n>      Stop after n acquisition ticks (default: run until Ctrl-C).",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_all_flags() {
        let options = parse_args(args(&["--config", "my.toml", "--json", "--ticks", "12"])).unwrap();
        assert_eq!(options.config_path, Some(PathBuf::from("my.toml")));
        assert!(options.json);
        assert_eq!(options.max_ticks, Some(12));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(args(&["--ticks"])).is_err());
        assert!(parse_args(args(&["--ticks", "soon"])).is_err());
        assert!(parse_args(args(&["--verbose"])).unwrap_err().contains("Usage"));
    }
}
