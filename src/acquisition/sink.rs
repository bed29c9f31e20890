use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{PredictionResult, WindowReport};

/// Downstream consumer of prediction results.
pub trait PredictionSink {
    /// A failed write skips the tick; the loop keeps running.
    fn emit(&mut self, result: &PredictionResult) -> io::Result<()>;

    /// Periodic diagnostics; ignored unless the sink cares.
    fn diagnostics(&mut self, report: &WindowReport) -> io::Result<()> {
        let _ = report;
        Ok(())
    }

    /// Called once after the last result. A failure here ends the run as faulted.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: PredictionSink + ?Sized> PredictionSink for &mut S {
    fn emit(&mut self, result: &PredictionResult) -> io::Result<()> {
        (**self).emit(result)
    }

    fn diagnostics(&mut self, report: &WindowReport) -> io::Result<()> {
        (**self).diagnostics(report)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

/// Human-readable status line per prediction.
///
/// In live mode the line is redrawn in place with a carriage return.
pub struct ConsoleSink<W: Write> {
    out: W,
    live: bool,
    class_names: Vec<String>,
    drawn: bool,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, live: bool) -> Self {
        Self {
            out,
            live,
            class_names: Vec::new(),
            drawn: false,
        }
    }

    /// Names used to tag each probability with its class initial.
    pub fn with_class_names(mut self, names: Vec<String>) -> Self {
        self.class_names = names;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn status_line(&self, result: &PredictionResult) -> String {
        let decision = &result.decision;
        let raw = &result.raw;
        let probabilities: Vec<String> = decision
            .probabilities
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                let tag = self
                    .class_names
                    .get(idx)
                    .and_then(|name| name.chars().next())
                    .map_or_else(|| idx.to_string(), |c| c.to_string());
                format!("{tag}:{p:.2}")
            })
            .collect();
        format!(
            "Predicted: {:<10} | Conf: {:6.2}% | Raw: [{:.1}, {:.1}] μ={:.1} σ={:.1} | [{}]",
            decision.gesture,
            decision.confidence * 100.0,
            raw.min,
            raw.max,
            raw.mean,
            raw.std,
            probabilities.join(" ")
        )
    }
}

impl<W: Write> PredictionSink for ConsoleSink<W> {
    fn emit(&mut self, result: &PredictionResult) -> io::Result<()> {
        let line = self.status_line(result);
        if self.live {
            write!(self.out, "\r{line}")?;
            self.drawn = true;
        } else {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.drawn {
            writeln!(self.out)?;
            self.drawn = false;
        }
        self.out.flush()
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Prediction(&'a PredictionResult),
    Diagnostics(&'a WindowReport),
}

/// One JSON object per line, tagged with `"kind"`.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_record(&mut self, record: &Record<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write> PredictionSink for JsonLinesSink<W> {
    fn emit(&mut self, result: &PredictionResult) -> io::Result<()> {
        self.write_record(&Record::Prediction(result))
    }

    fn diagnostics(&mut self, report: &WindowReport) -> io::Result<()> {
        self.write_record(&Record::Diagnostics(report))
    }
}
