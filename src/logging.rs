//! Logging setup for the predictor binaries.
//!
//! Installs a global tracing subscriber that writes human-readable events to
//! stderr and, optionally, to a per-session log file under the app root.
//! Stdout stays reserved for prediction output. Session files are timestamped
//! and kept to a bounded count.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::app_dirs;

/// Maximum number of session log files to retain.
const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "myoflow";

static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The logs directory could not be resolved or created.
    #[error("Log directory unavailable: {0}")]
    Dir(#[from] app_dirs::AppDirError),
    /// Failed to enumerate or prune existing session logs.
    #[error("Failed to prune session logs in {path}: {source}")]
    Prune {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to create the log file for this session.
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to format a timestamp for the log filename.
    #[error("Failed to format log filename time: {0}")]
    FormatTime(time::error::Format),
    /// Failed to set the global tracing subscriber.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

/// How the subscriber should be assembled.
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    /// Default filter directive when `RUST_LOG` is unset.
    pub default_level: &'static str,
    /// Write a session file under `<app root>/logs`.
    pub session_file: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_level: "info",
            session_file: true,
        }
    }
}

/// Initialize tracing with [`LogOptions::default`].
pub fn init() -> Result<(), LoggingError> {
    init_with(LogOptions::default())
}

/// Initialize tracing. Subsequent calls are no-ops.
///
/// A failure leaves tracing uninstalled; the binaries report it on stderr and
/// keep streaming.
pub fn init_with(options: LogOptions) -> Result<(), LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let timer = build_timer();
    let console_layer = fmt::layer()
        .with_target(false)
        .with_timer(timer.clone())
        .with_writer(std::io::stderr)
        .boxed();

    let mut log_path = None;
    let mut guard = None;
    let file_layer = if options.session_file {
        let log_dir = app_dirs::logs_dir()?;
        let file_name = format_log_file_name(now_local_or_utc())?;
        let path = log_dir.join(&file_name);
        ensure_file_exists(&path)?;
        prune_old_logs(&log_dir, MAX_LOG_FILES)?;
        let (writer, worker) = tracing_appender::non_blocking(rolling::never(&log_dir, file_name));
        guard = Some(worker);
        log_path = Some(path);
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(writer)
                .boxed(),
        )
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(build_env_filter(options.default_level))
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = LOG_GUARD.set(guard);

    match log_path {
        Some(path) => tracing::info!(path = %path.display(), "Session log opened"),
        None => tracing::debug!("Session log disabled"),
    }
    Ok(())
}

fn ensure_file_exists(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.to_path_buf(),
            source,
        })
}

fn prune_old_logs(dir: &Path, max_files: usize) -> Result<(), LoggingError> {
    let prune_err = |source| LoggingError::Prune {
        path: dir.to_path_buf(),
        source,
    };
    let mut sessions: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(prune_err)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_session_log(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    if sessions.len() <= max_files {
        return Ok(());
    }
    sessions.sort_by_key(|(modified, _)| *modified);
    let excess = sessions.len() - max_files;
    for (_, path) in sessions.into_iter().take(excess) {
        fs::remove_file(&path).map_err(prune_err)?;
    }
    Ok(())
}

fn is_session_log(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("log")
}

fn format_log_file_name(now: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let name = now.format(NAME_FORMAT).map_err(LoggingError::FormatTime)?;
    Ok(format!("{LOG_FILE_PREFIX}_{name}.log"))
}

fn build_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[hour]:[minute]:[second].[subsecond digits:3]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn build_env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn log_filename_has_timestamp_and_prefix() {
        let fixed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let name = format_log_file_name(fixed).unwrap();
        assert_eq!(name, "myoflow_2023-11-14_22-13-20.log");
    }

    #[test]
    fn prune_keeps_newest_session_logs() {
        let dir = tempdir().unwrap();
        for idx in 0..12 {
            ensure_file_exists(&dir.path().join(format!("myoflow_{idx}.log"))).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        prune_old_logs(dir.path(), 10).unwrap();

        let remaining: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_session_log(path))
            .collect();
        assert_eq!(remaining.len(), 10);
        assert!(!dir.path().join("myoflow_0.log").exists());
        assert!(!dir.path().join("myoflow_1.log").exists());
        assert!(dir.path().join("myoflow_11.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
