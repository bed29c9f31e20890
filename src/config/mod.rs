//! TOML settings: loading, validation and atomic saving.

mod errors;
mod types;


use std::io::Write;
use std::path::{Path, PathBuf};

pub use errors::ConfigError;
pub use types::{
    AcquisitionSettings, ArtifactPaths, BoardKind, BoardSettings, DiagnosticsSettings, FilterMode,
    FilterSettings, GestureSettings, InferenceMode, LABEL_ENCODER_FILE_NAME, MODEL_FILE_NAME,
    NORMALIZATION_FILE_NAME, ResolvedArtifactPaths, Settings,
};

use crate::app_dirs;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default settings file inside the app root.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load from `explicit` or the default location, falling back to defaults
/// when the file does not exist. The result is validated.
pub fn load(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };
    let settings = load_from(&path)?;
    settings.validate()?;
    Ok(settings)
}

/// Parse a settings file without validating it. Missing files yield defaults.
pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Settings>(&text)
        .map(Settings::normalized)
        .map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
}

/// Write settings as TOML, creating parent directories as needed.
pub fn save_to_path(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    let data = toml::to_string_pretty(settings).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, data.as_bytes())
}

/// Write through a sibling temp file and rename over the target.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
        path: dir.clone(),
        source,
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| write_err(std::io::Error::other("config path has no file name")))?;
    let tmp_path = dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        rand::random::<u32>()
    ));
    let result = std::fs::File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&tmp_path, path));
    if let Err(source) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(write_err(source));
    }
    Ok(())
}
