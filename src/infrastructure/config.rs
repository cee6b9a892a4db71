use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::infrastructure::persistence::SESSION_STORE_FILE_NAME;
use crate::infrastructure::tmux::DEFAULT_TMUX_BINARY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeckhandConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Polling intervals for the capture scheduler. These are responsiveness trade-offs,
/// not correctness properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_fast_ms")]
    pub fast_ms: u64,
    #[serde(default = "default_medium_ms")]
    pub medium_ms: u64,
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

const fn default_fast_ms() -> u64 {
    80
}

const fn default_medium_ms() -> u64 {
    200
}

const fn default_slow_ms() -> u64 {
    500
}

const fn default_idle_ms() -> u64 {
    2000
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fast_ms: default_fast_ms(),
            medium_ms: default_medium_ms(),
            slow_ms: default_slow_ms(),
            idle_ms: default_idle_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_double_escape_ms")]
    pub double_escape_ms: u64,
}

const fn default_double_escape_ms() -> u64 {
    300
}

impl InputConfig {
    pub fn double_escape_window(self) -> Duration {
        Duration::from_millis(self.double_escape_ms)
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            double_escape_ms: default_double_escape_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    #[serde(default = "default_tmux_binary")]
    pub tmux_binary: String,
}

const fn default_cols() -> u16 {
    200
}

const fn default_rows() -> u16 {
    50
}

fn default_tmux_binary() -> String {
    DEFAULT_TMUX_BINARY.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_cols: default_cols(),
            default_rows: default_rows(),
            tmux_binary: default_tmux_binary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: DeckhandConfig,
}

fn config_directory() -> Option<PathBuf> {
    if let Some(path) = dirs::config_dir() {
        return Some(path.join("deckhand"));
    }

    dirs::home_dir().map(|path| path.join(".config").join("deckhand"))
}

pub fn config_path() -> Option<PathBuf> {
    config_directory().map(|path| path.join("config.toml"))
}

pub fn session_store_path() -> Option<PathBuf> {
    config_directory().map(|path| path.join(SESSION_STORE_FILE_NAME))
}

pub fn load() -> Result<LoadedConfig, String> {
    let path = config_path().ok_or_else(|| "cannot resolve config path".to_string())?;
    let config = load_from_path(&path)?;
    Ok(LoadedConfig { path, config })
}

pub fn load_from_path(path: &Path) -> Result<DeckhandConfig, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(DeckhandConfig::default());
        }
        Err(error) => return Err(format!("config read failed: {error}")),
    };

    toml::from_str::<DeckhandConfig>(&raw).map_err(|error| format!("config parse failed: {error}"))
}

pub fn save_to_path(path: &Path, config: &DeckhandConfig) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Err("config path missing parent directory".to_string());
    };

    fs::create_dir_all(parent)
        .map_err(|error| format!("config directory create failed: {error}"))?;
    let encoded =
        toml::to_string_pretty(config).map_err(|error| format!("config encode failed: {error}"))?;
    fs::write(path, encoded).map_err(|error| format!("config write failed: {error}"))
}
