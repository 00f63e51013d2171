//! Configuration for ampl-console.
//!
//! Loaded from `~/.ampl-console/config.toml`; every field is optional:
//!
//! ```toml
//! # AMPL binary and its arguments (-b selects the framed protocol)
//! binary = "ampl"
//! args = ["-b"]
//!
//! # trace, debug, info, warn, error (RUST_LOG takes precedence)
//! log_level = "info"
//!
//! # Warn when AMPL has not replied for this long (omit to disable)
//! idle_timeout_secs = 60
//!
//! # Send `cd "<dir>";` before loading files given on the command line
//! change_dir_on_run = true
//!
//! [history]
//! limit = 1000
//! persist = true
//!
//! # ANSI color numbers 0-7
//! [colors]
//! prompt = 7
//! error = 1
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::term::Palette;
use crate::history::HISTORY_LIMIT;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AMPL binary
    pub binary: String,
    /// Arguments passed to the binary
    pub args: Vec<String>,
    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
    /// Idle warning threshold in seconds
    pub idle_timeout_secs: Option<u64>,
    /// Change into a file's directory before loading it
    pub change_dir_on_run: bool,
    /// History settings
    pub history: HistoryConfig,
    /// Highlight colors
    pub colors: ColorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary: "ampl".to_string(),
            args: vec!["-b".to_string()],
            log_level: "info".to_string(),
            idle_timeout_secs: None,
            change_dir_on_run: true,
            history: HistoryConfig::default(),
            colors: ColorConfig::default(),
        }
    }
}

/// History configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub limit: usize,
    pub persist: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: HISTORY_LIMIT,
            persist: true,
        }
    }
}

/// Color configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub prompt: u8,
    pub error: u8,
}

impl Default for ColorConfig {
    fn default() -> Self {
        let palette = Palette::default();
        Self {
            prompt: palette.prompt,
            error: palette.error,
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read config {}: {}", path.display(), e);
                return Self::default();
            }
        };
        Self::parse(&content).unwrap_or_else(|e| {
            warn!("Invalid config {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get config file path
    pub fn get_config_path() -> Option<PathBuf> {
        app_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn palette(&self) -> Palette {
        Palette {
            prompt: self.colors.prompt,
            error: self.colors.error,
        }
    }
}

/// `~/.ampl-console`, created on first use
pub fn app_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".ampl-console");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
