//! Configuration for taskring.
//!
//! Settings are read from `~/.taskring/config.toml` (or the file given with
//! `--config`). Every field has a default, so a partial file is fine:
//!
//! ```toml
//! # Program the new-task chord spawns
//! default_program = "menu"
//!
//! # Programs spawned at start when none are named on the command line
//! startup = ["menu"]
//!
//! [hotkeys]
//! new_task = "ctrl+t"
//! focus_next = "ctrl+right"
//! focus_prev = "ctrl+left"
//! close_focused = "ctrl+w"
//! quit = "ctrl+q"
//!
//! [status_bar]
//! focus_marker = "*"
//! text_color = "black"
//! background_color = "white"
//! focused_color = "blue"
//! crashed_color = "red"
//! ```
//!
//! Colours are the 16 palette names in kebab-case (`bright-black`, ...).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::term::Color;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program spawned by the new-task chord
    pub default_program: String,
    /// Programs spawned at start
    pub startup: Vec<String>,
    pub hotkeys: HotkeyConfig,
    pub status_bar: StatusBarConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_program: "menu".to_string(),
            startup: vec!["menu".to_string()],
            hotkeys: HotkeyConfig::default(),
            status_bar: StatusBarConfig::default(),
        }
    }
}

/// Session chords, written like `ctrl+t`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    pub new_task: String,
    pub focus_next: String,
    pub focus_prev: String,
    pub close_focused: String,
    /// Turned into a terminate event by the terminal host
    pub quit: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            new_task: "ctrl+t".to_string(),
            focus_next: "ctrl+right".to_string(),
            focus_prev: "ctrl+left".to_string(),
            close_focused: "ctrl+w".to_string(),
            quit: "ctrl+q".to_string(),
        }
    }
}

/// Status bar appearance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusBarConfig {
    pub focus_marker: String,
    pub text_color: Color,
    pub background_color: Color,
    /// Text colour of the focused entry
    pub focused_color: Color,
    /// Text colour of crashed entries
    pub crashed_color: Color,
}

impl Default for StatusBarConfig {
    fn default() -> Self {
        Self {
            focus_marker: "*".to_string(),
            text_color: Color::Black,
            background_color: Color::White,
            focused_color: Color::Blue,
            crashed_color: Color::Red,
        }
    }
}

impl Config {
    /// Load the user configuration, falling back to defaults
    pub fn load() -> Self {
        match config_dir().map(|dir| dir.join("config.toml")) {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("{}; using defaults", e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `~/.taskring`, created on first use
pub fn config_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".taskring");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
