//! Configuration file support
//!
//! Loads config from ~/.gemchat/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration for gemchat
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Backend base URL
    pub server_url: Option<String>,

    /// Session to open at startup
    pub session_id: Option<String>,

    /// Whether replies stream in incrementally (default true)
    pub streaming: Option<bool>,
}

impl Config {
    /// Load config from ~/.gemchat/config.toml
    pub fn load() -> Self {
        Self::load_path(&config_path())
    }

    /// Load config from an explicit path
    pub fn load_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".gemchat")
        .join("config.toml")
}
