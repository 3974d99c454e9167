//! Loader configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::DEFAULT_EXTENSION;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config {path}: {message}")]
  Invalid { path: PathBuf, message: String },
}

/// Configuration for loading a plugin forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
  /// Root directory of the plugin forest.
  pub plugins_dir: PathBuf,

  /// Extension (without the dot) of unit files.
  pub manifest_extension: String,

  /// Tree paths built right after a load.
  pub eager_paths: Vec<String>,

  /// Whether dot-directories are scanned.
  pub follow_hidden: bool,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      plugins_dir: PathBuf::from("plugins"),
      manifest_extension: DEFAULT_EXTENSION.to_string(),
      eager_paths: Vec::new(),
      follow_hidden: false,
    }
  }
}

impl LoaderConfig {
  /// Read a TOML config file. Missing keys take their defaults.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml(path, &text)
  }

  fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text).map_err(|e| ConfigError::Invalid {
      path: path.to_path_buf(),
      message: e.message().to_string(),
    })?;
    if config.manifest_extension.trim_start_matches('.').is_empty() {
      return Err(ConfigError::Invalid {
        path: path.to_path_buf(),
        message: "manifest_extension must not be empty".to_string(),
      });
    }
    Ok(config)
  }

  pub fn with_plugins_dir(dir: impl Into<PathBuf>) -> Self {
    Self {
      plugins_dir: dir.into(),
      ..Self::default()
    }
  }
}
