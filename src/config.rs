//! Client configuration with persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_DIR: &str = "mpv-ipc";
const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Json {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpvConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments, appended last.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// Arguments for a headless, script-free player.
  #[serde(default = "default_args")]
  pub default_args: Vec<String>,

  /// Pass `--no-config`.
  #[serde(default = "default_true")]
  pub no_config: bool,

  /// Value for `--msg-level` (None = leave mpv's default).
  #[serde(default = "default_msg_level")]
  pub msg_level: Option<String>,

  /// Discard the player's stdout/stderr.
  #[serde(default)]
  pub quiet: bool,

  /// Response deadline for commands in milliseconds (None = wait forever).
  #[serde(default)]
  pub command_timeout_ms: Option<u64>,

  /// Attempts when connecting to an existing IPC socket.
  #[serde(default = "default_connect_retries")]
  pub connect_retries: u32,

  /// Log filter used by [`crate::logging::init`].
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

fn default_args() -> Vec<String> {
  [
    "--idle",
    "--vo=null",
    "--ao=null",
    "--no-ytdl",
    "--load-stats-overlay=no",
    "--load-osd-console=no",
    "--load-auto-profiles=no",
  ]
  .iter()
  .map(|arg| arg.to_string())
  .collect()
}

fn default_true() -> bool {
  true
}

fn default_msg_level() -> Option<String> {
  Some("ipc=trace".to_string())
}

fn default_connect_retries() -> u32 {
  10
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for MpvConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      mpv_args: Vec::new(),
      default_args: default_args(),
      no_config: default_true(),
      msg_level: default_msg_level(),
      quiet: false,
      command_timeout_ms: None,
      connect_retries: default_connect_retries(),
      log_level: default_log_level(),
    }
  }
}

impl MpvConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.command_timeout_ms == Some(0) {
      return Err("Command timeout must be at least 1 millisecond".to_string());
    }
    if self.connect_retries == 0 {
      return Err("Connect retries must be at least 1".to_string());
    }
    if self.log_level.trim().is_empty() {
      return Err("Log level cannot be empty".to_string());
    }
    if let Some(arg) = self.mpv_args.iter().find(|arg| arg.starts_with("--input-ipc-")) {
      return Err(format!("{} is managed by the client and cannot be overridden", arg));
    }
    Ok(())
  }

  pub fn command_timeout(&self) -> Option<Duration> {
    self.command_timeout_ms.map(Duration::from_millis)
  }

  /// `<config dir>/mpv-ipc/config.json`, if the platform has a config dir.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
  }

  /// Load and validate a JSON config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
  }

  /// Load from [`default_path`](Self::default_path), falling back to defaults
  /// when there is no file.
  pub fn load_or_default() -> Result<Self, ConfigError> {
    match Self::default_path() {
      Some(path) if path.exists() => Self::load(&path),
      _ => {
        log::debug!("No config file found, using defaults");
        Ok(Self::default())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_are_valid() {
    let config = MpvConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.command_timeout(), None);
  }

  #[test]
  fn test_partial_file_fills_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"{{"mpvPath": "build/mpv", "commandTimeoutMs": 2500, "mpvArgs": ["--volume=0"]}}"#
    )
    .unwrap();

    let config = MpvConfig::load(file.path()).unwrap();
    assert_eq!(config.mpv_path.as_deref(), Some("build/mpv"));
    assert_eq!(config.command_timeout(), Some(Duration::from_millis(2500)));
    assert_eq!(config.mpv_args, vec!["--volume=0"]);
    assert_eq!(config.default_args, MpvConfig::default().default_args);
    assert!(config.no_config);
  }

  #[test]
  fn test_invalid_values_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"mpvArgs": ["--input-ipc-server=/tmp/x"]}}"#).unwrap();
    assert!(matches!(
      MpvConfig::load(file.path()),
      Err(ConfigError::Invalid(_))
    ));

    let config = MpvConfig {
      connect_retries: 0,
      ..MpvConfig::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_and_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      MpvConfig::load(&dir.path().join("absent.json")),
      Err(ConfigError::Io { .. })
    ));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{not json").unwrap();
    assert!(matches!(
      MpvConfig::load(file.path()),
      Err(ConfigError::Json { .. })
    ));
  }
}
