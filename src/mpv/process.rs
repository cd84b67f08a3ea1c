//! MPV process detection and spawning.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::MpvConfig;

/// Points mpv's IPC client at the socket handed to it as stdin.
pub const IPC_CLIENT_ARG: &str = "--input-ipc-client=fd://0";

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to create IPC socket pair: {0}")]
  Socket(io::Error),
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] io::Error),
  #[error("Failed to wait for MPV to exit: {0}")]
  WaitFailed(io::Error),
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
    r"C:\mpv\mpv.exe",
  ];

  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];

  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths
    .iter()
    .map(PathBuf::from)
    .find(|path| path.exists())
}

/// Resolve the executable: configured path first, then discovery.
pub fn resolve_mpv(config: &MpvConfig) -> Result<PathBuf, ProcessError> {
  config
    .mpv_path
    .as_deref()
    .filter(|path| !path.is_empty())
    .map(PathBuf::from)
    .or_else(find_mpv)
    .ok_or(ProcessError::NotFound)
}

/// Full argument list for an mpv controlled over its stdin socket.
pub fn mpv_args(config: &MpvConfig) -> Vec<String> {
  let mut args = Vec::new();
  if config.no_config {
    args.push("--no-config".to_string());
  }
  if let Some(level) = config.msg_level.as_deref().filter(|level| !level.is_empty()) {
    args.push(format!("--msg-level={}", level));
  }
  args.push(IPC_CLIENT_ARG.to_string());
  args.extend(config.default_args.iter().cloned());
  args.extend(config.mpv_args.iter().cloned());
  args
}

/// Spawn mpv with one end of a socket pair as its stdin and return the other end.
#[cfg(unix)]
pub fn spawn_mpv(
  config: &MpvConfig,
) -> Result<(tokio::process::Child, tokio::net::UnixStream), ProcessError> {
  use std::os::fd::OwnedFd;
  use std::os::unix::net::UnixStream;
  use std::process::Stdio;

  let mpv_exe = resolve_mpv(config)?;
  let args = mpv_args(config);
  log::info!("Spawning MPV: {:?} with args: {:?}", mpv_exe, args);

  let (ours, theirs) = UnixStream::pair().map_err(ProcessError::Socket)?;

  let mut cmd = tokio::process::Command::new(&mpv_exe);
  cmd.args(&args).stdin(Stdio::from(OwnedFd::from(theirs)));
  if config.quiet {
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
  }
  let child = cmd.spawn()?;
  // Releases our copy of mpv's end, so its exit shows up as end of stream.
  drop(cmd);

  ours.set_nonblocking(true).map_err(ProcessError::Socket)?;
  let stream = tokio::net::UnixStream::from_std(ours).map_err(ProcessError::Socket)?;
  Ok((child, stream))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_args_match_headless_player() {
    let args = mpv_args(&MpvConfig::default());
    assert_eq!(
      args,
      vec![
        "--no-config",
        "--msg-level=ipc=trace",
        "--input-ipc-client=fd://0",
        "--idle",
        "--vo=null",
        "--ao=null",
        "--no-ytdl",
        "--load-stats-overlay=no",
        "--load-osd-console=no",
        "--load-auto-profiles=no",
      ]
    );
  }

  #[test]
  fn test_user_args_come_last() {
    let config = MpvConfig {
      no_config: false,
      msg_level: None,
      default_args: Vec::new(),
      mpv_args: vec!["--volume=50".to_string()],
      ..MpvConfig::default()
    };
    assert_eq!(mpv_args(&config), vec![IPC_CLIENT_ARG, "--volume=50"]);
  }

  #[test]
  fn test_configured_path_wins() {
    let config = MpvConfig {
      mpv_path: Some("/opt/mpv/build/mpv".to_string()),
      ..MpvConfig::default()
    };
    assert_eq!(resolve_mpv(&config).unwrap(), PathBuf::from("/opt/mpv/build/mpv"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_spawn_reports_missing_binary() {
    let config = MpvConfig {
      mpv_path: Some("/nonexistent/mpv-binary".to_string()),
      ..MpvConfig::default()
    };
    assert!(matches!(spawn_mpv(&config), Err(ProcessError::SpawnFailed(_))));
  }
}
