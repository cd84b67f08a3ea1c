//! Async client for mpv's JSON IPC protocol.
//!
//! ```no_run
//! # async fn demo() -> Result<(), mpv_ipc::MpvError> {
//! use mpv_ipc::{Mpv, MpvConfig};
//!
//! let mpv = Mpv::spawn(&MpvConfig::default())?;
//! let started = mpv.wait_for_event("start-file");
//! mpv.loadfile("av://lavfi:anullsrc").await?;
//! started.wait().await?;
//! mpv.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
pub mod logging;
mod mpv;

pub use config::{ConfigError, MpvConfig};
pub use mpv::*;
