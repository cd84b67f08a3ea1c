//! MPV IPC module - drives an external MPV player over its JSON IPC protocol.
//!
//! Architecture:
//! - `protocol.rs` - JSON command/response/event types and serialization
//! - `ipc.rs` - Line transport: serialized writer task and line reader
//! - `correlator.rs` - Request ids and response routing
//! - `dispatcher.rs` - Event handlers and one-shot event waits
//! - `observe.rs` - Two-phase property observation
//! - `process.rs` - MPV binary detection and process spawning
//! - `client.rs` - Connection lifecycle and command methods

mod client;
mod correlator;
mod dispatcher;
mod ipc;
mod observe;
mod process;
mod protocol;


pub use client::{Mpv, MpvError};
pub use correlator::{Completion, Correlator, PendingResponse};
pub use dispatcher::{EventDispatcher, EventWaiter, Flow, HandlerGuard, HandlerId};
pub use ipc::{IpcError, LineReader, LineWriter};
pub use observe::PropertyObservation;
pub use process::{find_mpv, mpv_args, ProcessError};
#[cfg(unix)]
pub use process::spawn_mpv;
pub use protocol::{CommandEnvelope, MpvCommand, MpvEvent, MpvMessage, MpvResponse, PropertyValue};
