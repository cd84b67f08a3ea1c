//! High-level MPV client: connection lifecycle and command methods.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use super::correlator::Correlator;
use super::dispatcher::{EventDispatcher, EventWaiter, Flow, HandlerGuard};
use super::ipc::{IpcError, LineReader, LineWriter};
use super::observe::{PropertyObservation, Retire};
use super::process::ProcessError;
use super::protocol::{MpvCommand, MpvEvent, MpvMessage, PropertyValue};
use crate::config::MpvConfig;

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("Failed to encode command: {0}")]
  Json(#[from] serde_json::Error),
  #[error("MPV command failed: {0}")]
  CommandFailed(String),
}

impl MpvError {
  /// True when the connection ended before the operation could complete,
  /// as opposed to mpv rejecting it.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, MpvError::Ipc(IpcError::Cancelled))
  }
}

struct Inner {
  writer: LineWriter,
  correlator: Arc<Correlator>,
  dispatcher: Arc<EventDispatcher>,
  next_observe_id: AtomicI64,
  command_timeout: Option<Duration>,
  teardown: CancellationToken,
  process: Mutex<Option<Child>>,
  exit_status: OnceCell<Option<ExitStatus>>,
}

impl Inner {
  async fn command(
    &self,
    cmd: MpvCommand,
    timeout: Option<Duration>,
  ) -> Result<Option<Value>, MpvError> {
    let pending = self.correlator.register_next()?;
    let request_id = pending.request_id();
    let line = cmd.envelope(request_id).to_line()?;

    log::debug!("> {}", line);
    tokio::select! {
      biased;
      sent = self.writer.send(&line) => sent?,
      _ = self.teardown.cancelled() => return Err(IpcError::Cancelled.into()),
    }

    match timeout {
      Some(limit) => match tokio::time::timeout(limit, pending.wait()).await {
        Ok(completion) => completion,
        Err(_) => {
          log::error!(
            "MPV command timeout after {:?}, request_id={}",
            limit,
            request_id
          );
          Err(IpcError::Timeout.into())
        }
      },
      None => pending.wait().await,
    }
  }

  async fn wait_for_exit(&self) -> Result<Option<ExitStatus>, MpvError> {
    let mut process = self.process.lock().await;
    let Some(child) = process.as_mut() else {
      return Ok(None);
    };
    let status = child.wait().await.map_err(ProcessError::WaitFailed)?;
    log::info!("MPV process exited with: {}", status);
    Ok(Some(status))
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.writer.close();
  }
}

/// Client for one mpv IPC connection.
///
/// Clones share the connection. A single background task reads every line
/// the player sends; it is running before any constructor returns.
#[derive(Clone)]
pub struct Mpv {
  inner: Arc<Inner>,
}

impl Mpv {
  /// Spawn mpv with `--input-ipc-client=fd://0` and talk to it over a
  /// socket pair wired to its stdin.
  #[cfg(unix)]
  pub fn spawn(config: &MpvConfig) -> Result<Self, MpvError> {
    let (child, stream) = super::process::spawn_mpv(config)?;
    let (reader, writer) = tokio::io::split(stream);
    let mpv = Self::setup(reader, writer, config, Some(child));
    log::info!("MPV client connected");
    Ok(mpv)
  }

  /// Connect to a running mpv's `--input-ipc-server` socket (named pipe on Windows).
  pub async fn connect(path: &str, config: &MpvConfig) -> Result<Self, MpvError> {
    let mut last_error = None;

    for attempt in 0..config.connect_retries.max(1) {
      if attempt > 0 {
        tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
      }

      match Self::try_connect(path, config).await {
        Ok(mpv) => {
          log::info!("MPV client connected to {}", path);
          return Ok(mpv);
        }
        Err(e) => {
          log::debug!("IPC connect attempt {} failed: {}", attempt + 1, e);
          last_error = Some(e);
        }
      }
    }

    Err(
      last_error
        .unwrap_or_else(|| IpcError::ConnectionFailed("Unknown error".into()))
        .into(),
    )
  }

  #[cfg(windows)]
  async fn try_connect(path: &str, config: &MpvConfig) -> Result<Self, IpcError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
      .open(path)
      .map_err(|e| IpcError::ConnectionFailed(format!("Failed to open pipe: {}", e)))?;

    Ok(Self::from_stream(client, config))
  }

  #[cfg(not(windows))]
  async fn try_connect(path: &str, config: &MpvConfig) -> Result<Self, IpcError> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

    Ok(Self::from_stream(stream, config))
  }

  /// Adopt an already connected byte stream. Must be called inside a Tokio runtime.
  pub fn from_stream<S>(stream: S, config: &MpvConfig) -> Self
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let (reader, writer) = tokio::io::split(stream);
    Self::setup(reader, writer, config, None)
  }

  /// Adopt separate read and write halves. Must be called inside a Tokio runtime.
  pub fn from_split<R, W>(reader: R, writer: W, config: &MpvConfig) -> Self
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    Self::setup(reader, writer, config, None)
  }

  fn setup<R, W>(reader: R, writer: W, config: &MpvConfig, process: Option<Child>) -> Self
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let abort = CancellationToken::new();
    let teardown = CancellationToken::new();
    let correlator = Arc::new(Correlator::new());
    let dispatcher = Arc::new(EventDispatcher::new());

    let (writer, _writer_handle) = LineWriter::spawn(writer, abort.clone());

    tokio::spawn(reader_loop(
      LineReader::new(reader),
      ReaderTeardown {
        writer: writer.clone(),
        correlator: correlator.clone(),
        dispatcher: dispatcher.clone(),
        token: teardown.clone(),
      },
      abort,
    ));

    Self {
      inner: Arc::new(Inner {
        writer,
        correlator,
        dispatcher,
        next_observe_id: AtomicI64::new(1),
        command_timeout: config.command_timeout(),
        teardown,
        process: Mutex::new(process),
        exit_status: OnceCell::new(),
      }),
    }
  }

  /// Send a command and wait for its response data (`None` when mpv sent none).
  pub async fn command(&self, cmd: MpvCommand) -> Result<Option<Value>, MpvError> {
    self.inner.command(cmd, self.inner.command_timeout).await
  }

  /// Like [`command`](Self::command) with an explicit response deadline.
  pub async fn command_with_timeout(
    &self,
    cmd: MpvCommand,
    timeout: Duration,
  ) -> Result<Option<Value>, MpvError> {
    self.inner.command(cmd, Some(timeout)).await
  }

  /// Get a property value.
  pub async fn get_property(&self, name: &str) -> Result<PropertyValue, MpvError> {
    Ok(PropertyValue::from(self.command(MpvCommand::get_property(name)).await?))
  }

  /// Set a property to any JSON value.
  pub async fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<(), MpvError> {
    self
      .command(MpvCommand::set_property(name, value.into()))
      .await?;
    Ok(())
  }

  /// Load a file for playback.
  pub async fn loadfile(&self, url: &str) -> Result<(), MpvError> {
    log::info!("Loading file: {}", url);
    self.command(MpvCommand::loadfile(url)).await?;
    Ok(())
  }

  /// Seek to absolute position in seconds.
  pub async fn seek(&self, time: f64) -> Result<(), MpvError> {
    self.command(MpvCommand::seek(time)).await?;
    Ok(())
  }

  /// Set pause state.
  pub async fn set_pause(&self, paused: bool) -> Result<(), MpvError> {
    self.command(MpvCommand::set_pause(paused)).await?;
    Ok(())
  }

  /// Cycle (toggle) a property.
  pub async fn cycle(&self, property: &str) -> Result<(), MpvError> {
    self.command(MpvCommand::cycle(property)).await?;
    Ok(())
  }

  /// Ask mpv to quit and wait for the session to close.
  pub async fn quit(&self) -> Result<Option<ExitStatus>, MpvError> {
    match self.command(MpvCommand::quit()).await {
      Ok(_) => {}
      Err(e) if e.is_cancelled() => {
        log::debug!("MPV closed the connection before acknowledging quit");
      }
      Err(e) => return Err(e),
    }
    self.closed().await
  }

  /// Resolve with the first event named `name` received from now on.
  pub fn wait_for_event(&self, name: &str) -> EventWaiter {
    self
      .inner
      .dispatcher
      .wait_for_event(name, self.inner.teardown.clone())
  }

  /// Run `handler` on every event until the guard is dropped.
  pub fn subscribe<F>(&self, handler: F) -> HandlerGuard
  where
    F: Fn(&MpvEvent) -> Flow + Send + Sync + 'static,
  {
    self.inner.dispatcher.subscribe(handler)
  }

  /// Start observing `name`. Returns once mpv accepted the `observe_property`
  /// command; the observation may not be installed yet.
  pub async fn observe(&self, name: &str) -> Result<PropertyObservation, MpvError> {
    let id = self.inner.next_observe_id.fetch_add(1, Ordering::SeqCst);
    let observation = PropertyObservation::install(
      &self.inner.dispatcher,
      id,
      name,
      self.inner.teardown.clone(),
      self.unobserver(),
    );

    if let Err(e) = self.command(MpvCommand::observe_property(id, name)).await {
      // mpv may still install an observation whose answer timed out.
      if matches!(e, MpvError::Ipc(IpcError::Timeout)) {
        drop(observation);
      } else {
        observation.abandon();
      }
      return Err(e);
    }
    Ok(observation)
  }

  /// Observe `name` and wait until the observation is installed. Await
  /// [`PropertyObservation::changed`] on the result for the first change.
  pub async fn property_changed(&self, name: &str) -> Result<PropertyObservation, MpvError> {
    let mut observation = self.observe(name).await?;
    observation.ready().await?;
    log::debug!("Waiting for {:?} property to change", name);
    Ok(observation)
  }

  /// Sends `unobserve_property` without waiting for the answer.
  fn unobserver(&self) -> Retire {
    let inner = Arc::downgrade(&self.inner);
    Arc::new(move |id| {
      let Some(inner) = inner.upgrade() else {
        return;
      };
      let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!("No runtime to unobserve property observation {}", id);
        return;
      };
      runtime.spawn(async move {
        if let Err(e) = inner.command(MpvCommand::unobserve_property(id), None).await {
          log::warn!("Failed to unobserve property observation {}: {}", id, e);
        }
      });
    })
  }

  /// Close the write side. The reader keeps running until mpv closes its end.
  pub fn close(&self) {
    self.inner.writer.close();
  }

  /// True once the reader has seen end of stream and torn the session down.
  pub fn is_closed(&self) -> bool {
    self.inner.teardown.is_cancelled()
  }

  /// Cancelled when the connection is torn down.
  pub fn teardown_token(&self) -> CancellationToken {
    self.inner.teardown.clone()
  }

  /// Wait until no more responses or events can arrive and the player
  /// process (if this client spawned one) has exited. Every caller gets the
  /// same exit status.
  pub async fn closed(&self) -> Result<Option<ExitStatus>, MpvError> {
    self.inner.teardown.cancelled().await;
    let status = self
      .inner
      .exit_status
      .get_or_try_init(|| self.inner.wait_for_exit())
      .await?;
    Ok(*status)
  }

  /// [`close`](Self::close) followed by [`closed`](Self::closed).
  pub async fn shutdown(&self) -> Result<Option<ExitStatus>, MpvError> {
    self.close();
    self.closed().await
  }
}

/// Ends the session when the reader task finishes, panics included.
struct ReaderTeardown {
  writer: LineWriter,
  correlator: Arc<Correlator>,
  dispatcher: Arc<EventDispatcher>,
  token: CancellationToken,
}

impl Drop for ReaderTeardown {
  fn drop(&mut self) {
    if std::thread::panicking() {
      log::error!("MPV IPC reader panicked, closing connection");
    }
    self.writer.close();
    let cancelled = self.correlator.cancel_all();
    if cancelled > 0 {
      log::info!("Cancelled {} pending MPV requests", cancelled);
    }
    self.dispatcher.close();
    self.token.cancel();
  }
}

async fn reader_loop<R: AsyncRead + Unpin>(
  mut reader: LineReader<R>,
  session: ReaderTeardown,
  abort: CancellationToken,
) {
  log::info!("MPV IPC reader loop started");

  loop {
    let next = tokio::select! {
      biased;
      _ = abort.cancelled() => {
        log::error!("MPV IPC write side failed, closing connection");
        break;
      }
      next = reader.receive() => next,
    };

    match next {
      Ok(Some(line)) => {
        log::debug!("< {}", line);
        match MpvMessage::parse(&line) {
          Ok(MpvMessage::Response(response)) => session.correlator.resolve(response),
          Ok(MpvMessage::Event(event)) => session.dispatcher.dispatch(&event),
          Err(e) => {
            log::error!("Malformed MPV message, closing connection: {} - {}", e, line);
            break;
          }
        }
      }
      Ok(None) => {
        log::info!("MPV IPC connection closed");
        break;
      }
      Err(e) => {
        log::error!("MPV IPC read error: {}", e);
        break;
      }
    }
  }
}
