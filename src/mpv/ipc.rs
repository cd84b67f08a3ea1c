//! Line transport over the IPC socket.
//!
//! The write half is owned by a single writer task; callers hand it complete
//! lines and wait until they have been written and flushed, so concurrent
//! senders never interleave and back-pressure reaches the caller. The read
//! half is wrapped in a [`LineReader`] owned by the connection's reader task.

use std::io;

use async_channel::{Receiver, Sender};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lines queued ahead of the writer before `send` starts waiting for room.
const WRITE_QUEUE_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("Disconnected")]
  Disconnected,
  #[error("Connection closed before a response arrived")]
  Cancelled,
}

/// Writer channel message.
struct WriteMessage {
  line: Vec<u8>,
  written: oneshot::Sender<io::Result<()>>,
}

/// Sending side of the transport. Cheap to clone; all clones feed one writer task.
#[derive(Clone)]
pub struct LineWriter {
  write_tx: Sender<WriteMessage>,
}

impl LineWriter {
  /// Spawn the writer task for `writer`.
  ///
  /// `abort` is cancelled if a write fails, so the reader can tear the
  /// connection down instead of waiting for a peer that will never answer.
  pub fn spawn<W>(writer: W, abort: CancellationToken) -> (Self, JoinHandle<()>)
  where
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let (write_tx, write_rx) = async_channel::bounded(WRITE_QUEUE_DEPTH);
    let handle = tokio::spawn(writer_loop(writer, write_rx, abort));
    (Self { write_tx }, handle)
  }

  /// Write one line (without its terminator) and wait until it is flushed.
  pub async fn send(&self, line: &str) -> Result<(), IpcError> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');

    let (written, done) = oneshot::channel();
    self
      .write_tx
      .send(WriteMessage {
        line: bytes,
        written,
      })
      .await
      .map_err(|_| IpcError::Disconnected)?;

    match done.await {
      Ok(result) => result.map_err(IpcError::from),
      Err(_) => Err(IpcError::Disconnected),
    }
  }

  /// Shut down the write side once queued lines are flushed. Idempotent.
  pub fn close(&self) {
    if self.write_tx.close() {
      log::info!("MPV IPC write side closing");
    }
  }

  pub fn is_closed(&self) -> bool {
    self.write_tx.is_closed()
  }
}

async fn writer_loop<W: AsyncWrite + Unpin>(
  mut writer: W,
  write_rx: Receiver<WriteMessage>,
  abort: CancellationToken,
) {
  log::debug!("MPV IPC writer loop started");

  while let Ok(msg) = write_rx.recv().await {
    let result = write_line(&mut writer, &msg.line).await;
    let failed = result.is_err();
    if let Err(e) = &result {
      log::error!("MPV IPC write error: {}", e);
    }
    let _ = msg.written.send(result);
    if failed {
      write_rx.close();
      abort.cancel();
      // Lines queued behind the failed one will never be written.
      while let Ok(queued) = write_rx.try_recv() {
        let _ = queued.written.send(Err(io::Error::new(
          io::ErrorKind::BrokenPipe,
          "write side failed",
        )));
      }
      return;
    }
  }

  if let Err(e) = writer.shutdown().await {
    log::debug!("MPV IPC shutdown of write side failed: {}", e);
  }
  log::debug!("MPV IPC writer loop finished");
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> io::Result<()> {
  writer.write_all(line).await?;
  writer.flush().await
}

/// Receiving side of the transport.
pub struct LineReader<R> {
  reader: BufReader<R>,
  line: String,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
  pub fn new(reader: R) -> Self {
    Self {
      reader: BufReader::new(reader),
      line: String::new(),
    }
  }

  /// Next complete, non-empty line, or `None` at end of stream.
  ///
  /// A trailing fragment without a newline is discarded: the peer closed
  /// mid-line, so there is nothing complete left to deliver.
  pub async fn receive(&mut self) -> Result<Option<String>, IpcError> {
    loop {
      self.line.clear();
      if self.reader.read_line(&mut self.line).await? == 0 {
        return Ok(None);
      }
      if !self.line.ends_with('\n') {
        log::warn!("MPV IPC discarding partial line at end of stream: {}", self.line);
        return Ok(None);
      }
      let trimmed = self.line.trim_end_matches(['\n', '\r']);
      if !trimmed.trim().is_empty() {
        return Ok(Some(trimmed.to_string()));
      }
    }
  }
}
