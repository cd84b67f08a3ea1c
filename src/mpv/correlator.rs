//! Request id allocation and response routing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::client::MpvError;
use super::ipc::IpcError;
use super::protocol::MpvResponse;

/// What a pending request eventually resolves to.
pub type Completion = Result<Option<Value>, MpvError>;

/// Pending request waiting for response.
type PendingRequest = oneshot::Sender<Completion>;

#[derive(Default)]
struct CorrelatorState {
  /// Allocated ids that have no completion slot yet.
  unclaimed: HashSet<i64>,
  pending: HashMap<i64, PendingRequest>,
  closed: bool,
}

/// Matches responses to the requests that caused them.
pub struct Correlator {
  next_id: AtomicI64,
  state: Mutex<CorrelatorState>,
}

impl Correlator {
  pub fn new() -> Self {
    Self {
      next_id: AtomicI64::new(1),
      state: Mutex::new(CorrelatorState::default()),
    }
  }

  /// Allocate the next id and register its completion slot in one step.
  pub fn register_next(self: &Arc<Self>) -> Result<PendingResponse, IpcError> {
    self.register(self.allocate())
  }

  /// Next request id. Starts at 1 and is never reused.
  pub(crate) fn allocate(&self) -> i64 {
    let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
    self.state.lock().unclaimed.insert(request_id);
    request_id
  }

  /// Create the completion slot for an allocated id. Must happen before the
  /// command is written, or a fast response could arrive with nowhere to go.
  ///
  /// # Panics
  ///
  /// If `request_id` was not returned by [`allocate`](Self::allocate) or
  /// already has a slot.
  pub(crate) fn register(self: &Arc<Self>, request_id: i64) -> Result<PendingResponse, IpcError> {
    let mut state = self.state.lock();
    assert!(
      state.unclaimed.remove(&request_id),
      "request_id={} was never allocated or is already registered",
      request_id
    );
    if state.closed {
      return Err(IpcError::Disconnected);
    }

    let (tx, rx) = oneshot::channel();
    state.pending.insert(request_id, tx);
    Ok(PendingResponse {
      request_id,
      rx,
      correlator: Arc::clone(self),
    })
  }

  /// Route a decoded response to its waiter.
  pub fn resolve(&self, response: MpvResponse) {
    let Some(tx) = self.state.lock().pending.remove(&response.request_id) else {
      log::warn!(
        "MPV reader: dropping response for unknown request_id={}",
        response.request_id
      );
      return;
    };

    let completion = if response.is_success() {
      Ok(response.data)
    } else {
      Err(MpvError::CommandFailed(response.error))
    };
    let _ = tx.send(completion);
  }

  /// Fail every pending request with [`IpcError::Cancelled`] and refuse new
  /// ones. Only the first call has any effect.
  pub fn cancel_all(&self) -> usize {
    let pending = {
      let mut state = self.state.lock();
      if state.closed {
        return 0;
      }
      state.closed = true;
      std::mem::take(&mut state.pending)
    };

    let count = pending.len();
    for (request_id, tx) in pending {
      log::debug!("Cancelling request_id={}", request_id);
      let _ = tx.send(Err(IpcError::Cancelled.into()));
    }
    count
  }

  pub fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  pub fn pending_count(&self) -> usize {
    self.state.lock().pending.len()
  }

  fn discard(&self, request_id: i64) {
    self.state.lock().pending.remove(&request_id);
  }
}

impl Default for Correlator {
  fn default() -> Self {
    Self::new()
  }
}

/// A registered request. Dropping it removes the slot from the table.
pub struct PendingResponse {
  request_id: i64,
  rx: oneshot::Receiver<Completion>,
  correlator: Arc<Correlator>,
}

impl PendingResponse {
  pub fn request_id(&self) -> i64 {
    self.request_id
  }

  /// Wait for the response, a command failure, or teardown.
  pub async fn wait(mut self) -> Completion {
    match (&mut self.rx).await {
      Ok(completion) => completion,
      Err(_) => Err(IpcError::Cancelled.into()),
    }
  }
}

impl Drop for PendingResponse {
  fn drop(&mut self) {
    self.correlator.discard(self.request_id);
  }
}
