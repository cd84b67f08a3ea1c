//! Event handler registry.
//!
//! Each dispatch pass works on a snapshot of the registered handlers taken
//! when the pass starts. Handlers added during a pass first run on the next
//! event; handlers removed during a pass are skipped for the rest of it.
//! The registry lock is never held while a handler runs, so handlers may
//! register and unregister freely, including themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::client::MpvError;
use super::ipc::IpcError;
use super::protocol::MpvEvent;

/// What a handler wants after seeing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type EventHandler = Arc<dyn Fn(&MpvEvent) -> Flow + Send + Sync>;

#[derive(Default)]
struct DispatcherState {
  handlers: Vec<(HandlerId, EventHandler)>,
  closed: bool,
}

#[derive(Default)]
pub struct EventDispatcher {
  next_id: AtomicU64,
  state: Mutex<DispatcherState>,
}

impl EventDispatcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a handler. After [`close`](Self::close) the handler is dropped
  /// immediately, which cancels whatever it would have resolved.
  pub fn register<F>(&self, handler: F) -> HandlerId
  where
    F: Fn(&MpvEvent) -> Flow + Send + Sync + 'static,
  {
    let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
    let handler: EventHandler = Arc::new(handler);
    let rejected = {
      let mut state = self.state.lock();
      if state.closed {
        Some(handler)
      } else {
        state.handlers.push((id, handler));
        None
      }
    };
    if rejected.is_some() {
      log::debug!("Event handler registered after teardown, dropping it");
    }
    id
  }

  /// Remove a handler. Returns false if it was already gone.
  pub fn unregister(&self, id: HandlerId) -> bool {
    let removed = {
      let mut state = self.state.lock();
      state
        .handlers
        .iter()
        .position(|(handler_id, _)| *handler_id == id)
        .map(|index| state.handlers.remove(index))
    };
    removed.is_some()
  }

  pub fn is_registered(&self, id: HandlerId) -> bool {
    self
      .state
      .lock()
      .handlers
      .iter()
      .any(|(handler_id, _)| *handler_id == id)
  }

  pub fn len(&self) -> usize {
    self.state.lock().handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Run every handler registered at the start of the pass, in order.
  pub fn dispatch(&self, event: &MpvEvent) {
    let snapshot = self.state.lock().handlers.clone();
    for (id, handler) in snapshot {
      if !self.is_registered(id) {
        continue;
      }
      if handler(event) == Flow::Remove {
        self.unregister(id);
      }
    }
  }

  /// Drop all handlers and refuse new ones.
  pub fn close(&self) -> usize {
    let handlers = {
      let mut state = self.state.lock();
      state.closed = true;
      std::mem::take(&mut state.handlers)
    };
    handlers.len()
  }

  /// Register a handler that is removed when the returned guard drops.
  pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> HandlerGuard
  where
    F: Fn(&MpvEvent) -> Flow + Send + Sync + 'static,
  {
    HandlerGuard {
      id: self.register(handler),
      dispatcher: Arc::downgrade(self),
    }
  }

  /// Resolve with the first event named `name` seen from now on.
  ///
  /// The handler is installed before this returns, so an event caused by a
  /// command sent afterwards cannot be missed.
  pub fn wait_for_event(self: &Arc<Self>, name: &str, teardown: CancellationToken) -> EventWaiter {
    let (tx, rx) = oneshot::channel();
    let slot = Mutex::new(Some(tx));
    let wanted = name.to_string();
    let guard = self.subscribe(move |event| {
      if event.event != wanted {
        return Flow::Continue;
      }
      if let Some(tx) = slot.lock().take() {
        let _ = tx.send(event.clone());
      }
      Flow::Remove
    });

    EventWaiter {
      name: name.to_string(),
      rx,
      teardown,
      _guard: guard,
    }
  }
}

/// Unregisters its handler on drop.
pub struct HandlerGuard {
  id: HandlerId,
  dispatcher: Weak<EventDispatcher>,
}

impl HandlerGuard {
  pub fn id(&self) -> HandlerId {
    self.id
  }
}

impl Drop for HandlerGuard {
  fn drop(&mut self) {
    if let Some(dispatcher) = self.dispatcher.upgrade() {
      dispatcher.unregister(self.id);
    }
  }
}

/// One-shot wait for a named event.
pub struct EventWaiter {
  name: String,
  rx: oneshot::Receiver<MpvEvent>,
  teardown: CancellationToken,
  _guard: HandlerGuard,
}

impl EventWaiter {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Wait for the event, or fail with [`IpcError::Cancelled`] if the
  /// connection goes away first.
  pub async fn wait(mut self) -> Result<MpvEvent, MpvError> {
    log::debug!("Waiting for {:?} event", self.name);
    tokio::select! {
      biased;
      received = &mut self.rx => received.map_err(|_| IpcError::Cancelled.into()),
      _ = self.teardown.cancelled() => Err(IpcError::Cancelled.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn event(value: serde_json::Value) -> MpvEvent {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_dispatch_in_registration_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = EventDispatcher::new();
    for name in ["first", "second", "third"] {
      let log = calls.clone();
      dispatcher.register(move |_| {
        log.lock().push(name);
        Flow::Continue
      });
    }

    dispatcher.dispatch(&event(json!({"event": "idle"})));
    assert_eq!(*calls.lock(), vec!["first", "second", "third"]);
  }

  #[test]
  fn test_self_removal_runs_once() {
    let dispatcher = EventDispatcher::new();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    dispatcher.register(move |_| {
      *counter.lock() += 1;
      Flow::Remove
    });

    dispatcher.dispatch(&event(json!({"event": "idle"})));
    dispatcher.dispatch(&event(json!({"event": "idle"})));
    assert_eq!(*calls.lock(), 1);
    assert!(dispatcher.is_empty());
  }

  #[test]
  fn test_removal_during_pass_skips_later_handler() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let calls = Arc::new(Mutex::new(Vec::new()));

    let victim_slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
    let (d, slot, log) = (dispatcher.clone(), victim_slot.clone(), calls.clone());
    dispatcher.register(move |_| {
      log.lock().push("remover");
      if let Some(victim) = *slot.lock() {
        d.unregister(victim);
      }
      Flow::Continue
    });
    let log = calls.clone();
    let victim = dispatcher.register(move |_| {
      log.lock().push("victim");
      Flow::Continue
    });
    *victim_slot.lock() = Some(victim);

    dispatcher.dispatch(&event(json!({"event": "idle"})));
    assert_eq!(*calls.lock(), vec!["remover"]);
  }

  #[test]
  fn test_insertion_during_pass_waits_for_next_event() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let calls = Arc::new(Mutex::new(Vec::new()));

    let (d, log) = (dispatcher.clone(), calls.clone());
    dispatcher.register(move |_| {
      let inner_log = log.clone();
      d.register(move |_| {
        inner_log.lock().push("added");
        Flow::Remove
      });
      log.lock().push("adder");
      Flow::Remove
    });

    dispatcher.dispatch(&event(json!({"event": "idle"})));
    assert_eq!(*calls.lock(), vec!["adder"]);
    dispatcher.dispatch(&event(json!({"event": "idle"})));
    assert_eq!(*calls.lock(), vec!["adder", "added"]);
  }

  #[test]
  fn test_explicit_unregister_from_inside_handler() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let own_id: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(Mutex::new(0));

    let (d, slot, counter) = (dispatcher.clone(), own_id.clone(), calls.clone());
    let id = dispatcher.register(move |_| {
      *counter.lock() += 1;
      if let Some(id) = *slot.lock() {
        d.unregister(id);
      }
      Flow::Continue
    });
    *own_id.lock() = Some(id);

    dispatcher.dispatch(&event(json!({"event": "idle"})));
    dispatcher.dispatch(&event(json!({"event": "idle"})));
    assert_eq!(*calls.lock(), 1);
    assert!(!dispatcher.is_registered(id));
  }

  #[tokio::test]
  async fn test_wait_for_event_fires_once() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let waiter = dispatcher.wait_for_event("start-file", CancellationToken::new());
    assert_eq!(waiter.name(), "start-file");
    assert_eq!(dispatcher.len(), 1);

    dispatcher.dispatch(&event(json!({"event": "idle"})));
    for entry in 1..=3 {
      dispatcher.dispatch(&event(json!({"event": "start-file", "playlist_entry_id": entry})));
    }

    let received = waiter.wait().await.unwrap();
    assert_eq!(received.get("playlist_entry_id"), Some(&json!(1)));
    assert!(dispatcher.is_empty());
  }

  #[tokio::test]
  async fn test_independent_waiters_each_see_first_event() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let a = dispatcher.wait_for_event("seek", CancellationToken::new());
    let b = dispatcher.wait_for_event("seek", CancellationToken::new());

    dispatcher.dispatch(&event(json!({"event": "seek"})));
    assert_eq!(a.wait().await.unwrap().event, "seek");
    assert_eq!(b.wait().await.unwrap().event, "seek");
  }

  #[tokio::test]
  async fn test_close_cancels_waiters() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let waiter = dispatcher.wait_for_event("end-file", CancellationToken::new());
    assert_eq!(dispatcher.close(), 1);
    assert!(waiter.wait().await.unwrap_err().is_cancelled());

    let late = dispatcher.wait_for_event("end-file", CancellationToken::new());
    assert!(dispatcher.is_empty());
    assert!(late.wait().await.unwrap_err().is_cancelled());
  }

  #[tokio::test]
  async fn test_teardown_token_cancels_waiter() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let teardown = CancellationToken::new();
    let waiter = dispatcher.wait_for_event("end-file", teardown.clone());
    teardown.cancel();
    assert!(waiter.wait().await.unwrap_err().is_cancelled());
  }

  #[test]
  fn test_dropping_waiter_or_guard_unregisters() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let waiter = dispatcher.wait_for_event("end-file", CancellationToken::new());
    let guard = dispatcher.subscribe(|_| Flow::Continue);
    assert_eq!(dispatcher.len(), 2);
    assert!(dispatcher.is_registered(guard.id()));

    drop(waiter);
    drop(guard);
    assert!(dispatcher.is_empty());
  }
}
