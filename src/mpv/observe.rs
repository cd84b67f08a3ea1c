//! Two-phase property observation.
//!
//! mpv answers `observe_property` with a `property-change` event carrying the
//! current value before any real change happens. The first event for an
//! observation id therefore only means "installed"; the second one is the
//! first actual change, after which the observation is retired.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::client::MpvError;
use super::dispatcher::{EventDispatcher, Flow, HandlerId};
use super::ipc::IpcError;
use super::protocol::MpvEvent;

/// Called with the observation id once it should be unobserved on the player.
pub type Retire = Arc<dyn Fn(i64) + Send + Sync>;

enum ObservationState {
  Requesting {
    installed: oneshot::Sender<()>,
    changed: oneshot::Sender<MpvEvent>,
  },
  Installed {
    changed: oneshot::Sender<MpvEvent>,
  },
  Changed,
}

/// A pending `observe_property` on one property.
///
/// Await [`ready`](Self::ready) first, then [`changed`](Self::changed).
/// Dropping an observation that has not changed yet removes its handler and
/// unobserves the property.
pub struct PropertyObservation {
  id: i64,
  name: String,
  handler_id: HandlerId,
  state: Arc<Mutex<ObservationState>>,
  installed_rx: Option<oneshot::Receiver<()>>,
  changed_rx: Option<oneshot::Receiver<MpvEvent>>,
  change: Option<MpvEvent>,
  dispatcher: Weak<EventDispatcher>,
  teardown: CancellationToken,
  retire: Retire,
}

impl PropertyObservation {
  /// Register the event handler for observation `id`. The caller sends the
  /// `observe_property` command afterwards.
  pub fn install(
    dispatcher: &Arc<EventDispatcher>,
    id: i64,
    name: &str,
    teardown: CancellationToken,
    retire: Retire,
  ) -> Self {
    let (installed, installed_rx) = oneshot::channel();
    let (changed, changed_rx) = oneshot::channel();
    let state = Arc::new(Mutex::new(ObservationState::Requesting { installed, changed }));

    let handler_state = state.clone();
    let handler_retire = retire.clone();
    let property = name.to_string();
    let handler_id = dispatcher.register(move |event| {
      if !event.is_property_change(id) {
        return Flow::Continue;
      }

      let mut state = handler_state.lock();
      match std::mem::replace(&mut *state, ObservationState::Changed) {
        ObservationState::Requesting { installed, changed } => {
          log::debug!("Observation {} of {:?} installed", id, property);
          let _ = installed.send(());
          *state = ObservationState::Installed { changed };
          Flow::Continue
        }
        ObservationState::Installed { changed } => {
          log::debug!("Property {:?} changed (observation {})", property, id);
          drop(state);
          let _ = changed.send(event.clone());
          handler_retire(id);
          Flow::Remove
        }
        ObservationState::Changed => Flow::Remove,
      }
    });

    Self {
      id,
      name: name.to_string(),
      handler_id,
      state,
      installed_rx: Some(installed_rx),
      changed_rx: Some(changed_rx),
      change: None,
      dispatcher: Arc::downgrade(dispatcher),
      teardown,
      retire,
    }
  }

  pub fn id(&self) -> i64 {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Wait until mpv acknowledged the observation.
  pub async fn ready(&mut self) -> Result<(), MpvError> {
    let Some(rx) = self.installed_rx.as_mut() else {
      return Ok(());
    };
    let result = tokio::select! {
      biased;
      installed = rx => installed.map_err(|_| MpvError::from(IpcError::Cancelled)),
      _ = self.teardown.cancelled() => Err(IpcError::Cancelled.into()),
    };
    if result.is_ok() {
      self.installed_rx = None;
    }
    result
  }

  /// Wait for the first real change and return the full event. Once it has
  /// arrived, later calls return the same event.
  pub async fn changed(&mut self) -> Result<MpvEvent, MpvError> {
    if let Some(event) = &self.change {
      return Ok(event.clone());
    }
    let Some(rx) = self.changed_rx.as_mut() else {
      return Err(IpcError::Cancelled.into());
    };
    let event = tokio::select! {
      biased;
      changed = rx => changed.map_err(|_| MpvError::from(IpcError::Cancelled))?,
      _ = self.teardown.cancelled() => return Err(IpcError::Cancelled.into()),
    };
    self.changed_rx = None;
    self.change = Some(event.clone());
    Ok(event)
  }

  /// Remove the handler without unobserving, for when `observe_property`
  /// itself failed.
  pub(crate) fn abandon(self) {
    *self.state.lock() = ObservationState::Changed;
    if let Some(dispatcher) = self.dispatcher.upgrade() {
      dispatcher.unregister(self.handler_id);
    }
  }
}

impl Drop for PropertyObservation {
  fn drop(&mut self) {
    let previous = std::mem::replace(&mut *self.state.lock(), ObservationState::Changed);
    if matches!(previous, ObservationState::Changed) {
      return;
    }
    if let Some(dispatcher) = self.dispatcher.upgrade() {
      dispatcher.unregister(self.handler_id);
    }
    if !self.teardown.is_cancelled() {
      (self.retire)(self.id);
    }
  }
}
