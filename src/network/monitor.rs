use color_eyre::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{ConnectivityEvent, NetworkState};
use crate::cache::{QueryClient, QueryKey, Resource};
use crate::notify::Notifier;
use crate::refresh::RefreshCoordinator;

/// What handling one connectivity event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
  /// Same state as before; nothing emitted
  Unchanged,
  WentOffline,
  /// Back online; these resources were invalidated and refetched
  Reconnected { refreshed: Vec<Resource> },
}

/// Reacts to online/offline transitions.
///
/// Each transition produces exactly one notification. Reconnecting also
/// invalidates every important resource and wakes their pollers.
pub struct NetworkMonitor {
  state: watch::Sender<NetworkState>,
  client: QueryClient,
  notifier: Notifier,
  coordinator: Option<RefreshCoordinator>,
}

impl NetworkMonitor {
  pub fn new(state: watch::Sender<NetworkState>, client: QueryClient, notifier: Notifier) -> Self {
    Self {
      state,
      client,
      notifier,
      coordinator: None,
    }
  }

  /// Also wake this coordinator's pollers on reconnect.
  pub fn with_coordinator(mut self, coordinator: RefreshCoordinator) -> Self {
    self.coordinator = Some(coordinator);
    self
  }

  pub fn state(&self) -> NetworkState {
    self.state.borrow().clone()
  }

  pub fn handle(&self, event: ConnectivityEvent) -> Result<Transition> {
    let was_online = self.state.borrow().is_online;

    match event {
      ConnectivityEvent::Offline if !was_online => Ok(Transition::Unchanged),
      ConnectivityEvent::Offline => {
        self.state.send_replace(NetworkState::offline());
        warn!("Network connection lost");
        self
          .notifier
          .warning("Connection lost", "You are offline. Showing cached data.");
        Ok(Transition::WentOffline)
      }
      ConnectivityEvent::Online { connection_type } if was_online => {
        self.state.send_if_modified(|state| {
          let changed = state.connection_type != connection_type;
          state.connection_type = connection_type;
          changed
        });
        Ok(Transition::Unchanged)
      }
      ConnectivityEvent::Online { connection_type } => {
        self.state.send_replace(NetworkState::online(connection_type));
        info!("Network connection restored");
        self
          .notifier
          .success("Connection restored", "Back online. Refreshing data.");
        let refreshed = self.refresh_important()?;
        Ok(Transition::Reconnected { refreshed })
      }
    }
  }

  fn refresh_important(&self) -> Result<Vec<Resource>> {
    let mut refreshed = Vec::new();
    for resource in Resource::IMPORTANT {
      let strategy = self.client.strategies().get(resource.category());
      if !strategy.refetch_on_reconnect {
        continue;
      }
      let pattern = QueryKey::resource(resource);
      self.client.invalidate(&pattern)?;
      if let Some(coordinator) = &self.coordinator {
        coordinator.refresh_now(&pattern)?;
      }
      refreshed.push(resource);
    }
    Ok(refreshed)
  }

  /// Consume connectivity events until the sender side closes.
  pub fn spawn(self, mut events: mpsc::UnboundedReceiver<ConnectivityEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        if let Err(e) = self.handle(event) {
          warn!(error = %e, "Failed to handle connectivity change");
        }
      }
    })
  }
}
