//! Connectivity tracking.
//!
//! [`NetworkState`] is published through a `tokio::sync::watch` channel that
//! the query client and polling tasks read. The [`NetworkMonitor`] owns the
//! sending side and reacts to connectivity transitions; a
//! [`ConnectivityProbe`] produces those transitions from health checks.

mod monitor;
mod probe;

pub use monitor::NetworkMonitor;
pub use probe::ConnectivityProbe;

use chrono::{DateTime, Utc};

/// Current connectivity as seen by the rest of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkState {
  pub is_online: bool,
  /// Best-effort descriptor (e.g. "wifi", "ethernet"); advisory only
  pub connection_type: Option<String>,
  pub changed_at: DateTime<Utc>,
}

impl NetworkState {
  pub fn online(connection_type: Option<String>) -> Self {
    Self {
      is_online: true,
      connection_type,
      changed_at: Utc::now(),
    }
  }

  pub fn offline() -> Self {
    Self {
      is_online: false,
      connection_type: None,
      changed_at: Utc::now(),
    }
  }
}

/// A connectivity signal from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
  Online { connection_type: Option<String> },
  Offline,
}
