use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::ConnectivityEvent;
use crate::worker::{Fetch, Request};

/// Turns periodic health checks into connectivity events.
///
/// A response of any status counts as online, a transport failure or
/// timeout as offline. Every check emits an event; the monitor drops the
/// repeats.
pub struct ConnectivityProbe {
  url: Url,
  network: Arc<dyn Fetch>,
  every: Duration,
  timeout: Duration,
  connection_type: Option<String>,
}

impl ConnectivityProbe {
  pub fn new(url: Url, network: Arc<dyn Fetch>, every: Duration) -> Self {
    Self {
      url,
      network,
      every,
      timeout: Duration::from_secs(5),
      connection_type: None,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Descriptor reported with online events.
  pub fn with_connection_type(mut self, connection_type: Option<String>) -> Self {
    self.connection_type = connection_type;
    self
  }

  pub async fn check(&self) -> ConnectivityEvent {
    let request = Request::get(self.url.clone());
    match tokio::time::timeout(self.timeout, self.network.fetch(request)).await {
      Ok(Ok(response)) => {
        debug!(status = response.status, "Health check answered");
        ConnectivityEvent::Online {
          connection_type: self.connection_type.clone(),
        }
      }
      Ok(Err(e)) => {
        debug!(error = %e, "Health check failed");
        ConnectivityEvent::Offline
      }
      Err(_) => {
        debug!(timeout = ?self.timeout, "Health check timed out");
        ConnectivityEvent::Offline
      }
    }
  }

  /// Check on every interval until the receiving side goes away.
  pub fn spawn(self, events: mpsc::UnboundedSender<ConnectivityEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.every);
      loop {
        ticker.tick().await;
        if events.send(self.check().await).is_err() {
          break;
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::testing::FakeNetwork;
  use crate::worker::Response;

  fn url() -> Url {
    Url::parse("https://api.example.com/api/health").unwrap()
  }

  #[tokio::test]
  async fn test_reachable_is_online() {
    let net = FakeNetwork::new();
    net.respond(url().as_str(), Response::new(503, "maintenance"));
    let probe = ConnectivityProbe::new(url(), Arc::new(net), Duration::from_secs(30))
      .with_connection_type(Some("ethernet".into()));

    assert_eq!(
      probe.check().await,
      ConnectivityEvent::Online {
        connection_type: Some("ethernet".into())
      }
    );
  }

  #[tokio::test]
  async fn test_unreachable_is_offline() {
    let net = FakeNetwork::new();
    net.set_offline(true);
    let probe = ConnectivityProbe::new(url(), Arc::new(net), Duration::from_secs(30));
    assert_eq!(probe.check().await, ConnectivityEvent::Offline);
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_check_times_out() {
    let net = FakeNetwork::new();
    net.respond(url().as_str(), Response::new(200, "ok"));
    net.set_delay(Duration::from_secs(60));
    let probe = ConnectivityProbe::new(url(), Arc::new(net), Duration::from_secs(30))
      .with_timeout(Duration::from_secs(1));
    assert_eq!(probe.check().await, ConnectivityEvent::Offline);
  }

  #[tokio::test(start_paused = true)]
  async fn test_spawn_emits_until_receiver_dropped() {
    let net = FakeNetwork::new();
    net.respond(url().as_str(), Response::new(200, "ok"));
    let probe = ConnectivityProbe::new(url(), Arc::new(net), Duration::from_secs(30));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = probe.spawn(tx);

    assert!(matches!(
      rx.recv().await,
      Some(ConnectivityEvent::Online { .. })
    ));
    drop(rx);
    tokio::time::sleep(Duration::from_secs(31)).await;
    handle.await.unwrap();
  }
}
