use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::bucket::BucketStorage;
use super::http::{Fetch, Request, Response};
use super::routing::Strategy;

/// Runs the three caching strategies against the network and the buckets.
///
/// Only 2xx responses are written back, always into the dynamic bucket.
#[derive(Clone)]
pub struct StrategyRunner {
  network: Arc<dyn Fetch>,
  buckets: BucketStorage,
  dynamic_bucket: String,
}

impl StrategyRunner {
  pub fn new(network: Arc<dyn Fetch>, buckets: BucketStorage, dynamic_bucket: String) -> Self {
    Self {
      network,
      buckets,
      dynamic_bucket,
    }
  }

  pub async fn run(&self, strategy: Strategy, request: Request) -> Result<Response> {
    match strategy {
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    }
  }

  /// Network, falling back to any cached copy when the network is unreachable.
  pub async fn network_first(&self, request: Request) -> Result<Response> {
    let url = request.url.clone();
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&url, &response);
        Ok(response)
      }
      Err(e) => match self.buckets.match_any(&url)? {
        Some(cached) => {
          debug!(%url, error = %e, "Network failed, serving cached response");
          Ok(cached)
        }
        None => Err(e),
      },
    }
  }

  pub async fn cache_first(&self, request: Request) -> Result<Response> {
    if let Some(cached) = self.buckets.match_any(&request.url)? {
      debug!(url = %request.url, "Cache hit");
      return Ok(cached);
    }
    let url = request.url.clone();
    let response = self.network.fetch(request).await?;
    self.store(&url, &response);
    Ok(response)
  }

  /// Cached copy right away with a refresh in the background; without a
  /// cached copy the network answer is awaited.
  pub async fn stale_while_revalidate(&self, request: Request) -> Result<Response> {
    let url = request.url.clone();
    let Some(cached) = self.buckets.match_any(&url)? else {
      let response = self.network.fetch(request).await?;
      self.store(&url, &response);
      return Ok(response);
    };

    let runner = self.clone();
    tokio::spawn(async move {
      match runner.network.fetch(request).await {
        Ok(response) => runner.store(&url, &response),
        Err(e) => debug!(%url, error = %e, "Background revalidation failed"),
      }
    });
    Ok(cached)
  }

  fn store(&self, url: &Url, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = self.buckets.put(&self.dynamic_bucket, url, response) {
      warn!(%url, error = %e, "Failed to cache response");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::worker::testing::FakeNetwork;
  use std::time::Duration;

  const DYNAMIC: &str = "sigwatch-dynamic-test";

  fn setup() -> (StrategyRunner, FakeNetwork, BucketStorage) {
    let net = FakeNetwork::new();
    let buckets = BucketStorage::new(Database::open_in_memory().unwrap());
    let runner = StrategyRunner::new(Arc::new(net.clone()), buckets.clone(), DYNAMIC.into());
    (runner, net, buckets)
  }

  fn url(path: &str) -> Url {
    Url::parse("https://app.example.com").unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let (runner, net, buckets) = setup();
    let u = url("/static/js/main.js");
    buckets
      .put("sigwatch-static-test", &u, &Response::new(200, "cached"))
      .unwrap();

    let response = runner.cache_first(Request::get(u)).await.unwrap();
    assert_eq!(response.body, b"cached");
    assert_eq!(net.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_success_only() {
    let (runner, net, buckets) = setup();
    let ok = url("/app.css");
    let missing = url("/gone.css");
    net.respond(ok.as_str(), Response::new(200, "body{}"));
    net.respond(missing.as_str(), Response::new(404, "nope"));

    runner.cache_first(Request::get(ok.clone())).await.unwrap();
    let not_found = runner.cache_first(Request::get(missing.clone())).await.unwrap();

    assert_eq!(not_found.status, 404);
    assert!(buckets.get(DYNAMIC, &ok).unwrap().is_some());
    assert!(buckets.get(DYNAMIC, &missing).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let (runner, net, _buckets) = setup();
    let u = url("/api/signals?user_id=1");
    net.respond(u.as_str(), Response::new(200, "fresh"));

    let first = runner.network_first(Request::get(u.clone())).await.unwrap();
    assert_eq!(first.body, b"fresh");

    net.set_offline(true);
    let second = runner.network_first(Request::get(u.clone())).await.unwrap();
    assert_eq!(second.body, b"fresh");

    let uncached = runner.network_first(Request::get(url("/api/coins"))).await;
    assert!(uncached.is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_while_revalidate_answers_from_cache() {
    let (runner, net, buckets) = setup();
    let u = url("/api/news");
    buckets.put(DYNAMIC, &u, &Response::new(200, "old")).unwrap();
    net.respond(u.as_str(), Response::new(200, "new"));
    net.set_delay(Duration::from_secs(10));

    let started = tokio::time::Instant::now();
    let response = runner.stale_while_revalidate(Request::get(u.clone())).await.unwrap();
    assert_eq!(response.body, b"old");
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(buckets.get(DYNAMIC, &u).unwrap().unwrap().body, b"new");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_miss_waits_for_network() {
    let (runner, net, buckets) = setup();
    let u = url("/api/whale-alerts");
    net.respond(u.as_str(), Response::new(200, "[]"));

    let response = runner.stale_while_revalidate(Request::get(u.clone())).await.unwrap();
    assert_eq!(response.body, b"[]");
    assert_eq!(net.calls(), 1);
    assert!(buckets.get(DYNAMIC, &u).unwrap().is_some());
  }
}
