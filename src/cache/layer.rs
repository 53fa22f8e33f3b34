//! Query client that orchestrates caching logic with network fetching.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::result::CacheResult;
use super::store::{CacheStore, QueryStatus};
use super::strategy::{NetworkMode, StrategyTable};
use crate::network::NetworkState;

/// Fetch-through access to the cache store.
///
/// Sits between callers and their async fetchers: decides per category
/// whether cached data can be served, runs the fetcher when it can't, and
/// serves stale data when the network is down.
#[derive(Clone)]
pub struct QueryClient {
  store: CacheStore,
  strategies: Arc<StrategyTable>,
  network: watch::Receiver<NetworkState>,
}

impl QueryClient {
  pub fn new(
    store: CacheStore,
    strategies: StrategyTable,
    network: watch::Receiver<NetworkState>,
  ) -> Self {
    Self {
      store,
      strategies: Arc::new(strategies),
      network,
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn strategies(&self) -> &StrategyTable {
    &self.strategies
  }

  pub fn network(&self) -> watch::Receiver<NetworkState> {
    self.network.clone()
  }

  pub fn is_online(&self) -> bool {
    self.network.borrow().is_online
  }

  /// Fetch with the key's category strategy.
  ///
  /// 1. Fresh cache is returned immediately
  /// 2. Stale cache is returned as-is when offline or for offline-first categories
  /// 3. Otherwise fetch from network; on failure fall back to stale cache
  /// 4. With no cache at all, a fetch failure is returned to the caller
  pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let strategy = self.strategies.get(key.category());
    let now = Utc::now();

    let cached = self.store.get(key)?.and_then(|entry| {
      let stale = entry.is_stale(strategy.stale_time, now);
      entry
        .data
        .map(|data| (data, entry.updated_at.unwrap_or(now), stale))
    });

    let Some((data, cached_at, stale)) = cached else {
      if !self.is_online() {
        return Err(eyre!("Offline and nothing cached for {}", key));
      }
      return self.run_fetch(key, fetcher).await.map(CacheResult::fetched);
    };

    if !stale {
      return Ok(CacheResult::cached(decode(key, data)?, cached_at, false));
    }
    if !self.is_online() {
      return Ok(CacheResult::fallback(decode(key, data)?, cached_at));
    }
    if strategy.network_mode == NetworkMode::OfflineFirst {
      return Ok(CacheResult::cached(decode(key, data)?, cached_at, true));
    }

    match self.run_fetch(key, fetcher).await {
      Ok(fresh) => Ok(CacheResult::fetched(fresh)),
      Err(e) => {
        warn!(key = %key, error = %e, "Fetch failed, serving stale cache");
        Ok(CacheResult::fallback(decode(key, data)?, cached_at))
      }
    }
  }

  /// Invalidate `key` and fetch it again regardless of freshness.
  ///
  /// Errors are recorded on the entry and returned; previous data stays.
  pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    self.store.invalidate(key)?;
    self.run_fetch(key, fetcher).await
  }

  /// Decode the cached payload for `key`, if any.
  pub fn read<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<T>> {
    match self.store.get(key)?.and_then(|e| e.data) {
      Some(data) => decode(key, data).map(Some),
      None => Ok(None),
    }
  }

  pub fn invalidate(&self, pattern: &QueryKey) -> Result<usize> {
    let count = self.store.invalidate(pattern)?;
    debug!(pattern = %pattern, count, "Invalidated cache entries");
    Ok(count)
  }

  /// Periodically evict unobserved entries past their gc time.
  pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
    let store = self.store.clone();
    let strategies = Arc::clone(&self.strategies);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      loop {
        ticker.tick().await;
        match store.collect_garbage(&strategies, Utc::now()) {
          Ok(0) => {}
          Ok(n) => debug!(evicted = n, "Cache garbage collection"),
          Err(e) => warn!(error = %e, "Cache garbage collection failed"),
        }
      }
    })
  }

  async fn run_fetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    self.store.set(key, None, QueryStatus::Pending)?;
    match fetcher().await {
      Ok(data) => {
        let value = serde_json::to_value(&data)
          .map_err(|e| eyre!("Failed to serialize result for {}: {}", key, e))?;
        self.store.set(key, Some(value), QueryStatus::Success)?;
        Ok(data)
      }
      Err(e) => {
        self.store.set_error(key, &e)?;
        Err(e)
      }
    }
  }
}

fn decode<T: DeserializeOwned>(key: &QueryKey, data: Value) -> Result<T> {
  serde_json::from_value(data).map_err(|e| eyre!("Failed to decode cached {}: {}", key, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::result::CacheSource;
  use crate::cache::strategy::StrategyOverride;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn client(online: bool) -> (QueryClient, watch::Sender<NetworkState>) {
    let state = if online {
      NetworkState::online(None)
    } else {
      NetworkState::offline()
    };
    let (tx, rx) = watch::channel(state);
    (
      QueryClient::new(CacheStore::new(), StrategyTable::default(), rx),
      tx,
    )
  }

  #[tokio::test]
  async fn test_miss_fetches_then_hits() {
    let (client, _tx) = client(true);
    let key = QueryKey::dashboard("u1");
    let calls = AtomicU32::new(0);

    let first = client
      .fetch(&key, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1, 2, 3])
      })
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);

    let second: CacheResult<Vec<i32>> = client
      .fetch(&key, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![9])
      })
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, vec![1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_data_visible_until_refetch_completes() {
    let (client, _tx) = client(true);
    let key = QueryKey::trading_signals("u1", "swing");
    client
      .fetch(&key, || async { Ok(vec!["a".to_string()]) })
      .await
      .unwrap();

    client.invalidate(&key).unwrap();
    let (release, gate) = tokio::sync::oneshot::channel::<()>();

    let refetching = {
      let client = client.clone();
      let key = key.clone();
      tokio::spawn(async move {
        client
          .refetch(&key, || async move {
            gate.await.ok();
            Ok(vec!["a".to_string(), "b".to_string()])
          })
          .await
      })
    };

    tokio::task::yield_now().await;
    let during: Option<Vec<String>> = client.read(&key).unwrap();
    assert_eq!(during, Some(vec!["a".to_string()]));

    release.send(()).unwrap();
    refetching.await.unwrap().unwrap();
    let after: Option<Vec<String>> = client.read(&key).unwrap();
    assert_eq!(after, Some(vec!["a".to_string(), "b".to_string()]));
  }

  #[tokio::test]
  async fn test_failed_refresh_serves_stale() {
    let (client, _tx) = client(true);
    let key = QueryKey::recommendations("u1");
    client.fetch(&key, || async { Ok(7u32) }).await.unwrap();
    client.invalidate(&key).unwrap();

    let result = client
      .fetch(&key, || async { Err::<u32, _>(eyre!("boom")) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, 7);

    let entry = client.store().get(&key).unwrap().unwrap();
    assert_eq!(entry.status, QueryStatus::Error);
  }

  #[tokio::test]
  async fn test_miss_with_failure_propagates() {
    let (client, _tx) = client(true);
    let key = QueryKey::dashboard("u1");
    let result = client
      .fetch(&key, || async { Err::<u32, _>(eyre!("down")) })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_offline_serves_cache_without_fetching() {
    let (client, tx) = client(true);
    let key = QueryKey::coins("", "price", "desc", "");
    client.fetch(&key, || async { Ok(1u8) }).await.unwrap();
    client.invalidate(&key).unwrap();

    tx.send(NetworkState::offline()).unwrap();
    let calls = AtomicU32::new(0);
    let result = client
      .fetch(&key, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(2u8)
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, 1u8);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let missing = client
      .fetch(&QueryKey::dashboard("u9"), || async { Ok(0u8) })
      .await;
    assert!(missing.is_err());
  }

  #[tokio::test]
  async fn test_offline_first_category_serves_stale() {
    let (_tx, rx) = watch::channel(NetworkState::online(None));
    let mut overrides = HashMap::new();
    overrides.insert(
      "frequent".to_string(),
      StrategyOverride {
        offline_first: Some(true),
        ..Default::default()
      },
    );
    let client = QueryClient::new(
      CacheStore::new(),
      StrategyTable::with_overrides(&overrides),
      rx,
    );
    let key = QueryKey::dashboard("u1");
    client.fetch(&key, || async { Ok(5u8) }).await.unwrap();
    client.invalidate(&key).unwrap();

    let result = client
      .fetch(&key, || async { Ok(6u8) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheStale);
    assert_eq!(result.data, 5);
  }
}
