//! Per-key polling tasks.
//!
//! Each active key owns one tokio task. A task waits for the network, then
//! ticks on the key's category `refetch_interval`: snapshot the cached value,
//! refetch, diff, notify. A tick runs to completion before the next one
//! starts and missed ticks are skipped, so a diff never races a later tick of
//! the same key.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::diff;
use crate::cache::{QueryClient, QueryKey};
use crate::notify::{Notification, Notifier};

type FetchFn<P> = Arc<dyn Fn() -> BoxFuture<'static, Result<P>> + Send + Sync>;
type ItemsFn<P, T> = Arc<dyn Fn(&P) -> Vec<T> + Send + Sync>;
type IdFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
type AnnounceFn<T> = Arc<dyn Fn(&T) -> Notification + Send + Sync>;
type ChangeFn<T> = Arc<dyn Fn(&T, &T) -> Option<Notification> + Send + Sync>;
type NewItemsFn<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

/// What to poll for one key and how to interpret the results.
///
/// `P` is the fetched payload as cached; `T` is the entity type compared
/// between snapshots, identified by the extractor given at construction.
pub struct Watch<P, T> {
  key: QueryKey,
  fetch: FetchFn<P>,
  items: ItemsFn<P, T>,
  identify: IdFn<T>,
  announce: Option<AnnounceFn<T>>,
  on_change: Option<ChangeFn<T>>,
  on_new: Option<NewItemsFn<T>>,
}

impl<T> Watch<Vec<T>, T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Watch a key whose payload is itself the list of entities.
  pub fn list<F, Fut, I>(key: QueryKey, fetch: F, identify: I) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    I: Fn(&T) -> String + Send + Sync + 'static,
  {
    Self::new(key, fetch, |payload: &Vec<T>| payload.clone(), identify)
  }
}

impl<P, T> Watch<P, T>
where
  P: 'static,
  T: 'static,
{
  pub fn new<F, Fut, X, I>(key: QueryKey, fetch: F, items: X, identify: I) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<P>> + Send + 'static,
    X: Fn(&P) -> Vec<T> + Send + Sync + 'static,
    I: Fn(&T) -> String + Send + Sync + 'static,
  {
    Self {
      key,
      fetch: Arc::new(move || -> BoxFuture<'static, Result<P>> { Box::pin(fetch()) }),
      items: Arc::new(items),
      identify: Arc::new(identify),
      announce: None,
      on_change: None,
      on_new: None,
    }
  }

  /// Build the notification raised for each newly appeared entity.
  pub fn announce(mut self, f: impl Fn(&T) -> Notification + Send + Sync + 'static) -> Self {
    self.announce = Some(Arc::new(f));
    self
  }

  /// Inspect entities present in both snapshots; return a notification to raise one.
  pub fn on_change(
    mut self,
    f: impl Fn(&T, &T) -> Option<Notification> + Send + Sync + 'static,
  ) -> Self {
    self.on_change = Some(Arc::new(f));
    self
  }

  /// Called once per tick with all newly appeared entities, if any.
  pub fn on_new(mut self, f: impl Fn(&[T]) + Send + Sync + 'static) -> Self {
    self.on_new = Some(Arc::new(f));
    self
  }
}

/// Refresh requests for one task. A request is satisfied by any tick that
/// starts after it was made, so a wake that lands while the task is still
/// offline or already fetching does not cause a second fetch.
#[derive(Default)]
struct Wake {
  notify: Notify,
  requested: AtomicU64,
}

impl Wake {
  fn request(&self) {
    self.requested.fetch_add(1, Ordering::SeqCst);
    self.notify.notify_one();
  }

  fn generation(&self) -> u64 {
    self.requested.load(Ordering::SeqCst)
  }
}

struct Task {
  handle: JoinHandle<()>,
  wake: Arc<Wake>,
}

struct Inner {
  client: QueryClient,
  notifier: Notifier,
  tasks: Mutex<HashMap<QueryKey, Task>>,
}

impl Drop for Inner {
  fn drop(&mut self) {
    if let Ok(tasks) = self.tasks.get_mut() {
      for (_, task) in tasks.drain() {
        task.handle.abort();
      }
    }
  }
}

/// Owns the polling tasks. Cloning shares the registry; dropping the last
/// clone cancels every task.
#[derive(Clone)]
pub struct RefreshCoordinator {
  inner: Arc<Inner>,
}

impl RefreshCoordinator {
  pub fn new(client: QueryClient, notifier: Notifier) -> Self {
    Self {
      inner: Arc::new(Inner {
        client,
        notifier,
        tasks: Mutex::new(HashMap::new()),
      }),
    }
  }

  fn tasks(&self) -> Result<MutexGuard<'_, HashMap<QueryKey, Task>>> {
    self
      .inner
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Start polling `watch.key`, replacing any task already polling it.
  ///
  /// Fails if the key's category has no refetch interval.
  pub fn start<P, T>(&self, watch: Watch<P, T>) -> Result<()>
  where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
  {
    let key = watch.key.clone();
    let strategy = self.inner.client.strategies().get(key.category());
    let every = strategy
      .refetch_interval
      .ok_or_else(|| eyre!("{} ({}) is not a polled category", key, key.category().name()))?;

    let mut tasks = self.tasks()?;
    match tasks.remove(&key) {
      Some(previous) => {
        previous.handle.abort();
        debug!(key = %key, "Replaced existing polling task");
      }
      None => self.inner.client.store().observe(&key)?,
    }

    let wake = Arc::new(Wake::default());
    let handle = tokio::spawn(poll_loop(
      self.inner.client.clone(),
      self.inner.notifier.clone(),
      watch,
      every,
      Arc::clone(&wake),
    ));
    tasks.insert(key.clone(), Task { handle, wake });
    info!(key = %key, interval = ?every, "Started polling");
    Ok(())
  }

  /// Stop polling one key. Returns whether it was active.
  pub fn stop(&self, key: &QueryKey) -> Result<bool> {
    let removed = self.tasks()?.remove(key);
    match removed {
      Some(task) => {
        task.handle.abort();
        self.inner.client.store().release(key)?;
        info!(key = %key, "Stopped polling");
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Stop every polling task and clear the registry.
  pub fn stop_all(&self) -> Result<()> {
    let drained: Vec<(QueryKey, Task)> = self.tasks()?.drain().collect();
    for (key, task) in drained {
      task.handle.abort();
      self.inner.client.store().release(&key)?;
    }
    info!("Stopped all polling");
    Ok(())
  }

  /// Run an immediate tick for every active key matching `pattern`.
  pub fn refresh_now(&self, pattern: &QueryKey) -> Result<usize> {
    let tasks = self.tasks()?;
    let mut count = 0;
    for (_, task) in tasks.iter().filter(|(k, _)| pattern.matches(k)) {
      task.wake.request();
      count += 1;
    }
    Ok(count)
  }

  pub fn is_active(&self, key: &QueryKey) -> bool {
    self
      .tasks()
      .map(|tasks| tasks.get(key).is_some_and(|t| !t.handle.is_finished()))
      .unwrap_or(false)
  }

  pub fn active_keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self
      .tasks()
      .map(|tasks| tasks.keys().cloned().collect())
      .unwrap_or_default();
    keys.sort();
    keys
  }
}

async fn poll_loop<P, T>(
  client: QueryClient,
  notifier: Notifier,
  watch: Watch<P, T>,
  every: Duration,
  wake: Arc<Wake>,
) where
  P: Serialize + DeserializeOwned + Send + Sync + 'static,
  T: Clone + Send + Sync + 'static,
{
  // New pollers don't start while offline
  let mut network = client.network();
  let watching = network.wait_for(|state| state.is_online).await.is_ok();
  if !watching {
    debug!(key = %watch.key, "Network state channel closed; polling anyway");
  }

  let mut ticker = tokio::time::interval(every);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

  let mut handled = 0;
  loop {
    tokio::select! {
      _ = ticker.tick() => {}
      _ = wake.notify.notified() => {
        if wake.generation() == handled {
          continue;
        }
        ticker.reset();
      }
    }
    handled = wake.generation();

    match tick(&client, &notifier, &watch).await {
      Ok(0) => {}
      Ok(n) => debug!(key = %watch.key, new_items = n, "Tick found new items"),
      Err(e) => warn!(key = %watch.key, error = %e, "Refresh tick failed; retrying next interval"),
    }
  }
}

/// One refresh: snapshot, refetch, diff, notify. Returns the number of new items.
async fn tick<P, T>(client: &QueryClient, notifier: &Notifier, watch: &Watch<P, T>) -> Result<usize>
where
  P: Serialize + DeserializeOwned,
  T: Clone,
{
  let previous: Option<P> = client.read(&watch.key).unwrap_or_else(|e| {
    warn!(key = %watch.key, error = %e, "Discarding undecodable snapshot");
    None
  });

  let fetch = Arc::clone(&watch.fetch);
  let current: P = client.refetch(&watch.key, move || fetch()).await?;

  let Some(previous) = previous else {
    return Ok(0);
  };

  let old = (watch.items)(&previous);
  let new = (watch.items)(&current);
  let id = |item: &T| (watch.identify)(item);

  let fresh: Vec<T> = diff::new_items(&old, &new, id)
    .into_iter()
    .cloned()
    .collect();

  if let Some(announce) = &watch.announce {
    for item in &fresh {
      notifier.notify(announce(item));
    }
  }

  if let Some(on_change) = &watch.on_change {
    for (before, after) in diff::common_items(&old, &new, id) {
      if let Some(notification) = on_change(before, after) {
        notifier.notify(notification);
      }
    }
  }

  if !fresh.is_empty() {
    if let Some(on_new) = &watch.on_new {
      on_new(&fresh);
    }
  }

  Ok(fresh.len())
}
