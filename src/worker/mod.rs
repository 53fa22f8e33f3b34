//! Request-intercepting cache running in its own task.
//!
//! The rest of the program only reaches it through a [`WorkerHandle`]:
//! fetches and control messages go over an mpsc channel and every request
//! carries a oneshot port for its reply.

pub mod bucket;
pub mod http;
pub mod routing;
pub mod strategies;

#[cfg(test)]
pub(crate) mod testing;

pub use bucket::BucketStorage;
pub use http::{Fetch, HttpFetch, Request, Response};
pub use routing::{Route, Router};
pub use strategies::StrategyRunner;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Application shell cached on install.
pub const PRECACHE_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/static/css/main.css",
  "/static/js/main.js",
  "/manifest.json",
];

#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Origin the worker controls
  pub scope: Url,
  pub version: String,
  pub precache: Vec<String>,
  pub blocked_hosts: Vec<String>,
}

impl WorkerConfig {
  pub fn new(scope: Url) -> Self {
    Self {
      scope,
      version: "v1".to_string(),
      precache: PRECACHE_MANIFEST.iter().map(|s| s.to_string()).collect(),
      blocked_hosts: routing::DEFAULT_BLOCKED_HOSTS
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }

  pub fn static_bucket(&self) -> String {
    format!("sigwatch-static-{}", self.version)
  }

  pub fn dynamic_bucket(&self) -> String {
    format!("sigwatch-dynamic-{}", self.version)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Parsed,
  /// Installed but an older worker may still be in charge
  Waiting,
  Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearCacheReply {
  pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "CACHE_SIZE")]
pub struct CacheSizeReply {
  pub size: u64,
}

#[derive(Debug)]
pub enum WorkerMessage {
  Fetch {
    request: Request,
    reply: oneshot::Sender<Response>,
  },
  SkipWaiting,
  ClearCache {
    reply: oneshot::Sender<ClearCacheReply>,
  },
  GetCacheSize {
    reply: oneshot::Sender<CacheSizeReply>,
  },
}

/// Answers one intercepted request. Cloned into a task per fetch so a slow
/// upstream never holds up control messages.
#[derive(Clone)]
struct FetchHandler {
  router: Router,
  runner: StrategyRunner,
  network: Arc<dyn Fetch>,
  buckets: BucketStorage,
}

impl FetchHandler {
  /// Always produces a response; failures become degraded answers.
  async fn handle(&self, request: Request) -> Response {
    let url = request.url.clone();
    let result = match self.router.route(&request) {
      Route::Blocked => {
        debug!(%url, "Blocked image host");
        return Response::forbidden();
      }
      Route::Passthrough(reason) => {
        debug!(%url, ?reason, "Passing through");
        self.network.fetch(request).await
      }
      Route::Cached(strategy) => self.runner.run(strategy, request).await,
    };

    result.unwrap_or_else(|e| {
      warn!(%url, error = %e, "Fetch failed, answering degraded");
      self.degraded(&url, &e.to_string())
    })
  }

  /// Straight to the network, for requests that arrive before activation.
  async fn passthrough(&self, request: Request) -> Response {
    let url = request.url.clone();
    self.network.fetch(request).await.unwrap_or_else(|e| {
      warn!(%url, error = %e, "Fetch failed before activation, answering degraded");
      self.degraded(&url, &e.to_string())
    })
  }

  fn degraded(&self, url: &Url, error: &str) -> Response {
    if routing::is_api_path(url) {
      return Response::degraded(error);
    }
    // documents fall back to the cached shell
    let shell = self
      .router
      .scope()
      .join("/")
      .ok()
      .and_then(|root| self.buckets.match_any(&root).ok().flatten());
    shell.unwrap_or_else(|| {
      Response::new(503, "Offline - content not available")
        .with_header("content-type", "text/plain")
    })
  }
}

pub struct ServiceWorker {
  config: WorkerConfig,
  network: Arc<dyn Fetch>,
  buckets: BucketStorage,
  lifecycle: Lifecycle,
  /// `SkipWaiting` arrived before install finished
  skip_requested: bool,
  handler: FetchHandler,
}

/// Fetch the manifest into the static bucket. Entries that cannot be fetched
/// are skipped with a warning.
async fn precache(
  config: WorkerConfig,
  network: Arc<dyn Fetch>,
  buckets: BucketStorage,
) -> Result<usize> {
  let bucket = config.static_bucket();
  let mut cached = 0;

  for path in &config.precache {
    let url = config
      .scope
      .join(path)
      .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))?;
    match network.fetch(Request::get(url.clone())).await {
      Ok(response) if response.is_success() => {
        buckets.put(&bucket, &url, &response)?;
        cached += 1;
      }
      Ok(response) => warn!(%url, status = response.status, "Precache entry not available"),
      Err(e) => warn!(%url, error = %e, "Failed to precache"),
    }
  }

  info!(cached, total = config.precache.len(), bucket = %bucket, "Worker installed");
  Ok(cached)
}

impl ServiceWorker {
  pub fn new(config: WorkerConfig, network: Arc<dyn Fetch>, buckets: BucketStorage) -> Self {
    let router = Router::new(config.scope.clone(), config.blocked_hosts.clone());
    let runner = StrategyRunner::new(network.clone(), buckets.clone(), config.dynamic_bucket());
    let handler = FetchHandler {
      router,
      runner,
      network: network.clone(),
      buckets: buckets.clone(),
    };
    Self {
      config,
      network,
      buckets,
      lifecycle: Lifecycle::Parsed,
      skip_requested: false,
      handler,
    }
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  /// Pre-cache the shell into the static bucket. The worker then waits
  /// for `SkipWaiting` unless one already arrived.
  pub async fn install(&mut self) -> Result<usize> {
    let cached = precache(
      self.config.clone(),
      Arc::clone(&self.network),
      self.buckets.clone(),
    )
    .await?;
    self.installed()?;
    Ok(cached)
  }

  fn installed(&mut self) -> Result<()> {
    self.lifecycle = Lifecycle::Waiting;
    if self.skip_requested {
      self.skip_waiting()?;
    }
    Ok(())
  }

  /// Delete every bucket that does not belong to this version.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    let current = [self.config.static_bucket(), self.config.dynamic_bucket()];
    let mut deleted = Vec::new();

    for name in self.buckets.bucket_names()? {
      if current.contains(&name) {
        continue;
      }
      self.buckets.delete_bucket(&name)?;
      info!(bucket = %name, "Deleted outdated bucket");
      deleted.push(name);
    }

    self.lifecycle = Lifecycle::Active;
    Ok(deleted)
  }

  pub fn skip_waiting(&mut self) -> Result<()> {
    match self.lifecycle {
      Lifecycle::Parsed => self.skip_requested = true,
      Lifecycle::Waiting => {
        self.activate()?;
      }
      Lifecycle::Active => {}
    }
    Ok(())
  }

  pub async fn handle_fetch(&self, request: Request) -> Response {
    self.handler.handle(request).await
  }

  pub fn clear_cache(&self) -> ClearCacheReply {
    match self.buckets.clear() {
      Ok(()) => {
        info!("Worker cache cleared");
        ClearCacheReply { success: true }
      }
      Err(e) => {
        warn!(error = %e, "Failed to clear worker cache");
        ClearCacheReply { success: false }
      }
    }
  }

  pub fn cache_size(&self) -> CacheSizeReply {
    let size = self.buckets.size().unwrap_or_else(|e| {
      warn!(error = %e, "Failed to compute cache size");
      0
    });
    CacheSizeReply { size }
  }

  fn on_message(&mut self, message: WorkerMessage) {
    match message {
      WorkerMessage::Fetch { request, reply } => {
        let handler = self.handler.clone();
        let active = self.lifecycle == Lifecycle::Active;
        tokio::spawn(async move {
          let response = if active {
            handler.handle(request).await
          } else {
            handler.passthrough(request).await
          };
          let _ = reply.send(response);
        });
      }
      WorkerMessage::SkipWaiting => {
        if let Err(e) = self.skip_waiting() {
          warn!(error = %e, "Failed to activate worker");
        }
      }
      WorkerMessage::ClearCache { reply } => {
        let _ = reply.send(self.clear_cache());
      }
      WorkerMessage::GetCacheSize { reply } => {
        let _ = reply.send(self.cache_size());
      }
    }
  }

  /// Serve messages until every handle is dropped. A worker that was not
  /// installed yet installs in the background; fetches that arrive before
  /// activation go straight to the network.
  pub fn spawn(mut self) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
      let mut installing = self.lifecycle == Lifecycle::Parsed;
      let install = precache(
        self.config.clone(),
        Arc::clone(&self.network),
        self.buckets.clone(),
      );
      tokio::pin!(install);

      loop {
        tokio::select! {
          result = &mut install, if installing => {
            installing = false;
            if let Err(e) = result.and_then(|_| self.installed()) {
              warn!(error = %e, "Worker install failed");
            }
          }
          message = rx.recv() => match message {
            Some(message) => self.on_message(message),
            None => break,
          },
        }
      }
      debug!("Worker stopped");
    });
    (WorkerHandle { tx }, task)
  }
}

/// Page-side end of the worker channel.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
  fn send(&self, message: WorkerMessage) -> Result<()> {
    self
      .tx
      .send(message)
      .map_err(|_| eyre!("Service worker is not running"))
  }

  pub async fn fetch(&self, request: Request) -> Result<Response> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerMessage::Fetch { request, reply })?;
    rx.await.map_err(|_| eyre!("Service worker dropped the request"))
  }

  pub fn skip_waiting(&self) -> Result<()> {
    self.send(WorkerMessage::SkipWaiting)
  }

  pub async fn clear_cache(&self) -> Result<ClearCacheReply> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerMessage::ClearCache { reply })?;
    rx.await.map_err(|_| eyre!("Service worker dropped the request"))
  }

  pub async fn cache_size(&self) -> Result<u64> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerMessage::GetCacheSize { reply })?;
    let reply = rx
      .await
      .map_err(|_| eyre!("Service worker dropped the request"))?;
    Ok(reply.size)
  }
}

impl Fetch for WorkerHandle {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
    let handle = self.clone();
    Box::pin(async move { WorkerHandle::fetch(&handle, request).await })
  }
}
