//! Decides how the worker treats each request.

use url::Url;

use super::http::Request;

/// Caching strategy applied to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  NetworkFirst,
  CacheFirst,
  StaleWhileRevalidate,
}

/// Why a request was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
  NotGet,
  CrossOrigin,
  Image,
  /// `/api/*` on a local development host
  DevApi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Straight to the network, nothing cached
  Passthrough(Bypass),
  /// Known-problematic host; answered with a synthesized 403
  Blocked,
  Cached(Strategy),
}

/// API path prefixes with a fixed strategy. Unlisted `/api/*` paths are
/// network-first.
const API_ROUTES: &[(&str, Strategy)] = &[
  ("/api/signals", Strategy::NetworkFirst),
  ("/api/coins", Strategy::NetworkFirst),
  ("/api/health", Strategy::NetworkFirst),
  ("/api/news", Strategy::StaleWhileRevalidate),
  ("/api/whale", Strategy::StaleWhileRevalidate),
];

const IMAGE_EXTENSIONS: &[&str] = &[
  ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".avif",
];

const DEV_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]", "::1"];

/// Image hosts that fail cross-origin fetches.
pub const DEFAULT_BLOCKED_HOSTS: &[&str] = &[
  "assets.coingecko.com",
  "coin-images.coingecko.com",
  "s2.coinmarketcap.com",
  "cryptologos.cc",
];

#[derive(Debug, Clone)]
pub struct Router {
  scope: Url,
  blocked_hosts: Vec<String>,
}

impl Router {
  pub fn new(scope: Url, blocked_hosts: Vec<String>) -> Self {
    Self {
      scope,
      blocked_hosts: blocked_hosts
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect(),
    }
  }

  pub fn scope(&self) -> &Url {
    &self.scope
  }

  pub fn route(&self, request: &Request) -> Route {
    let url = &request.url;

    if !request.is_get() {
      return Route::Passthrough(Bypass::NotGet);
    }
    if self.is_blocked_host(url) {
      return Route::Blocked;
    }
    if url.origin() != self.scope.origin() {
      return Route::Passthrough(Bypass::CrossOrigin);
    }

    let path = url.path().to_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
      return Route::Passthrough(Bypass::Image);
    }

    let is_api = path.starts_with("/api/");
    if is_api && self.is_dev_host() {
      return Route::Passthrough(Bypass::DevApi);
    }

    if is_api {
      let strategy = API_ROUTES
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map(|(_, s)| *s)
        .unwrap_or(Strategy::NetworkFirst);
      return Route::Cached(strategy);
    }

    Route::Cached(Strategy::CacheFirst)
  }

  fn is_blocked_host(&self, url: &Url) -> bool {
    let Some(host) = url.host_str() else {
      return false;
    };
    let host = host.to_lowercase();
    self
      .blocked_hosts
      .iter()
      .any(|blocked| host == *blocked || host.ends_with(&format!(".{}", blocked)))
  }

  fn is_dev_host(&self) -> bool {
    self
      .scope
      .host_str()
      .is_some_and(|host| DEV_HOSTS.contains(&host))
  }
}

/// Whether `path` is served by the API rather than as a static asset.
pub fn is_api_path(url: &Url) -> bool {
  url.path().starts_with("/api/")
}
