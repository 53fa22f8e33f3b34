use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::StrategyOverride;
use crate::notify::DEFAULT_MAX_HISTORY;
use crate::worker::{routing::DEFAULT_BLOCKED_HOSTS, WorkerConfig, PRECACHE_MANIFEST};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub worker: WorkerSection,
  /// Per-category overrides keyed by category name (e.g. "realtime")
  pub strategies: HashMap<String, StrategyOverride>,
  pub notifications: NotificationsConfig,
  pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub user_id: String,
  /// Signal strategy passed to /api/signals
  pub strategy: String,
  pub timeout_secs: u64,
  /// Percent move between two coin list refreshes that raises a price alert
  pub price_alert_pct: f64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000".to_string(),
      user_id: "default".to_string(),
      strategy: "balanced".to_string(),
      timeout_secs: 30,
      price_alert_pct: crate::refresh::watches::DEFAULT_PRICE_MOVE_PCT,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
  pub cache_version: String,
  pub blocked_image_hosts: Vec<String>,
  pub precache: Vec<String>,
}

impl Default for WorkerSection {
  fn default() -> Self {
    Self {
      cache_version: "v1".to_string(),
      blocked_image_hosts: DEFAULT_BLOCKED_HOSTS.iter().map(|s| s.to_string()).collect(),
      precache: PRECACHE_MANIFEST.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub max_history: usize,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      max_history: DEFAULT_MAX_HISTORY,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  pub interval_secs: u64,
  pub timeout_secs: u64,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      interval_secs: 15,
      timeout_secs: 5,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sigwatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sigwatch/config.yaml
  ///
  /// With no file anywhere the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("sigwatch.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sigwatch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", self.api.base_url, e))
  }

  pub fn worker_config(&self) -> Result<WorkerConfig> {
    let mut worker = WorkerConfig::new(self.base_url()?);
    worker.version = self.worker.cache_version.clone();
    worker.precache = self.worker.precache.clone();
    worker.blocked_hosts = self.worker.blocked_image_hosts.clone();
    Ok(worker)
  }

  /// Bearer token for the API, if one is set in SIGWATCH_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SIGWATCH_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_is_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.worker.cache_version, "v1");
    assert_eq!(config.notifications.max_history, 100);
    assert!(config.strategies.is_empty());
  }

  #[test]
  fn test_partial_sections() {
    let config = Config::parse(
      r#"
api:
  base_url: https://trade.example.com
  user_id: alice
worker:
  cache_version: v3
strategies:
  realtime:
    refetch_interval_secs: 5
notifications:
  max_history: 20
"#,
    )
    .unwrap();

    assert_eq!(config.api.user_id, "alice");
    assert_eq!(config.api.strategy, "balanced");
    assert_eq!(config.notifications.max_history, 20);
    assert_eq!(
      config.strategies["realtime"].refetch_interval_secs,
      Some(5)
    );

    let worker = config.worker_config().unwrap();
    assert_eq!(worker.static_bucket(), "sigwatch-static-v3");
    assert_eq!(worker.scope.as_str(), "https://trade.example.com/");
    assert_eq!(worker.precache.len(), PRECACHE_MANIFEST.len());
  }

  #[test]
  fn test_missing_explicit_path_fails() {
    let err = Config::load(Some(Path::new("/nonexistent/sigwatch.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_invalid_base_url() {
    let config = Config::parse("api:\n  base_url: not a url\n").unwrap();
    assert!(config.base_url().is_err());
  }
}
