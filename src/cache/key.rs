//! Composite query keys for the cache store.

use std::fmt;

use super::strategy::Category;

/// Kinds of remote resources the trading assistant reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
  Dashboard,
  TradingSignals,
  Recommendations,
  Coins,
  News,
  WhaleAlerts,
  Health,
  Settings,
}

impl Resource {
  /// Resources refreshed in bulk when the connection comes back.
  pub const IMPORTANT: [Resource; 4] = [
    Resource::TradingSignals,
    Resource::Recommendations,
    Resource::Coins,
    Resource::Dashboard,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Self::Dashboard => "dashboard",
      Self::TradingSignals => "trading-signals",
      Self::Recommendations => "recommendations",
      Self::Coins => "coins",
      Self::News => "news",
      Self::WhaleAlerts => "whale-alerts",
      Self::Health => "health",
      Self::Settings => "settings",
    }
  }

  /// Caching profile this resource is governed by.
  pub fn category(&self) -> Category {
    match self {
      Self::TradingSignals => Category::Realtime,
      Self::Dashboard | Self::Recommendations | Self::WhaleAlerts => Category::Frequent,
      Self::Coins | Self::News | Self::Health => Category::Moderate,
      Self::Settings => Category::Static,
    }
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Identifies one logical query: a resource plus its ordered parameters.
///
/// A key also works as a pattern. `QueryKey::resource(r)` matches every key
/// of `r`, and in general a pattern matches any key of the same resource whose
/// parameters start with the pattern's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  resource: Resource,
  params: Vec<String>,
}

impl QueryKey {
  /// A key (or pattern) with no parameters.
  pub fn resource(resource: Resource) -> Self {
    Self {
      resource,
      params: Vec::new(),
    }
  }

  /// Append a parameter. Absent optional parameters should still be pushed
  /// (as an empty string) so positions stay stable.
  pub fn with(mut self, param: impl Into<String>) -> Self {
    self.params.push(param.into());
    self
  }

  pub fn dashboard(user_id: &str) -> Self {
    Self::resource(Resource::Dashboard).with(user_id)
  }

  pub fn trading_signals(user_id: &str, strategy: &str) -> Self {
    Self::resource(Resource::TradingSignals)
      .with(user_id)
      .with(strategy)
  }

  pub fn recommendations(user_id: &str) -> Self {
    Self::resource(Resource::Recommendations).with(user_id)
  }

  pub fn coins(search: &str, sort_by: &str, sort_order: &str, filter_by: &str) -> Self {
    Self::resource(Resource::Coins)
      .with(search)
      .with(sort_by)
      .with(sort_order)
      .with(filter_by)
  }

  pub fn params(&self) -> &[String] {
    &self.params
  }

  pub fn category(&self) -> Category {
    self.resource.category()
  }

  /// Whether `self`, used as a pattern, covers `key`.
  pub fn matches(&self, key: &QueryKey) -> bool {
    self.resource == key.resource && key.params.starts_with(&self.params)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.resource)?;
    for param in &self.params {
      write!(f, ":{}", param)?;
    }
    Ok(())
  }
}
