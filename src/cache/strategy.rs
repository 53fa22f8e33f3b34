//! Per-category caching profiles.
//!
//! The table is the single source of truth for both staleness and polling
//! cadence: the refresh coordinator reads `refetch_interval` from here rather
//! than keeping its own timers per resource.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Freshness classes that resources are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
  Realtime,
  Frequent,
  Moderate,
  Static,
  OfflineFirst,
}

impl Category {
  pub const ALL: [Category; 5] = [
    Category::Realtime,
    Category::Frequent,
    Category::Moderate,
    Category::Static,
    Category::OfflineFirst,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Self::Realtime => "realtime",
      Self::Frequent => "frequent",
      Self::Moderate => "moderate",
      Self::Static => "static",
      Self::OfflineFirst => "offline-first",
    }
  }

  /// Parse a category name (case-insensitive, `_` and `-` interchangeable).
  pub fn from_name(name: &str) -> Option<Self> {
    let name = name.trim().to_lowercase().replace('_', "-");
    Self::ALL.into_iter().find(|c| c.name() == name)
  }
}

/// Whether a category may go to the network when data is missing or stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
  /// Fetch whenever the data is stale.
  Online,
  /// Serve whatever is cached and only fetch on a miss.
  OfflineFirst,
}

/// Staleness, eviction and polling settings for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStrategy {
  /// After this, data is stale and eligible for a background refetch.
  pub stale_time: Duration,
  /// After this with no observers, the entry is evicted.
  pub gc_time: Duration,
  /// Fixed polling period, if the category is polled at all.
  pub refetch_interval: Option<Duration>,
  /// Whether the category is refetched in bulk after a reconnect.
  pub refetch_on_reconnect: bool,
  pub network_mode: NetworkMode,
}

const fn secs(n: u64) -> Duration {
  Duration::from_secs(n)
}

impl CacheStrategy {
  pub const REALTIME: CacheStrategy = CacheStrategy {
    stale_time: secs(30),
    gc_time: secs(5 * 60),
    refetch_interval: Some(secs(10)),
    refetch_on_reconnect: true,
    network_mode: NetworkMode::Online,
  };

  pub const FREQUENT: CacheStrategy = CacheStrategy {
    stale_time: secs(2 * 60),
    gc_time: secs(10 * 60),
    refetch_interval: Some(secs(30)),
    refetch_on_reconnect: true,
    network_mode: NetworkMode::Online,
  };

  pub const MODERATE: CacheStrategy = CacheStrategy {
    stale_time: secs(5 * 60),
    gc_time: secs(30 * 60),
    refetch_interval: Some(secs(60)),
    refetch_on_reconnect: true,
    network_mode: NetworkMode::Online,
  };

  pub const STATIC: CacheStrategy = CacheStrategy {
    stale_time: secs(60 * 60),
    gc_time: secs(24 * 60 * 60),
    refetch_interval: None,
    refetch_on_reconnect: true,
    network_mode: NetworkMode::Online,
  };

  pub const OFFLINE_FIRST: CacheStrategy = CacheStrategy {
    stale_time: secs(10 * 60),
    gc_time: secs(24 * 60 * 60),
    refetch_interval: None,
    refetch_on_reconnect: false,
    network_mode: NetworkMode::OfflineFirst,
  };

  pub fn default_for(category: Category) -> Self {
    match category {
      Category::Realtime => Self::REALTIME,
      Category::Frequent => Self::FREQUENT,
      Category::Moderate => Self::MODERATE,
      Category::Static => Self::STATIC,
      Category::OfflineFirst => Self::OFFLINE_FIRST,
    }
  }

  fn apply(mut self, overrides: &StrategyOverride) -> Self {
    if let Some(s) = overrides.stale_secs {
      self.stale_time = secs(s);
    }
    if let Some(s) = overrides.gc_secs {
      self.gc_time = secs(s);
    }
    if let Some(s) = overrides.refetch_interval_secs {
      self.refetch_interval = if s == 0 { None } else { Some(secs(s)) };
    }
    if let Some(b) = overrides.refetch_on_reconnect {
      self.refetch_on_reconnect = b;
    }
    if let Some(offline_first) = overrides.offline_first {
      self.network_mode = if offline_first {
        NetworkMode::OfflineFirst
      } else {
        NetworkMode::Online
      };
    }
    self
  }
}

/// Optional per-category overrides read from the config file. Times are in
/// seconds; a refetch interval of 0 disables polling.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyOverride {
  pub stale_secs: Option<u64>,
  pub gc_secs: Option<u64>,
  pub refetch_interval_secs: Option<u64>,
  pub refetch_on_reconnect: Option<bool>,
  pub offline_first: Option<bool>,
}

/// Lookup table from category to strategy.
#[derive(Debug, Clone)]
pub struct StrategyTable {
  strategies: HashMap<Category, CacheStrategy>,
}

impl Default for StrategyTable {
  fn default() -> Self {
    Self {
      strategies: Category::ALL
        .into_iter()
        .map(|c| (c, CacheStrategy::default_for(c)))
        .collect(),
    }
  }
}

impl StrategyTable {
  /// Build the table from defaults plus config overrides keyed by category
  /// name. Unknown names are logged and ignored.
  pub fn with_overrides(overrides: &HashMap<String, StrategyOverride>) -> Self {
    let mut table = Self::default();
    for (name, o) in overrides {
      let Some(category) = Category::from_name(name) else {
        warn!(category = %name, "Ignoring override for unknown cache category");
        continue;
      };
      let strategy = table.get(category).apply(o);
      if strategy.gc_time < strategy.stale_time {
        warn!(
          category = %name,
          "gc time is shorter than stale time; evicted data may be fresher than expected"
        );
      }
      table.strategies.insert(category, strategy);
    }
    table
  }

  pub fn get(&self, category: Category) -> CacheStrategy {
    self
      .strategies
      .get(&category)
      .copied()
      .unwrap_or(CacheStrategy::MODERATE)
  }

  /// Lookup by name. Anything unrecognised gets the moderate profile.
  pub fn by_name(&self, name: &str) -> CacheStrategy {
    Category::from_name(name)
      .map(|c| self.get(c))
      .unwrap_or_else(|| self.get(Category::Moderate))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unknown_category_falls_back_to_moderate() {
    let table = StrategyTable::default();
    let s = table.by_name("does-not-exist");
    assert_eq!(s, CacheStrategy::MODERATE);
    assert_eq!(s.stale_time, Duration::from_secs(300));
  }

  #[test]
  fn test_lookup_by_name_variants() {
    let table = StrategyTable::default();
    assert_eq!(table.by_name("REALTIME"), CacheStrategy::REALTIME);
    assert_eq!(table.by_name("offline_first"), CacheStrategy::OFFLINE_FIRST);
  }

  #[test]
  fn test_poll_cadence_comes_from_table() {
    let table = StrategyTable::default();
    assert_eq!(
      table.get(Category::Realtime).refetch_interval,
      Some(Duration::from_secs(10))
    );
    assert_eq!(
      table.get(Category::Frequent).refetch_interval,
      Some(Duration::from_secs(30))
    );
    assert_eq!(
      table.get(Category::Moderate).refetch_interval,
      Some(Duration::from_secs(60))
    );
    assert_eq!(table.get(Category::Static).refetch_interval, None);
  }

  #[test]
  fn test_gc_not_shorter_than_stale_by_default() {
    let table = StrategyTable::default();
    for c in Category::ALL {
      let s = table.get(c);
      assert!(s.gc_time >= s.stale_time, "{}", c.name());
    }
  }

  #[test]
  fn test_overrides() {
    let mut overrides = HashMap::new();
    overrides.insert(
      "realtime".to_string(),
      StrategyOverride {
        refetch_interval_secs: Some(5),
        ..Default::default()
      },
    );
    overrides.insert(
      "moderate".to_string(),
      StrategyOverride {
        refetch_interval_secs: Some(0),
        ..Default::default()
      },
    );
    overrides.insert("bogus".to_string(), StrategyOverride::default());

    let table = StrategyTable::with_overrides(&overrides);
    assert_eq!(
      table.get(Category::Realtime).refetch_interval,
      Some(Duration::from_secs(5))
    );
    assert_eq!(table.get(Category::Realtime).stale_time, Duration::from_secs(30));
    assert_eq!(table.get(Category::Moderate).refetch_interval, None);
  }
}
