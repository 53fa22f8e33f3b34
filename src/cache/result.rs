use chrono::{DateTime, Duration, Utc};

/// A query value plus where it was served from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Last successful update of the served entry; `None` for fresh fetches
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched during this call
  Network,
  /// Within the category's stale time
  CacheFresh,
  /// Past its stale time, served on purpose (offline-first category)
  CacheStale,
  /// Past its stale time, served because the network is down or failing
  Offline,
}

impl<T> CacheResult<T> {
  pub fn fetched(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      updated_at: None,
    }
  }

  pub fn cached(data: T, updated_at: DateTime<Utc>, stale: bool) -> Self {
    let source = if stale {
      CacheSource::CacheStale
    } else {
      CacheSource::CacheFresh
    };
    Self {
      data,
      source,
      updated_at: Some(updated_at),
    }
  }

  pub fn fallback(data: T, updated_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      updated_at: Some(updated_at),
    }
  }

  /// Whether the caller is looking at data older than its stale time.
  pub fn is_stale(&self) -> bool {
    matches!(self.source, CacheSource::CacheStale | CacheSource::Offline)
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    self
      .updated_at
      .map(|at| now - at)
      .unwrap_or_else(Duration::zero)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_staleness_by_source() {
    let now = Utc::now();
    assert!(!CacheResult::fetched(1).is_stale());
    assert!(!CacheResult::cached(1, now, false).is_stale());
    assert!(CacheResult::cached(1, now, true).is_stale());
    assert!(CacheResult::fallback(1, now).is_stale());
  }

  #[test]
  fn test_age() {
    let now = Utc::now();
    let result = CacheResult::fallback("x", now - Duration::minutes(3));
    assert_eq!(result.age(now), Duration::minutes(3));
    assert_eq!(CacheResult::fetched("x").age(now), Duration::zero());
  }
}
