//! In-memory query cache keyed by [`QueryKey`].
//!
//! The store does no I/O. Fetching is the caller's job (see
//! [`super::QueryClient`] and the refresh coordinator).

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::key::QueryKey;
use super::strategy::StrategyTable;

/// Outcome of the most recent fetch for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  Pending,
  Success,
  Error,
}

/// A cached query result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: QueryKey,
  /// Last successfully fetched payload
  pub data: Option<Value>,
  pub status: QueryStatus,
  /// When `data` was last fetched successfully
  pub updated_at: Option<DateTime<Utc>>,
  /// Message from the last failed fetch, cleared on success
  pub error: Option<String>,
  /// Set by `invalidate`; data stays readable until replaced
  pub invalidated: bool,
  observers: usize,
  last_used: DateTime<Utc>,
}

impl CacheEntry {
  fn new(key: QueryKey, now: DateTime<Utc>) -> Self {
    Self {
      key,
      data: None,
      status: QueryStatus::Pending,
      updated_at: None,
      error: None,
      invalidated: false,
      observers: 0,
      last_used: now,
    }
  }

  /// Whether the data should be refetched before being trusted.
  pub fn is_stale(&self, stale_time: Duration, now: DateTime<Utc>) -> bool {
    if self.invalidated {
      return true;
    }
    match self.updated_at {
      Some(at) => age(at, now) > stale_time,
      None => true,
    }
  }

  pub fn observers(&self) -> usize {
    self.observers
  }
}

fn age(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
  (now - at).to_std().unwrap_or(Duration::ZERO)
}

/// Shared, cloneable handle to the query cache.
#[derive(Clone, Default)]
pub struct CacheStore {
  entries: Arc<Mutex<HashMap<QueryKey, CacheEntry>>>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<QueryKey, CacheEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    let mut entries = self.lock()?;
    Ok(entries.get_mut(key).map(|entry| {
      entry.last_used = Utc::now();
      entry.clone()
    }))
  }

  /// Record a fetch outcome for `key`.
  ///
  /// `Success` replaces the data and stamps `updated_at`. `Pending` and
  /// `Error` keep whatever data was there before; a `Some` payload passed
  /// with them is ignored.
  pub fn set(&self, key: &QueryKey, data: Option<Value>, status: QueryStatus) -> Result<()> {
    let now = Utc::now();
    let mut entries = self.lock()?;
    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone(), now));

    entry.status = status;
    entry.last_used = now;
    if status == QueryStatus::Success {
      entry.data = data;
      entry.updated_at = Some(now);
      entry.error = None;
      entry.invalidated = false;
    }
    Ok(())
  }

  /// Mark `key` as failed, keeping any previous data visible.
  pub fn set_error(&self, key: &QueryKey, error: impl ToString) -> Result<()> {
    self.set(key, None, QueryStatus::Error)?;
    if let Some(entry) = self.lock()?.get_mut(key) {
      entry.error = Some(error.to_string());
    }
    Ok(())
  }

  /// Mark every entry matching `pattern` stale. Data is kept.
  pub fn invalidate(&self, pattern: &QueryKey) -> Result<usize> {
    let mut entries = self.lock()?;
    let mut count = 0;
    for entry in entries.values_mut().filter(|e| pattern.matches(&e.key)) {
      entry.invalidated = true;
      count += 1;
    }
    Ok(count)
  }

  /// Delete every entry matching `pattern`.
  pub fn remove(&self, pattern: &QueryKey) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|k, _| !pattern.matches(k));
    Ok(before - entries.len())
  }

  pub fn clear(&self) -> Result<()> {
    self.lock()?.clear();
    Ok(())
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.lock()?.len())
  }

  /// Register interest in `key`; observed entries are never evicted.
  pub fn observe(&self, key: &QueryKey) -> Result<()> {
    let now = Utc::now();
    let mut entries = self.lock()?;
    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone(), now));
    entry.observers += 1;
    entry.last_used = now;
    Ok(())
  }

  pub fn release(&self, key: &QueryKey) -> Result<()> {
    if let Some(entry) = self.lock()?.get_mut(key) {
      entry.observers = entry.observers.saturating_sub(1);
      entry.last_used = Utc::now();
    }
    Ok(())
  }

  /// Evict unobserved entries idle for longer than their category's gc time.
  pub fn collect_garbage(&self, strategies: &StrategyTable, now: DateTime<Utc>) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|key, entry| {
      entry.observers > 0 || age(entry.last_used, now) <= strategies.get(key.category()).gc_time
    });
    Ok(before - entries.len())
  }
}
