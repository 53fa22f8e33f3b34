use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::history::DEFAULT_MAX_HISTORY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
  Success,
  Error,
  Warning,
  Info,
  TradingSignal,
  PriceAlert,
  NewsAlert,
  MarketUpdate,
}

impl NotificationKind {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Success => "success",
      Self::Error => "error",
      Self::Warning => "warning",
      Self::Info => "info",
      Self::TradingSignal => "trading-signal",
      Self::PriceAlert => "price-alert",
      Self::NewsAlert => "news-alert",
      Self::MarketUpdate => "market-update",
    }
  }

  /// How long the notification stays visible unless overridden.
  pub fn default_duration(&self) -> Duration {
    let secs = match self {
      Self::Success | Self::Info => 4,
      Self::MarketUpdate => 5,
      Self::Warning | Self::NewsAlert => 6,
      Self::Error | Self::PriceAlert => 8,
      Self::TradingSignal => 10,
    };
    Duration::from_secs(secs)
  }

  pub fn default_priority(&self) -> Priority {
    match self {
      Self::MarketUpdate => Priority::Low,
      Self::Success | Self::Info | Self::Warning | Self::NewsAlert => Priority::Normal,
      Self::Error | Self::PriceAlert | Self::TradingSignal => Priority::High,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  Normal,
  High,
  Critical,
}

/// A button-like follow-up attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
  pub label: String,
  /// Opaque identifier the presenter dispatches on (e.g. "view-signal:42")
  pub action: String,
}

impl Action {
  pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      action: action.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: String,
  pub kind: NotificationKind,
  pub title: String,
  pub message: String,
  #[serde(default)]
  pub actions: Vec<Action>,
  /// Display time in milliseconds
  pub duration_ms: u64,
  pub priority: Priority,
  pub created_at: DateTime<Utc>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl Notification {
  pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
    let created_at = Utc::now();
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    Self {
      id: format!("{}-{}", created_at.timestamp_millis(), seq),
      kind,
      title: title.into(),
      message: message.into(),
      actions: Vec::new(),
      duration_ms: kind.default_duration().as_millis() as u64,
      priority: kind.default_priority(),
      created_at,
    }
  }

  pub fn with_action(mut self, action: Action) -> Self {
    self.actions.push(action);
    self
  }

  pub fn with_duration(mut self, duration: Duration) -> Self {
    self.duration_ms = duration.as_millis() as u64;
    self
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }
}

/// User preferences for notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
  pub enabled: bool,
  pub sound: bool,
  pub vibration: bool,
  /// Kinds that are dropped without being recorded
  pub muted: BTreeSet<NotificationKind>,
  pub max_history: usize,
}

impl Default for NotificationSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      sound: true,
      vibration: false,
      muted: BTreeSet::new(),
      max_history: DEFAULT_MAX_HISTORY,
    }
  }
}

impl NotificationSettings {
  pub fn allows(&self, kind: NotificationKind) -> bool {
    self.enabled && !self.muted.contains(&kind)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_follow_kind() {
    let n = Notification::new(NotificationKind::TradingSignal, "BUY BTC", "");
    assert_eq!(n.priority, Priority::High);
    assert_eq!(n.duration_ms, 10_000);
  }

  #[test]
  fn test_overrides() {
    let n = Notification::new(NotificationKind::Info, "t", "m")
      .with_duration(Duration::from_millis(1500))
      .with_priority(Priority::Critical)
      .with_action(Action::new("View", "view:1"));
    assert_eq!(n.duration_ms, 1500);
    assert_eq!(n.priority, Priority::Critical);
    assert_eq!(n.actions.len(), 1);
  }

  #[test]
  fn test_ids_unique() {
    let a = Notification::new(NotificationKind::Info, "a", "");
    let b = Notification::new(NotificationKind::Info, "b", "");
    assert_ne!(a.id, b.id);
  }

  #[test]
  fn test_kind_serializes_kebab_case() {
    let json = serde_json::to_string(&NotificationKind::TradingSignal).unwrap();
    assert_eq!(json, "\"trading-signal\"");
  }

  #[test]
  fn test_disabled_blocks_everything() {
    let settings = NotificationSettings {
      enabled: false,
      ..Default::default()
    };
    assert!(!settings.allows(NotificationKind::Error));
  }

  #[test]
  fn test_partial_settings_deserialize_with_defaults() {
    let settings: NotificationSettings = serde_json::from_str(r#"{"sound": false}"#).unwrap();
    assert!(!settings.sound);
    assert!(settings.enabled);
    assert_eq!(settings.max_history, DEFAULT_MAX_HISTORY);
  }
}
