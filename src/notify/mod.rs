//! Notification service used by the refresh coordinator and network monitor.
//!
//! The [`Notifier`] is constructed once and cloned into whoever needs to raise
//! notifications. Delivery never fails back into the caller: listeners that
//! lag or vanish, muted kinds and persistence errors are logged and dropped.

mod history;
mod types;

pub use history::{NotificationHistory, DEFAULT_MAX_HISTORY};
pub use types::{Action, Notification, NotificationKind, NotificationSettings, Priority};

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::db::KvStore;

const SETTINGS_KEY: &str = "notification-settings";
const HISTORY_KEY: &str = "notification-history";

struct Inner {
  settings: NotificationSettings,
  history: NotificationHistory,
}

/// Shared, cloneable notification emitter.
#[derive(Clone)]
pub struct Notifier {
  inner: Arc<Mutex<Inner>>,
  tx: broadcast::Sender<Notification>,
  kv: Option<KvStore>,
}

impl Notifier {
  /// In-memory notifier with default settings.
  pub fn new() -> Self {
    Self::with_settings(NotificationSettings::default())
  }

  pub fn with_settings(settings: NotificationSettings) -> Self {
    let (tx, _) = broadcast::channel(64);
    let history = NotificationHistory::new(settings.max_history);
    Self {
      inner: Arc::new(Mutex::new(Inner { settings, history })),
      tx,
      kv: None,
    }
  }

  /// Notifier backed by persisted settings and history.
  ///
  /// Missing or corrupt stored values fall back to defaults.
  pub fn persistent(kv: KvStore) -> Self {
    let settings = match kv.get_json::<NotificationSettings>(SETTINGS_KEY) {
      Ok(Some(s)) => s,
      Ok(None) => NotificationSettings::default(),
      Err(e) => {
        warn!(error = %e, "Stored notification settings unreadable, using defaults");
        NotificationSettings::default()
      }
    };

    let mut history = NotificationHistory::new(settings.max_history);
    match kv.get_json::<Vec<Notification>>(HISTORY_KEY) {
      Ok(Some(items)) => history.extend(items),
      Ok(None) => {}
      Err(e) => warn!(error = %e, "Stored notification history unreadable, starting empty"),
    }

    let (tx, _) = broadcast::channel(64);
    Self {
      inner: Arc::new(Mutex::new(Inner { settings, history })),
      tx,
      kv: Some(kv),
    }
  }

  /// Listen for notifications as they are emitted.
  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.tx.subscribe()
  }

  /// Emit a notification.
  ///
  /// History is persisted while the state lock is held so stored snapshots
  /// land in the same order they were taken.
  pub fn notify(&self, notification: Notification) {
    {
      let Ok(mut inner) = self.inner.lock() else {
        warn!("Notifier state poisoned, dropping notification");
        return;
      };
      if !inner.settings.allows(notification.kind) {
        debug!(kind = ?notification.kind, title = %notification.title, "Notification muted");
        return;
      }
      inner.history.push(notification.clone());

      if let Some(kv) = &self.kv {
        if let Err(e) = kv.put_json(HISTORY_KEY, &inner.history.to_vec()) {
          warn!(error = %e, "Failed to persist notification history");
        }
      }
    }

    debug!(kind = ?notification.kind, title = %notification.title, "Notification emitted");
    // No receivers is not an error
    let _ = self.tx.send(notification);
  }

  pub fn success(&self, title: &str, message: &str) {
    self.notify(Notification::new(NotificationKind::Success, title, message));
  }

  pub fn warning(&self, title: &str, message: &str) {
    self.notify(Notification::new(NotificationKind::Warning, title, message));
  }

  pub fn info(&self, title: &str, message: &str) {
    self.notify(Notification::new(NotificationKind::Info, title, message));
  }

  /// Most recent notifications, oldest first.
  pub fn history(&self) -> Vec<Notification> {
    self
      .inner
      .lock()
      .map(|inner| inner.history.to_vec())
      .unwrap_or_default()
  }

  pub fn clear_history(&self) {
    if let Ok(mut inner) = self.inner.lock() {
      inner.history.clear();
    }
    if let Some(kv) = &self.kv {
      if let Err(e) = kv.delete(HISTORY_KEY) {
        warn!(error = %e, "Failed to clear stored notification history");
      }
    }
  }

  pub fn settings(&self) -> NotificationSettings {
    self
      .inner
      .lock()
      .map(|inner| inner.settings.clone())
      .unwrap_or_default()
  }

  /// Replace the settings, resizing history and persisting when backed by storage.
  pub fn update_settings(&self, settings: NotificationSettings) {
    if let Ok(mut inner) = self.inner.lock() {
      inner.history.set_capacity(settings.max_history);
      inner.settings = settings.clone();
    }
    if let Some(kv) = &self.kv {
      if let Err(e) = kv.put_json(SETTINGS_KEY, &settings) {
        warn!(error = %e, "Failed to persist notification settings");
      }
    }
  }
}

impl Default for Notifier {
  fn default() -> Self {
    Self::new()
  }
}
