use std::collections::VecDeque;

use super::types::Notification;

pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Bounded notification log. When full, the oldest entry is dropped.
#[derive(Debug, Clone)]
pub struct NotificationHistory {
  items: VecDeque<Notification>,
  capacity: usize,
}

impl NotificationHistory {
  pub fn new(capacity: usize) -> Self {
    Self {
      items: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_HISTORY)),
      capacity,
    }
  }

  pub fn push(&mut self, notification: Notification) {
    if self.capacity == 0 {
      return;
    }
    while self.items.len() >= self.capacity {
      self.items.pop_front();
    }
    self.items.push_back(notification);
  }

  /// Push in order, keeping only the newest `capacity` entries.
  pub fn extend(&mut self, notifications: impl IntoIterator<Item = Notification>) {
    for n in notifications {
      self.push(n);
    }
  }

  pub fn set_capacity(&mut self, capacity: usize) {
    self.capacity = capacity;
    while self.items.len() > capacity {
      self.items.pop_front();
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  /// Oldest first.
  pub fn to_vec(&self) -> Vec<Notification> {
    self.items.iter().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::NotificationKind;

  fn n(i: usize) -> Notification {
    Notification::new(NotificationKind::Info, format!("n{}", i), "")
  }

  #[test]
  fn test_fifo_eviction() {
    let mut history = NotificationHistory::new(DEFAULT_MAX_HISTORY);
    for i in 0..105 {
      history.push(n(i));
    }
    assert_eq!(history.len(), 100);
    let titles: Vec<_> = history.to_vec().into_iter().map(|n| n.title).collect();
    let expected: Vec<_> = (5..105).map(|i| format!("n{}", i)).collect();
    assert_eq!(titles, expected);
  }

  #[test]
  fn test_zero_capacity_keeps_nothing() {
    let mut history = NotificationHistory::new(0);
    history.push(n(1));
    assert!(history.is_empty());
  }

  #[test]
  fn test_extend_truncates_to_newest() {
    let mut history = NotificationHistory::new(2);
    history.extend((0..5).map(n));
    let titles: Vec<_> = history.to_vec().into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["n3", "n4"]);
  }
}
