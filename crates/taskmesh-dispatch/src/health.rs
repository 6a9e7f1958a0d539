use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Temporary exclusion records for slow or unresponsive executors.
///
/// Entries expire on their own: an address whose `blacklisted_until` is in
/// the past is reported as not blacklisted and dropped on the next lookup.
/// The tracker never stops the network from assigning work to an address.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
  entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl HealthTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark `address` unavailable for `duration` from now.
  ///
  /// An existing longer exclusion is kept.
  pub fn blacklist(&self, address: &str, duration: Duration) {
    let until = Instant::now() + duration;
    let mut entries = self.lock();
    let entry = entries.entry(address.to_string()).or_insert(until);
    if *entry < until {
      *entry = until;
    }
  }

  pub fn is_blacklisted(&self, address: &str) -> bool {
    let now = Instant::now();
    let mut entries = self.lock();
    match entries.get(address) {
      Some(until) if *until > now => true,
      Some(_) => {
        entries.remove(address);
        false
      }
      None => false,
    }
  }

  pub fn blacklisted_until(&self, address: &str) -> Option<Instant> {
    let now = Instant::now();
    self
      .lock()
      .get(address)
      .copied()
      .filter(|until| *until > now)
  }

  /// Drop every expired entry. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|_, until| *until > now);
    before - entries.len()
  }

  /// Number of records held, expired or not.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn test_blacklist_expires() {
    let tracker = HealthTracker::new();
    tracker.blacklist("node-a", Duration::from_secs(10));

    assert!(tracker.is_blacklisted("node-a"));
    assert!(!tracker.is_blacklisted("node-b"));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(tracker.is_blacklisted("node-a"));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(!tracker.is_blacklisted("node-a"));
    assert!(tracker.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_shorter_blacklist_does_not_shorten() {
    let tracker = HealthTracker::new();
    tracker.blacklist("node-a", Duration::from_secs(60));
    tracker.blacklist("node-a", Duration::from_secs(5));

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(tracker.is_blacklisted("node-a"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_purge_expired() {
    let tracker = HealthTracker::new();
    tracker.blacklist("node-a", Duration::from_secs(1));
    tracker.blacklist("node-b", Duration::from_secs(100));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(tracker.purge_expired(), 1);
    assert_eq!(tracker.len(), 1);
    assert!(tracker.blacklisted_until("node-b").is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_clones_share_records() {
    let tracker = HealthTracker::new();
    let other = tracker.clone();

    other.blacklist("node-a", Duration::from_secs(1));
    assert!(tracker.is_blacklisted("node-a"));
  }
}
