//! In-memory fetch cache keyed by query key.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Type-erased cached payload.
pub(crate) type Payload = Arc<dyn Any + Send + Sync>;

/// A single cached response.
#[derive(Clone)]
pub struct CacheEntry {
  value: Payload,
  /// When the value was stored
  pub fetched_at: Instant,
}

impl CacheEntry {
  /// Whether the entry is still inside the freshness window.
  pub fn is_fresh(&self, ttl: Duration) -> bool {
    self.fetched_at.elapsed() < ttl
  }

  /// Clone the payload out as `T`, or `None` if it was stored as another type.
  pub fn value<T: Clone + 'static>(&self) -> Option<T> {
    self.value.downcast_ref::<T>().cloned()
  }
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("fetched_at", &self.fetched_at)
      .finish_non_exhaustive()
  }
}

/// Process-lifetime response cache.
///
/// Cloning is cheap and every clone shares the same map, so one cache can be
/// handed to the API client and to any number of queries. There is no
/// eviction: entries live until they are overwritten, invalidated or the
/// cache is cleared.
#[derive(Clone, Default)]
pub struct FetchCache {
  entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl FetchCache {
  pub fn new() -> Self {
    Self::default()
  }

  // A panic while holding the lock cannot leave a half-written entry, so a
  // poisoned map is still usable.
  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Get the value for `key` if it was stored less than `ttl` ago.
  ///
  /// Stale entries are reported as absent but stay in the map.
  pub fn get<T: Clone + 'static>(&self, key: &str, ttl: Duration) -> Option<T> {
    self.get_with_time(key, ttl).map(|(value, _)| value)
  }

  /// Like [`FetchCache::get`], also returning when the value was stored.
  pub fn get_with_time<T: Clone + 'static>(&self, key: &str, ttl: Duration) -> Option<(T, Instant)> {
    let entries = self.lock();
    let entry = entries.get(key)?;

    if !entry.is_fresh(ttl) {
      trace!(key, "cache entry stale");
      return None;
    }

    match entry.value::<T>() {
      Some(value) => Some((value, entry.fetched_at)),
      None => {
        trace!(key, "cache entry holds a different type");
        None
      }
    }
  }

  /// Store `value` under `key`, stamping the current time.
  pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
    self.set_payload(key.into(), Arc::new(value));
  }

  pub(crate) fn set_payload(&self, key: String, value: Payload) {
    trace!(key = %key, "cache set");
    self.lock().insert(
      key,
      CacheEntry {
        value,
        fetched_at: Instant::now(),
      },
    );
  }

  /// Drop the entry for `key`. Returns whether one existed.
  pub fn invalidate(&self, key: &str) -> bool {
    self.lock().remove(key).is_some()
  }

  /// Drop `prefix` and every key below it, where segments are separated by
  /// `:`. Returns how many entries were removed.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|key, _| !under_prefix(key, prefix));
    before - entries.len()
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }
}

fn under_prefix(key: &str, prefix: &str) -> bool {
  key
    .strip_prefix(prefix)
    .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
}

impl fmt::Debug for FetchCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FetchCache")
      .field("entries", &self.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TTL: Duration = Duration::from_secs(300);

  #[tokio::test(start_paused = true)]
  async fn test_get_returns_fresh_value() {
    let cache = FetchCache::new();
    cache.set("goals:alice", vec![1, 2, 3]);

    assert_eq!(cache.get::<Vec<i32>>("goals:alice", TTL), Some(vec![1, 2, 3]));
  }

  #[tokio::test(start_paused = true)]
  async fn test_get_reports_stale_as_absent_without_deleting() {
    let cache = FetchCache::new();
    cache.set("goals:alice", 7u32);

    tokio::time::advance(TTL).await;

    assert_eq!(cache.get::<u32>("goals:alice", TTL), None);
    assert_eq!(cache.len(), 1, "stale entry should stay in the map");
    // A longer ttl still sees it
    assert_eq!(cache.get::<u32>("goals:alice", TTL * 2), Some(7));
  }

  #[tokio::test(start_paused = true)]
  async fn test_freshness_boundary_is_exclusive() {
    let cache = FetchCache::new();
    cache.set("k", 1u8);

    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    assert!(cache.get::<u8>("k", TTL).is_some());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(cache.get::<u8>("k", TTL).is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_overwrites_and_restamps() {
    let cache = FetchCache::new();
    cache.set("k", "first".to_string());
    tokio::time::advance(Duration::from_secs(200)).await;
    cache.set("k", "second".to_string());
    tokio::time::advance(Duration::from_secs(200)).await;

    assert_eq!(cache.get::<String>("k", TTL).as_deref(), Some("second"));
  }

  #[test]
  fn test_type_mismatch_is_a_miss() {
    let cache = FetchCache::new();
    cache.set("k", 1u32);

    assert_eq!(cache.get::<String>("k", TTL), None);
  }

  #[test]
  fn test_invalidate_prefix() {
    let cache = FetchCache::new();
    cache.set("notifications:alice:20", 1u8);
    cache.set("notifications:alice:stats", 2u8);
    cache.set("goals:alice", 3u8);

    assert_eq!(cache.invalidate_prefix("notifications:alice"), 2);
    assert_eq!(cache.len(), 1);
    assert!(cache.invalidate("goals:alice"));
    assert!(!cache.invalidate("goals:alice"));
    assert!(cache.is_empty());
  }

  #[test]
  fn test_invalidate_prefix_stops_at_segment_boundary() {
    let cache = FetchCache::new();
    cache.set("goals:alice", 1u8);
    cache.set("goals:alice:dashboard", 2u8);
    cache.set("goals:alice2", 3u8);
    cache.set("goals:alice2:dashboard", 4u8);

    assert_eq!(cache.invalidate_prefix("goals:alice"), 2);
    assert_eq!(cache.get::<u8>("goals:alice2", TTL), Some(3));
    assert_eq!(cache.get::<u8>("goals:alice2:dashboard", TTL), Some(4));
  }

  #[test]
  fn test_clones_share_entries() {
    let cache = FetchCache::new();
    let other = cache.clone();
    other.set("k", 5i64);

    assert_eq!(cache.get::<i64>("k", TTL), Some(5));
    cache.clear();
    assert!(other.is_empty());
  }
}
