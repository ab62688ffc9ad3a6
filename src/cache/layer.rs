//! Cache layer that orchestrates caching logic with network fetching.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace};

use super::store::{FetchCache, Payload};
use super::traits::{CacheResult, QueryKey};
use crate::error::ApiError;

type PendingFetch = Shared<BoxFuture<'static, Result<Payload, ApiError>>>;

type InflightMap = HashMap<String, (u64, PendingFetch)>;

/// Default freshness window for cached reads.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache layer that manages caching logic and network fetching.
///
/// Reads go through the shared [`FetchCache`]; concurrent misses for the same
/// key are coalesced onto a single network call whose result is handed to
/// every waiter.
pub struct CacheLayer {
  cache: FetchCache,
  inflight: Arc<Mutex<InflightMap>>,
  next_id: Arc<AtomicU64>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl CacheLayer {
  /// Create a new cache layer on top of the given cache.
  pub fn new(cache: FetchCache) -> Self {
    Self {
      cache,
      inflight: Arc::new(Mutex::new(HashMap::new())),
      next_id: Arc::new(AtomicU64::new(0)),
      stale_time: DEFAULT_CACHE_TTL,
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn cache(&self) -> &FetchCache {
    &self.cache
  }

  /// Number of keys with a network call currently in flight.
  pub fn inflight_count(&self) -> usize {
    lock(&self.inflight).len()
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If another caller is already fetching this key, wait for its result
  /// 3. Otherwise call `fetcher` and store the result on success
  ///
  /// Failures are not cached; every waiter of a failed call gets the error.
  pub async fn fetch<K, T, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<T>, ApiError>
  where
    K: QueryKey + ?Sized,
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let key = key.cache_key();

    if let Some((data, cached_at)) = self.cache.get_with_time::<T>(&key, self.stale_time) {
      trace!(key = %key, "cache hit");
      return Ok(CacheResult::from_cache(data, cached_at));
    }

    let (pending, leader_id) = {
      let mut inflight = lock(&self.inflight);
      match inflight.get(&key) {
        Some((_, pending)) => {
          debug!(key = %key, "joining in-flight request");
          (pending.clone(), None)
        }
        None => {
          let id = self.next_id.fetch_add(1, Ordering::Relaxed);
          let cache = self.cache.clone();
          let store_key = key.clone();
          let request = fetcher();
          let pending = async move {
            let payload: Payload = Arc::new(request.await?);
            cache.set_payload(store_key, Arc::clone(&payload));
            Ok(payload)
          }
          .boxed()
          .shared();
          inflight.insert(key.clone(), (id, pending.clone()));
          (pending, Some(id))
        }
      }
    };

    // The caller that started the request clears the in-flight slot, also
    // when it is dropped before the request settles.
    let _guard = leader_id.map(|id| InflightGuard {
      inflight: Arc::clone(&self.inflight),
      key: key.clone(),
      id,
    });

    let payload = pending.await?;
    let data = payload.downcast_ref::<T>().cloned().ok_or_else(|| {
      ApiError::Decode(format!("cached payload for {} has an unexpected type", key))
    })?;

    Ok(match leader_id {
      Some(_) => CacheResult::from_network(data),
      None => CacheResult::coalesced(data),
    })
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      inflight: Arc::clone(&self.inflight),
      next_id: Arc::clone(&self.next_id),
      stale_time: self.stale_time,
    }
  }
}

struct InflightGuard {
  inflight: Arc<Mutex<InflightMap>>,
  key: String,
  id: u64,
}

impl Drop for InflightGuard {
  fn drop(&mut self) {
    let mut inflight = lock(&self.inflight);
    if matches!(inflight.get(&self.key), Some((id, _)) if *id == self.id) {
      inflight.remove(&self.key);
    }
  }
}

fn lock(inflight: &Mutex<InflightMap>) -> MutexGuard<'_, InflightMap> {
  inflight.lock().unwrap_or_else(PoisonError::into_inner)
}
