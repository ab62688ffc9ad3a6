//! Core traits and types for the caching system.

use tokio::time::Instant;

/// A stable identity for one logical remote resource.
///
/// The rendered key correlates cached data, in-flight requests and
/// invalidation for that resource, so it must be deterministic for equal
/// inputs.
pub trait QueryKey {
  /// Key used in the fetch cache (e.g. `goals:alice`).
  fn cache_key(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String {
    self.cache_key()
  }
}

impl QueryKey for str {
  fn cache_key(&self) -> String {
    self.to_string()
  }
}

impl QueryKey for String {
  fn cache_key(&self) -> String {
    self.clone()
  }
}

impl<K: QueryKey + ?Sized> QueryKey for &K {
  fn cache_key(&self) -> String {
    (**self).cache_key()
  }

  fn description(&self) -> String {
    (**self).description()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<Instant>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a result that shared another caller's in-flight request.
  pub fn coalesced(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Coalesced,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Instant) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from a network call made by this caller
  Network,
  /// Data from a network call another caller already had in flight
  Coalesced,
  /// Data from cache, still inside the freshness window
  CacheFresh,
}
