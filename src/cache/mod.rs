//! Generic in-memory caching layer for remote reads.
//!
//! This module provides an API-agnostic caching mechanism that:
//! - Stores any response payload under a stable query key with a fetch time
//! - Reports entries older than the caller's TTL as absent
//! - Coalesces concurrent misses for the same key onto one network call
//! - Supports explicit invalidation by key or key prefix
//!
//! Nothing is persisted; the cache lives as long as the process.

mod layer;
mod store;
mod traits;

pub use layer::{CacheLayer, DEFAULT_CACHE_TTL};
pub use store::{CacheEntry, FetchCache};
pub use traits::{CacheResult, CacheSource, QueryKey};
