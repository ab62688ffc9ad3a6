//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! owns one remote resource: it fetches it, optionally polls it, and exposes
//! loading, error and data state to any number of subscribers.
//!
//! # Example
//!
//! ```ignore
//! let api = client.clone();
//! let query = Query::new("goals:alice", move || {
//!     let api = api.clone();
//!     async move { api.goals("alice", None).await }
//! })
//! .with_refetch_interval(Duration::from_secs(120));
//!
//! // Initial fetch plus polling
//! query.start();
//!
//! // React to changes
//! let mut rx = query.subscribe();
//! while rx.changed().await.is_ok() {
//!     let state = rx.borrow().clone();
//!     if let Some(goals) = state.data() { render(goals) }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::{FetchCache, QueryKey};
use crate::error::ApiError;
use crate::poll::PollHandle;
use crate::retry::RetryPolicy;

/// Stale time used when none is configured.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Snapshot of a query's local representation of its resource.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  /// Last successfully fetched payload
  pub data: Option<T>,
  /// A fetch for this query is in flight
  pub is_loading: bool,
  /// Failure of the most recent fetch, cleared when a new fetch starts
  pub error: Option<ApiError>,
  /// When `data` was fetched
  pub last_fetch: Option<Instant>,
}

impl<T> Default for QueryState<T> {
  fn default() -> Self {
    Self {
      data: None,
      is_loading: false,
      error: None,
      last_fetch: None,
    }
  }
}

impl<T> QueryState<T> {
  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.is_loading
  }

  /// Nothing has been fetched and nothing is in flight.
  pub fn is_idle(&self) -> bool {
    self.data.is_none() && self.error.is_none() && !self.is_loading
  }

  pub fn is_success(&self) -> bool {
    self.data.is_some() && self.error.is_none()
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  /// Whether `data` is present and younger than `stale_time`.
  pub fn is_fresh(&self, stale_time: Duration) -> bool {
    self.data.is_some()
      && self
        .last_fetch
        .map(|t| t.elapsed() < stale_time)
        .unwrap_or(false)
  }
}

/// What a call to [`Query::fetch_data`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Local data was fresh; no network call
  Skipped,
  /// Seeded from a fresh shared cache entry; no network call
  Cached,
  /// The network call succeeded and its data was applied
  Fetched,
  /// The network call failed; previous data is kept
  Failed(ApiError),
  /// A newer fetch had already been applied, so this result was dropped
  Superseded,
  /// The query was disposed before the result could be applied
  Disposed,
}

/// Configuration for a query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// Fetch on activation and poll while enabled
  pub enabled: bool,
  /// Poll period; `None` fetches once on activation
  pub refetch_interval: Option<Duration>,
  /// How long fetched data counts as fresh
  pub stale_time: Duration,
  /// Retries inside a single fetch
  pub retry: RetryPolicy,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      refetch_interval: None,
      stale_time: DEFAULT_STALE_TIME,
      retry: RetryPolicy::None,
    }
  }
}

/// A boxed future that returns a Result<T, ApiError>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// State shared between the query handle and its background tasks.
struct Shared<T> {
  key: String,
  fetcher: FetcherFn<T>,
  cache: Option<FetchCache>,
  state: watch::Sender<QueryState<T>>,
  /// Fetches started but not settled; only touched inside `send_modify`
  in_flight: AtomicUsize,
  next_seq: AtomicU64,
  /// Highest sequence number whose result was applied
  applied_seq: AtomicU64,
  /// Cancelled on dispose; parent of every poll token
  lifetime: CancellationToken,
}

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/data/error state, broadcast over a `watch` channel
/// - A staleness gate so unforced fetches of fresh data are skipped
/// - Optional polling through a [`PollHandle`]
/// - Optional write-through to a shared [`FetchCache`]
///
/// Results of overlapping fetches are applied in start order: a result that
/// settles after a newer one has been applied is discarded. Dropping the
/// query disposes it.
pub struct Query<T> {
  shared: Arc<Shared<T>>,
  options: QueryOptions,
  enabled: AtomicBool,
  poller: Mutex<Option<PollHandle>>,
}

impl<T: Clone + Send + Sync + 'static> Query<T> {
  /// Create a new query with the given key and fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// for every fetch that passes the staleness gate.
  pub fn new<K, F, Fut>(key: K, fetcher: F) -> Self
  where
    K: QueryKey,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let (state, _) = watch::channel(QueryState::default());
    Self {
      shared: Arc::new(Shared {
        key: key.cache_key(),
        fetcher: Box::new(move || Box::pin(fetcher())),
        cache: None,
        state,
        in_flight: AtomicUsize::new(0),
        next_seq: AtomicU64::new(0),
        applied_seq: AtomicU64::new(0),
        lifetime: CancellationToken::new(),
      }),
      options: QueryOptions::default(),
      enabled: AtomicBool::new(true),
      poller: Mutex::new(None),
    }
  }

  /// Replace all options at once.
  pub fn with_options(mut self, options: QueryOptions) -> Self {
    self.enabled = AtomicBool::new(options.enabled);
    self.options = options;
    self
  }

  /// Set the stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.options.stale_time = duration;
    self
  }

  /// Poll every `interval` while the query is enabled and started.
  pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
    self.options.refetch_interval = Some(interval);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.options.retry = retry;
    self
  }

  /// Start disabled (or enabled). A disabled query never fetches on its own.
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.options.enabled = enabled;
    self.enabled = AtomicBool::new(enabled);
    self
  }

  /// Share results through `cache` under this query's key.
  ///
  /// A fresh entry seeds an empty query without a network call, and every
  /// successful fetch is written back.
  ///
  /// Must be called before the query is started or fetched.
  pub fn with_cache(mut self, cache: FetchCache) -> Self {
    match Arc::get_mut(&mut self.shared) {
      Some(shared) => shared.cache = Some(cache),
      None => warn!(key = %self.shared.key, "cache attached after query was shared; ignoring"),
    }
    self
  }

  pub fn key(&self) -> &str {
    &self.shared.key
  }

  pub fn options(&self) -> &QueryOptions {
    &self.options
  }

  /// Get a copy of the current state.
  pub fn state(&self) -> QueryState<T> {
    self.shared.state.borrow().clone()
  }

  /// Receive every state change.
  pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
    self.shared.state.subscribe()
  }

  /// Get the data if any fetch has succeeded.
  pub fn data(&self) -> Option<T> {
    self.shared.state.borrow().data.clone()
  }

  /// Get the error of the most recent fetch.
  pub fn error(&self) -> Option<ApiError> {
    self.shared.state.borrow().error.clone()
  }

  /// Check if a fetch is in flight.
  pub fn is_loading(&self) -> bool {
    self.shared.state.borrow().is_loading
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    let state = self.shared.state.borrow();
    state.data.is_some() && !state.is_fresh(self.options.stale_time)
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::SeqCst)
  }

  pub fn is_disposed(&self) -> bool {
    self.shared.lifetime.is_cancelled()
  }

  /// Fetch unless local data is still fresh.
  ///
  /// With `force` the staleness gate is bypassed. Failures are recorded in
  /// the query state and returned as [`FetchOutcome::Failed`]; they never
  /// clear previously fetched data.
  pub async fn fetch_data(&self, force: bool) -> FetchOutcome {
    run_fetch(&self.shared, &self.options, force).await
  }

  /// Force a fetch regardless of freshness.
  pub async fn refetch(&self) -> FetchOutcome {
    self.fetch_data(true).await
  }

  /// Drop the shared cache entry for this query's key.
  pub fn invalidate(&self) {
    if let Some(cache) = &self.shared.cache {
      cache.invalidate(&self.shared.key);
    }
  }

  /// Activate the query: fetch in the background and poll if an interval is
  /// configured.
  ///
  /// No-op if the query is disabled, disposed or already started.
  pub fn start(&self) {
    if !self.is_enabled() || self.is_disposed() {
      return;
    }

    let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
    if poller.as_ref().is_some_and(|p| !p.is_cancelled()) {
      return;
    }

    let shared = Arc::clone(&self.shared);
    let options = self.options.clone();
    debug!(
      key = %self.shared.key,
      interval = ?options.refetch_interval,
      "query activated"
    );
    *poller = Some(PollHandle::spawn(
      self.shared.lifetime.child_token(),
      options.refetch_interval,
      move || {
        let shared = Arc::clone(&shared);
        let options = options.clone();
        async move {
          run_fetch(&shared, &options, false).await;
        }
      },
    ));
  }

  /// Stop background fetching and polling.
  pub fn stop(&self) {
    let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = poller.take() {
      handle.cancel();
      debug!(key = %self.shared.key, "query deactivated");
    }
  }

  /// Enable or disable the query.
  ///
  /// Enabling activates it (see [`Query::start`]); disabling stops polling
  /// and keeps the current state.
  pub fn set_enabled(&self, enabled: bool) {
    let was = self.enabled.swap(enabled, Ordering::SeqCst);
    match (was, enabled) {
      (false, true) => self.start(),
      (true, false) => self.stop(),
      _ => {}
    }
  }

  /// End the query's lifetime.
  ///
  /// Polling stops, in-flight fetches are abandoned, and no later result
  /// touches the state.
  pub fn dispose(&self) {
    if self.shared.lifetime.is_cancelled() {
      return;
    }
    self.shared.lifetime.cancel();
    self.stop();
    debug!(key = %self.shared.key, "query disposed");
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    self.shared.lifetime.cancel();
  }
}

impl<T: fmt::Debug> fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.shared.key)
      .field("state", &*self.shared.state.borrow())
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

async fn run_fetch<T>(shared: &Shared<T>, options: &QueryOptions, force: bool) -> FetchOutcome
where
  T: Clone + Send + Sync + 'static,
{
  let key = shared.key.as_str();

  if shared.lifetime.is_cancelled() {
    return FetchOutcome::Disposed;
  }

  if !force {
    if shared.state.borrow().is_fresh(options.stale_time) {
      trace!(key, "data fresh, skipping fetch");
      return FetchOutcome::Skipped;
    }
    if seed_from_cache(shared, options.stale_time) {
      debug!(key, "seeded from shared cache");
      return FetchOutcome::Cached;
    }
  }

  let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
  let mut in_flight = InFlight::begin(shared);
  debug!(key, seq, force, "fetching");

  let result = tokio::select! {
    biased;
    _ = shared.lifetime.cancelled() => None,
    result = fetch_with_retry(shared, &options.retry) => Some(result),
  };

  let Some(result) = result else {
    trace!(key, seq, "fetch abandoned on dispose");
    return FetchOutcome::Disposed;
  };
  if shared.lifetime.is_cancelled() {
    return FetchOutcome::Disposed;
  }

  let mut outcome = FetchOutcome::Superseded;
  shared.state.send_modify(|s| {
    in_flight.settle(s);

    if seq < shared.applied_seq.load(Ordering::SeqCst) {
      return;
    }
    shared.applied_seq.store(seq, Ordering::SeqCst);

    match result {
      Ok(data) => {
        if let Some(cache) = &shared.cache {
          cache.set(shared.key.clone(), data.clone());
        }
        s.data = Some(data);
        s.last_fetch = Some(Instant::now());
        s.error = None;
        outcome = FetchOutcome::Fetched;
      }
      Err(err) => {
        s.error = Some(err.clone());
        outcome = FetchOutcome::Failed(err);
      }
    }
  });

  match &outcome {
    FetchOutcome::Fetched => debug!(key, seq, "fetch succeeded"),
    FetchOutcome::Failed(err) => warn!(key, seq, error = %err, "fetch failed"),
    FetchOutcome::Superseded => debug!(key, seq, "discarding result older than applied data"),
    _ => {}
  }
  outcome
}

/// One started fetch, counted in `in_flight` until it settles or is dropped.
///
/// Dropping an unsettled fetch (a cancelled poll tick, an abandoned
/// `fetch_data` future, a disposed query) still releases its count.
struct InFlight<'a, T> {
  shared: &'a Shared<T>,
  settled: bool,
}

impl<'a, T> InFlight<'a, T> {
  fn begin(shared: &'a Shared<T>) -> Self {
    shared.state.send_modify(|s| {
      shared.in_flight.fetch_add(1, Ordering::SeqCst);
      s.is_loading = true;
      s.error = None;
    });
    Self {
      shared,
      settled: false,
    }
  }

  /// Release the count as part of an in-progress state update.
  fn settle(&mut self, state: &mut QueryState<T>) {
    if self.settled {
      return;
    }
    self.settled = true;
    let remaining = self.shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
    state.is_loading = remaining > 0;
  }
}

impl<T> Drop for InFlight<'_, T> {
  fn drop(&mut self) {
    if !self.settled {
      let shared = self.shared;
      shared.state.send_modify(|s| {
        let remaining = shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        s.is_loading = remaining > 0;
      });
    }
  }
}

/// Adopt a fresh shared-cache entry when the query holds no data yet.
fn seed_from_cache<T>(shared: &Shared<T>, stale_time: Duration) -> bool
where
  T: Clone + Send + Sync + 'static,
{
  let Some(cache) = &shared.cache else {
    return false;
  };
  if shared.state.borrow().data.is_some() {
    return false;
  }
  let Some((data, fetched_at)) = cache.get_with_time::<T>(&shared.key, stale_time) else {
    return false;
  };

  shared.state.send_modify(|s| {
    s.data = Some(data);
    s.last_fetch = Some(fetched_at);
    s.error = None;
  });
  true
}

async fn fetch_with_retry<T>(shared: &Shared<T>, retry: &RetryPolicy) -> Result<T, ApiError> {
  let mut failures = 0;
  loop {
    match (shared.fetcher)().await {
      Ok(data) => return Ok(data),
      Err(err) => {
        failures += 1;
        match retry.delay_for(failures) {
          Some(delay) if err.is_retryable() => {
            warn!(
              key = %shared.key,
              attempt = failures,
              error = %err,
              ?delay,
              "fetch failed, retrying"
            );
            tokio::time::sleep(delay).await;
          }
          _ => return Err(err),
        }
      }
    }
  }
}
