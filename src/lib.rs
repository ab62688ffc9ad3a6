//! Client-side data synchronization for the mentor dashboard API.
//!
//! - [`cache::FetchCache`]: keyed in-memory store with TTL freshness checks
//! - [`query::Query`]: one remote resource with loading/error/data state,
//!   staleness-gated refetch and cancellable polling
//! - [`mutation::Optimistic`]: local state changed before the server confirms
//!
//! [`notifications::NotificationInbox`], [`tasks::TaskBoard`] and
//! [`dashboard::Dashboard`] put these together for the mentor API.

pub mod api;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod mutation;
pub mod notifications;
pub mod notify;
pub mod poll;
pub mod query;
pub mod retry;
pub mod tasks;

pub use api::ApiClient;
pub use cache::FetchCache;
pub use error::ApiError;
pub use query::{FetchOutcome, Query, QueryOptions, QueryState};
