//! HTTP access to the mentor API.
//!
//! `ApiClient` owns the connection pool, the optional user API key header,
//! the response cache and the notifier that surfaces request failures.
//! Typed endpoint methods live in `endpoints`.

pub mod client;
mod endpoints;
pub mod keys;
pub mod types;

pub use client::{ApiClient, API_KEY_HEADER};
pub use endpoints::DASHBOARD_COMPLETION_NOTES;
pub use keys::{request_key, ApiQueryKey};
