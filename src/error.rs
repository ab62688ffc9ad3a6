//! Error type shared by the API client, queries and optimistic mutations.

use thiserror::Error;

/// Message used when the server does not provide a `detail` field.
pub const FALLBACK_SERVER_MESSAGE: &str = "An error occurred";

/// Failure of a remote call.
///
/// `Display` yields the human-readable message that is shown to the user.
/// The error is `Clone` so it can live inside query state and be handed to
/// every caller waiting on a coalesced fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// The request never reached the server or no response came back.
  #[error("Network error: {0}")]
  Transport(String),

  /// The server answered with an error status.
  #[error("{detail}")]
  Server { status: u16, detail: String },

  /// The response body could not be decoded into the expected shape.
  #[error("Unexpected response: {0}")]
  Decode(String),

  /// The request could not be built (bad path, missing plan id, ...).
  #[error("{0}")]
  Invalid(String),
}

impl ApiError {
  /// Build a server error from a status and the optional `detail` field.
  pub fn server(status: u16, detail: Option<String>) -> Self {
    ApiError::Server {
      status,
      detail: detail
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_SERVER_MESSAGE.to_string()),
    }
  }

  /// HTTP status when the server reported the failure.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Server { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Whether retrying the same request could succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      ApiError::Transport(_) => true,
      ApiError::Server { status, .. } => *status >= 500 || *status == 429,
      ApiError::Decode(_) | ApiError::Invalid(_) => false,
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      ApiError::Decode(err.to_string())
    } else if let Some(status) = err.status() {
      ApiError::server(status.as_u16(), None)
    } else {
      ApiError::Transport(err.to_string())
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    ApiError::Decode(err.to_string())
  }
}

impl From<url::ParseError> for ApiError {
  fn from(err: url::ParseError) -> Self {
    ApiError::Invalid(format!("Invalid request URL: {}", err))
  }
}
