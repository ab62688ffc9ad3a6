use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::api::keys::request_key;
use crate::cache::{CacheLayer, FetchCache};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::notify::{Notifier, NotifyKind, TracingNotifier};

/// Header carrying the user's own model API key.
pub const API_KEY_HEADER: &str = "X-Groq-Key";

/// Mentor API client wrapper
///
/// Cheap to clone; clones share the HTTP connection pool, the response cache
/// and the notifier.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  cache: CacheLayer,
  notifier: Arc<dyn Notifier>,
}

impl ApiClient {
  /// Build a client for `config.url`.
  ///
  /// When `api_key` is given it is sent as [`API_KEY_HEADER`] on every request.
  pub fn new(config: &ApiConfig, api_key: Option<&str>) -> Result<Self, ApiError> {
    let mut base_url = Url::parse(&config.url)?;
    // Url::join drops the last segment unless the base ends with a slash
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
      let mut value = HeaderValue::from_str(key)
        .map_err(|_| ApiError::Invalid("API key contains characters not allowed in a header".into()))?;
      value.set_sensitive(true);
      headers.insert(API_KEY_HEADER, value);
    }

    let mut builder = reqwest::Client::builder().default_headers(headers);
    if config.timeout_secs > 0 {
      builder = builder.timeout(Duration::from_secs(config.timeout_secs));
    }
    let http = builder
      .build()
      .map_err(|e| ApiError::Invalid(format!("Failed to create HTTP client: {}", e)))?;

    let cache = CacheLayer::new(FetchCache::new())
      .with_stale_time(Duration::from_secs(config.cache_ttl_secs));

    Ok(Self {
      http,
      base_url,
      cache,
      notifier: Arc::new(TracingNotifier),
    })
  }

  /// Surface request failures through `notifier`.
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn cache(&self) -> &FetchCache {
    self.cache.cache()
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url(&self, path: &str) -> Result<Url, ApiError> {
    Ok(self.base_url.join(path.trim_start_matches('/'))?)
  }

  /// GET `path` with query parameters.
  pub async fn get<T: DeserializeOwned>(
    &self,
    path: &str,
    params: &[(&str, String)],
  ) -> Result<T, ApiError> {
    let url = self.url(path)?;
    trace!(%url, "GET");
    self.send(self.http.get(url).query(params)).await
  }

  /// GET through the response cache.
  ///
  /// With `use_cache`, a response stored less than the cache TTL ago is
  /// returned without a request, and concurrent identical reads share one
  /// request. The cache key is the path plus the serialized parameters.
  pub async fn get_cached<T>(
    &self,
    path: &str,
    params: &[(&str, String)],
    use_cache: bool,
  ) -> Result<T, ApiError>
  where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
  {
    if !use_cache {
      return self.get(path, params).await;
    }

    let key = request_key(path, params);
    let client = self.clone();
    let path = path.to_string();
    let params: Vec<(String, String)> = params
      .iter()
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect();

    let result = self
      .cache
      .fetch(key.as_str(), move || async move {
        let params: Vec<(&str, String)> = params
          .iter()
          .map(|(k, v)| (k.as_str(), v.clone()))
          .collect();
        client.get::<T>(&path, &params).await
      })
      .await?;

    trace!(key = %key, source = ?result.source, "cached GET");
    Ok(result.data)
  }

  pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T, ApiError> {
    self.request(Method::POST, path, body).await
  }

  pub async fn patch<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T, ApiError> {
    self.request(Method::PATCH, path, body).await
  }

  pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
    self.request(Method::DELETE, path, None).await
  }

  async fn request<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<T, ApiError> {
    let url = self.url(path)?;
    trace!(%method, %url, "request");
    let mut request = self.http.request(method, url);
    if let Some(body) = body {
      request = request.json(&body);
    }
    self.send(request).await
  }

  /// Send a request, surfacing any failure through the notifier.
  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
    let result = execute(request).await;
    if let Err(err) = &result {
      self.notifier.notify(NotifyKind::Error, "Error", &err.to_string());
    }
    result
  }
}

async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
  let response = request.send().await?;

  let status = response.status();
  let body = response.bytes().await?;

  if !status.is_success() {
    let detail = error_detail(&body);
    debug!(%status, ?detail, "server reported failure");
    return Err(ApiError::server(status.as_u16(), detail));
  }

  // Empty bodies decode as null so `()` and `Option<T>` responses work
  if body.is_empty() {
    return Ok(serde_json::from_value(Value::Null)?);
  }
  Ok(serde_json::from_slice(&body)?)
}

/// Pull the `detail` field out of an error body.
fn error_detail(body: &[u8]) -> Option<String> {
  let value: Value = serde_json::from_slice(body).ok()?;
  match value.get("detail")? {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    // Validation errors carry a list of problems
    other => Some(other.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::{Matcher, Server};
  use serde_json::json;
  use std::sync::Mutex;

  #[derive(Default)]
  struct RecordingNotifier {
    seen: Mutex<Vec<(NotifyKind, String, String)>>,
  }

  impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotifyKind, title: &str, message: &str) {
      self
        .seen
        .lock()
        .unwrap()
        .push((kind, title.to_string(), message.to_string()));
    }
  }

  fn client_for(server: &Server, api_key: Option<&str>) -> ApiClient {
    let config = ApiConfig {
      url: server.url(),
      ..ApiConfig::default()
    };
    ApiClient::new(&config, api_key).unwrap()
  }

  #[tokio::test]
  async fn test_get_with_params_and_api_key() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("GET", "/goals/alice")
      .match_query(Matcher::UrlEncoded("status".into(), "active".into()))
      .match_header(API_KEY_HEADER, "gsk_secret")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"[{"id": 1, "title": "Ship v1"}]"#)
      .create_async()
      .await;

    let client = client_for(&server, Some("gsk_secret"));
    let goals: Vec<Value> = client
      .get("/goals/alice", &[("status", "active".to_string())])
      .await
      .unwrap();

    mock.assert_async().await;
    assert_eq!(goals[0]["title"], "Ship v1");
  }

  #[tokio::test]
  async fn test_no_api_key_header_without_key() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("GET", "/dashboard/alice")
      .match_header(API_KEY_HEADER, Matcher::Missing)
      .with_body("{}")
      .create_async()
      .await;

    let client = client_for(&server, None);
    let _: Value = client.get("/dashboard/alice", &[]).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_server_detail_is_surfaced() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("GET", "/goals/bob")
      .with_status(404)
      .with_body(r#"{"detail": "User not found"}"#)
      .create_async()
      .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let client = client_for(&server, None).with_notifier(notifier.clone());
    let err = client.get::<Value>("/goals/bob", &[]).await.unwrap_err();

    assert_eq!(
      err,
      ApiError::Server {
        status: 404,
        detail: "User not found".into()
      }
    );
    let seen = notifier.seen.lock().unwrap();
    assert_eq!(
      seen.as_slice(),
      &[(NotifyKind::Error, "Error".to_string(), "User not found".to_string())]
    );
  }

  #[tokio::test]
  async fn test_server_error_without_detail_uses_fallback() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("POST", "/notifications/alice/mark-all-read")
      .with_status(500)
      .with_body("Internal Server Error")
      .create_async()
      .await;

    let client = client_for(&server, None);
    let err = client
      .post::<Value>("/notifications/alice/mark-all-read", None)
      .await
      .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), crate::error::FALLBACK_SERVER_MESSAGE);
  }

  #[tokio::test]
  async fn test_transport_failure() {
    let config = ApiConfig {
      // Nothing listens on port 1
      url: "http://127.0.0.1:1".into(),
      timeout_secs: 2,
      ..ApiConfig::default()
    };
    let client = ApiClient::new(&config, None).unwrap();

    let err = client.get::<Value>("/dashboard/alice", &[]).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "got {:?}", err);
  }

  #[tokio::test]
  async fn test_decode_failure() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("GET", "/daily-tasks/alice")
      .with_body("not json")
      .create_async()
      .await;

    let client = client_for(&server, None);
    let err = client
      .get::<Vec<Value>>("/daily-tasks/alice", &[])
      .await
      .unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
  }

  #[tokio::test]
  async fn test_get_cached_hits_network_once() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("GET", "/commitments/alice/stats")
      .match_query(Matcher::UrlEncoded("days".into(), "30".into()))
      .with_body(r#"{"streak": 4}"#)
      .expect(1)
      .create_async()
      .await;

    let client = client_for(&server, None);
    let params = [("days", "30".to_string())];
    let first: Value = client
      .get_cached("/commitments/alice/stats", &params, true)
      .await
      .unwrap();
    let second: Value = client
      .get_cached("/commitments/alice/stats", &params, true)
      .await
      .unwrap();

    mock.assert_async().await;
    assert_eq!(first, second);
    assert_eq!(client.cache().len(), 1);
  }

  #[tokio::test]
  async fn test_get_cached_without_cache_always_fetches() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("GET", "/dashboard/alice")
      .with_body("{}")
      .expect(2)
      .create_async()
      .await;

    let client = client_for(&server, None);
    for _ in 0..2 {
      let _: Value = client.get_cached("/dashboard/alice", &[], false).await.unwrap();
    }

    mock.assert_async().await;
    assert!(client.cache().is_empty());
  }

  #[tokio::test]
  async fn test_patch_with_json_body_and_empty_response() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("PATCH", "/notifications/alice/3/read")
      .match_body(Matcher::Json(json!({"read": true})))
      .with_status(204)
      .create_async()
      .await;

    let client = client_for(&server, None);
    client
      .patch::<()>("/notifications/alice/3/read", Some(json!({"read": true})))
      .await
      .unwrap();
    mock.assert_async().await;
  }

  #[test]
  fn test_base_url_with_path_prefix() {
    let config = ApiConfig {
      url: "https://mentor.example.com/api".into(),
      ..ApiConfig::default()
    };
    let client = ApiClient::new(&config, None).unwrap();
    assert_eq!(
      client.url("/goals/alice").unwrap().as_str(),
      "https://mentor.example.com/api/goals/alice"
    );
  }

  #[test]
  fn test_error_detail_shapes() {
    assert_eq!(error_detail(br#"{"detail": "nope"}"#).as_deref(), Some("nope"));
    assert_eq!(error_detail(br#"{"detail": null}"#), None);
    assert_eq!(error_detail(b"<html>"), None);
    assert!(error_detail(br#"{"detail": [{"msg": "field required"}]}"#)
      .unwrap()
      .contains("field required"));
  }
}
