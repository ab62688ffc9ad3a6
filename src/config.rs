use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::mutation::RollbackPolicy;
use crate::query::QueryOptions;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the mentor API
  #[serde(default = "default_api_url")]
  pub url: String,
  /// GitHub username the dashboard belongs to
  pub username: Option<String>,
  /// Per-request timeout; 0 disables it
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Freshness window of the client's response cache
  #[serde(default = "default_stale_secs")]
  pub cache_ttl_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      username: None,
      timeout_secs: default_timeout_secs(),
      cache_ttl_secs: default_stale_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How long fetched data counts as fresh
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
  #[serde(default = "default_notifications_interval_secs")]
  pub notifications_interval_secs: u64,
  /// Dashboard polling period; unset means fetch once
  #[serde(default)]
  pub dashboard_interval_secs: Option<u64>,
  #[serde(default = "default_notifications_limit")]
  pub notifications_limit: u32,
  #[serde(default)]
  pub retry: RetryPolicy,
  #[serde(default)]
  pub rollback: RollbackPolicy,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      notifications_interval_secs: default_notifications_interval_secs(),
      dashboard_interval_secs: None,
      notifications_limit: default_notifications_limit(),
      retry: RetryPolicy::default(),
      rollback: RollbackPolicy::default(),
    }
  }
}

impl SyncConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_secs)
  }

  pub fn notifications_interval(&self) -> Duration {
    Duration::from_secs(self.notifications_interval_secs)
  }

  pub fn dashboard_interval(&self) -> Option<Duration> {
    self.dashboard_interval_secs.map(Duration::from_secs)
  }

  /// Query options for a dashboard query.
  pub fn query_options(&self) -> QueryOptions {
    QueryOptions {
      enabled: true,
      refetch_interval: self.dashboard_interval(),
      stale_time: self.stale_time(),
      retry: self.retry,
    }
  }
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_stale_secs() -> u64 {
  300
}

fn default_notifications_interval_secs() -> u64 {
  120
}

fn default_notifications_limit() -> u32 {
  20
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mentor-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mentor-sync/config.yaml
  ///
  /// Without any file the defaults are used. `MENTOR_SYNC_API_URL`
  /// overrides `api.url` in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        debug!("no config file found, using defaults");
        Config::default()
      }
    };

    Ok(config.with_url_override(std::env::var("MENTOR_SYNC_API_URL").ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mentor-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mentor-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  fn with_url_override(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
      self.api.url = url;
    }
    self
  }

  /// The configured username, or an error telling the user how to set one.
  pub fn username(&self) -> Result<&str> {
    self
      .api
      .username
      .as_deref()
      .filter(|u| !u.is_empty())
      .ok_or_else(|| eyre!("No username configured. Set api.username in the config file or pass --user."))
  }

  /// Get the user-supplied model API key from environment variables.
  ///
  /// Checks MENTOR_SYNC_GROQ_KEY first, then GROQ_API_KEY as fallback.
  /// Absent is fine: requests are then sent without the header.
  pub fn get_api_key() -> Option<String> {
    std::env::var("MENTOR_SYNC_GROQ_KEY")
      .or_else(|_| std::env::var("GROQ_API_KEY"))
      .ok()
      .filter(|k| !k.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use tempfile::NamedTempFile;

  fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).expect("Failed to write config");
    file
  }

  #[test]
  fn test_defaults_without_file_contents() {
    let config = Config::default();
    assert_eq!(config.api.url, DEFAULT_API_URL);
    assert_eq!(config.sync.stale_time(), Duration::from_secs(300));
    assert_eq!(config.sync.notifications_interval(), Duration::from_secs(120));
    assert_eq!(config.sync.notifications_limit, 20);
    assert_eq!(config.sync.dashboard_interval(), None);
    assert_eq!(config.sync.retry, RetryPolicy::None);
    assert_eq!(config.sync.rollback, RollbackPolicy::Restore);
  }

  #[test]
  fn test_load_from_path() {
    let file = write_config(
      r#"
api:
  url: https://mentor.example.com
  username: alice
sync:
  stale_secs: 60
  dashboard_interval_secs: 30
  retry:
    kind: fixed
    attempts: 2
    delay_ms: 500
  rollback: leave_applied
"#,
    );

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.api.url, "https://mentor.example.com");
    assert_eq!(config.username().unwrap(), "alice");
    assert_eq!(config.api.timeout_secs, 30);

    let options = config.sync.query_options();
    assert_eq!(options.stale_time, Duration::from_secs(60));
    assert_eq!(options.refetch_interval, Some(Duration::from_secs(30)));
    assert_eq!(
      options.retry,
      RetryPolicy::Fixed {
        attempts: 2,
        delay_ms: 500
      }
    );
    assert_eq!(config.sync.rollback, RollbackPolicy::LeaveApplied);
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    let file = write_config("api: [not, a, map]");
    let err = Config::load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }

  #[test]
  fn test_missing_username_is_an_error() {
    let err = Config::default().username().unwrap_err();
    assert!(err.to_string().contains("No username configured"));
  }

  #[test]
  fn test_url_override() {
    let config = Config::default().with_url_override(Some("http://10.0.0.2:9000".into()));
    assert_eq!(config.api.url, "http://10.0.0.2:9000");

    let unchanged = Config::default().with_url_override(Some("  ".into()));
    assert_eq!(unchanged.api.url, DEFAULT_API_URL);
  }
}
