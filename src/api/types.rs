//! Serde types matching the mentor API responses.
//!
//! Only the fields the sync layer works with are typed; everything else the
//! server sends is kept in `extra` so callers can still reach it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a server-side record.
pub type RecordId = i64;

// ============================================================================
// Timestamps
// ============================================================================

/// The backend emits naive UTC timestamps (`2024-05-01T09:30:00.123456`) and
/// sometimes RFC 3339 ones; accept both.
mod timestamp {
  use chrono::{DateTime, NaiveDateTime, Utc};
  use serde::{de::Error, Deserialize, Deserializer, Serializer};

  pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
      .map(|dt| dt.with_timezone(&Utc))
      .ok()
      .or_else(|| {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
          .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
          .map(|dt| dt.and_utc())
          .ok()
      })
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let s = String::deserialize(d)?;
    parse(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", s)))
  }

  pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&dt.to_rfc3339())
  }

  pub mod option {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(
      d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
      match Option::<String>::deserialize(d)? {
        Some(s) => parse(&s)
          .map(Some)
          .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", s))),
        None => Ok(None),
      }
    }

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
      match dt {
        Some(dt) => s.serialize_str(&dt.to_rfc3339()),
        None => s.serialize_none(),
      }
    }
  }
}

// ============================================================================
// Notifications
// ============================================================================

/// Urgency of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
  Urgent,
  High,
  #[default]
  Normal,
  Low,
  Other(String),
}

impl From<String> for Priority {
  fn from(s: String) -> Self {
    match s.to_lowercase().as_str() {
      "urgent" => Priority::Urgent,
      "high" => Priority::High,
      "normal" => Priority::Normal,
      "low" => Priority::Low,
      _ => Priority::Other(s),
    }
  }
}

impl From<Priority> for String {
  fn from(p: Priority) -> Self {
    p.to_string()
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Priority::Urgent => f.write_str("urgent"),
      Priority::High => f.write_str("high"),
      Priority::Normal => f.write_str("normal"),
      Priority::Low => f.write_str("low"),
      Priority::Other(s) => f.write_str(s),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: RecordId,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub notification_type: String,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub read: bool,
  #[serde(default)]
  pub action_url: Option<String>,
  #[serde(default, alias = "extra_data")]
  pub metadata: Option<Value>,
  #[serde(with = "timestamp")]
  pub created_at: DateTime<Utc>,
  #[serde(default, with = "timestamp::option")]
  pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
  #[serde(default)]
  pub total: u32,
  #[serde(default)]
  pub unread: u32,
  #[serde(default)]
  pub by_type: HashMap<String, u32>,
  #[serde(default)]
  pub recent_count: u32,
}

// ============================================================================
// Daily tasks and action plans
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
  #[default]
  Pending,
  InProgress,
  Completed,
  Skipped,
  Other(String),
}

impl From<String> for TaskStatus {
  fn from(s: String) -> Self {
    match s.as_str() {
      "pending" => TaskStatus::Pending,
      "in_progress" => TaskStatus::InProgress,
      "completed" => TaskStatus::Completed,
      "skipped" => TaskStatus::Skipped,
      _ => TaskStatus::Other(s),
    }
  }
}

impl From<TaskStatus> for String {
  fn from(s: TaskStatus) -> Self {
    s.to_string()
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskStatus::Pending => f.write_str("pending"),
      TaskStatus::InProgress => f.write_str("in_progress"),
      TaskStatus::Completed => f.write_str("completed"),
      TaskStatus::Skipped => f.write_str("skipped"),
      TaskStatus::Other(s) => f.write_str(s),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTask {
  pub id: RecordId,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub task_type: String,
  #[serde(default)]
  pub status: TaskStatus,
  #[serde(default)]
  pub day_number: Option<u32>,
  /// Minutes
  #[serde(default)]
  pub estimated_time: Option<u32>,
  #[serde(default)]
  pub action_plan_id: Option<RecordId>,
  #[serde(flatten)]
  pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
  pub id: RecordId,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub current_day: u32,
  #[serde(default)]
  pub completion_percentage: f64,
  #[serde(default)]
  pub daily_tasks: Vec<DailyTask>,
}

// ============================================================================
// Goals, commitments, dashboard
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
  pub id: RecordId,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub goal_type: String,
  #[serde(default)]
  pub priority: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub progress: f64,
  #[serde(default)]
  pub target_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalsDashboard {
  #[serde(default)]
  pub active_goals: Vec<Goal>,
  #[serde(flatten)]
  pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodayCommitment {
  #[serde(default)]
  pub commitment: Option<String>,
  #[serde(default)]
  pub shipped: Option<bool>,
  #[serde(default)]
  pub checkin_id: Option<RecordId>,
  #[serde(flatten)]
  pub extra: HashMap<String, Value>,
}

/// Body of `POST .../tasks/{id}/complete`.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteTaskRequest {
  pub notes: String,
}

/// Plain acknowledgement returned by mutation endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {
  #[serde(default)]
  pub message: Option<String>,
}
