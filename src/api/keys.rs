//! Query keys for mentor API reads.

use std::collections::BTreeMap;

use crate::cache::QueryKey;

/// Query key types for mentor API calls.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApiQueryKey {
  /// User dashboard overview
  Dashboard { username: String },
  /// Goals, optionally filtered by status
  Goals {
    username: String,
    status: Option<String>,
  },
  /// Goals dashboard (active goals and aggregates)
  GoalsDashboard { username: String },
  /// Today's commitment
  CommitmentToday { username: String },
  /// Commitment statistics over the last `days`
  CommitmentStats { username: String, days: u32 },
  /// Daily tasks across active plans
  DailyTasks { username: String },
  /// Action plans
  ActionPlans { username: String },
  /// Latest notifications
  Notifications { username: String, limit: u32 },
  /// Notification counters
  NotificationStats { username: String },
}

impl ApiQueryKey {
  pub fn username(&self) -> &str {
    match self {
      Self::Dashboard { username }
      | Self::Goals { username, .. }
      | Self::GoalsDashboard { username }
      | Self::CommitmentToday { username }
      | Self::CommitmentStats { username, .. }
      | Self::DailyTasks { username }
      | Self::ActionPlans { username }
      | Self::Notifications { username, .. }
      | Self::NotificationStats { username } => username,
    }
  }

  /// Prefix shared by every goal key of `username`, including the goals
  /// dashboard.
  pub fn goals_prefix(username: &str) -> String {
    format!("goals:{}", username)
  }
}

impl QueryKey for ApiQueryKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Dashboard { username } => format!("dashboard:{}", username),
      Self::Goals { username, status } => match status {
        Some(status) => format!("goals:{}:{}", username, status),
        None => format!("goals:{}", username),
      },
      Self::GoalsDashboard { username } => format!("goals:{}:dashboard", username),
      Self::CommitmentToday { username } => format!("commitments:{}:today", username),
      Self::CommitmentStats { username, days } => {
        format!("commitments:{}:stats:{}", username, days)
      }
      Self::DailyTasks { username } => format!("daily-tasks:{}", username),
      Self::ActionPlans { username } => format!("action-plans:{}", username),
      Self::Notifications { username, limit } => format!("notifications:{}:{}", username, limit),
      Self::NotificationStats { username } => format!("notifications:{}:stats", username),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Dashboard { username } => format!("dashboard for {}", username),
      Self::Goals { username, status } => {
        if let Some(s) = status {
          format!("{} goals for {}", s, username)
        } else {
          format!("goals for {}", username)
        }
      }
      Self::GoalsDashboard { username } => format!("goals dashboard for {}", username),
      Self::CommitmentToday { username } => format!("today's commitment for {}", username),
      Self::CommitmentStats { username, days } => {
        format!("{}-day commitment stats for {}", days, username)
      }
      Self::DailyTasks { username } => format!("daily tasks for {}", username),
      Self::ActionPlans { username } => format!("action plans for {}", username),
      Self::Notifications { username, limit } => {
        format!("latest {} notifications for {}", limit, username)
      }
      Self::NotificationStats { username } => format!("notification stats for {}", username),
    }
  }
}

/// Key for an ad-hoc GET: the path followed by its parameters serialized as
/// a JSON object with sorted keys.
pub fn request_key(path: &str, params: &[(&str, String)]) -> String {
  let params: BTreeMap<&str, &str> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
  let serialized = serde_json::to_string(&params).unwrap_or_default();
  format!("{}-{}", path, serialized)
}
