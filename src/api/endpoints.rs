//! Typed mentor API endpoints.

use serde_json::{json, Value};

use crate::api::client::ApiClient;
use crate::api::types::{
  Ack, ActionPlan, CompleteTaskRequest, DailyTask, Goal, GoalsDashboard, Notification,
  NotificationStats, RecordId, TodayCommitment,
};
use crate::error::ApiError;

/// Notes sent when a task is completed from the dashboard.
pub const DASHBOARD_COMPLETION_NOTES: &str = "Completed from Dashboard";

impl ApiClient {
  // ==========================================================================
  // Dashboard, goals, commitments
  // ==========================================================================

  /// Overview payload for the dashboard; its shape is owned by the server.
  pub async fn dashboard(&self, username: &str) -> Result<Value, ApiError> {
    self.get(&format!("/dashboard/{}", username), &[]).await
  }

  pub async fn goals(&self, username: &str, status: Option<&str>) -> Result<Vec<Goal>, ApiError> {
    let params: Vec<(&str, String)> = status
      .map(|s| vec![("status", s.to_string())])
      .unwrap_or_default();
    self.get(&format!("/goals/{}", username), &params).await
  }

  pub async fn goals_dashboard(&self, username: &str) -> Result<GoalsDashboard, ApiError> {
    self.get(&format!("/goals/{}/dashboard", username), &[]).await
  }

  /// Today's commitment, `None` when nothing was committed yet.
  pub async fn commitment_today(&self, username: &str) -> Result<Option<TodayCommitment>, ApiError> {
    self.get(&format!("/commitments/{}/today", username), &[]).await
  }

  /// Commitment statistics over the last `days`, served from the response
  /// cache while fresh.
  pub async fn commitment_stats(&self, username: &str, days: u32) -> Result<Value, ApiError> {
    self
      .get_cached(
        &format!("/commitments/{}/stats", username),
        &[("days", days.to_string())],
        true,
      )
      .await
  }

  // ==========================================================================
  // Tasks
  // ==========================================================================

  pub async fn daily_tasks(&self, username: &str) -> Result<Vec<DailyTask>, ApiError> {
    self.get(&format!("/daily-tasks/{}", username), &[]).await
  }

  pub async fn action_plans(&self, username: &str) -> Result<Vec<ActionPlan>, ApiError> {
    self.get(&format!("/action-plans/{}", username), &[]).await
  }

  pub async fn complete_task(
    &self,
    username: &str,
    plan_id: RecordId,
    task_id: RecordId,
    notes: String,
  ) -> Result<Value, ApiError> {
    let body = serde_json::to_value(CompleteTaskRequest { notes })?;
    self
      .post(
        &format!("/action-plans/{}/{}/tasks/{}/complete", username, plan_id, task_id),
        Some(body),
      )
      .await
  }

  // ==========================================================================
  // Notifications
  // ==========================================================================

  pub async fn notifications(
    &self,
    username: &str,
    limit: u32,
    unread_only: bool,
  ) -> Result<Vec<Notification>, ApiError> {
    let mut params = vec![("limit", limit.to_string())];
    if unread_only {
      params.push(("unread_only", "true".to_string()));
    }
    self.get(&format!("/notifications/{}", username), &params).await
  }

  pub async fn notification_stats(&self, username: &str) -> Result<NotificationStats, ApiError> {
    self.get(&format!("/notifications/{}/stats", username), &[]).await
  }

  pub async fn mark_notification_read(&self, username: &str, id: RecordId) -> Result<Ack, ApiError> {
    self
      .patch(&format!("/notifications/{}/{}/read", username, id), None)
      .await
  }

  pub async fn mark_all_notifications_read(&self, username: &str) -> Result<Ack, ApiError> {
    self
      .post(&format!("/notifications/{}/mark-all-read", username), Some(json!({})))
      .await
  }

  pub async fn delete_notification(&self, username: &str, id: RecordId) -> Result<Ack, ApiError> {
    self
      .delete(&format!("/notifications/{}/{}", username, id))
      .await
  }
}
