//! Today's tasks with optimistic completion.

use std::future::Future;

use tokio::sync::watch;
use tracing::debug;

use crate::api::types::{ActionPlan, DailyTask, RecordId, TaskStatus};
use crate::api::{ApiClient, ApiQueryKey, DASHBOARD_COMPLETION_NOTES};
use crate::cache::QueryKey;
use crate::error::ApiError;
use crate::mutation::{Optimistic, RollbackPolicy, Undo};

/// Local copy of the daily tasks and the plans they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardState {
  pub tasks: Vec<DailyTask>,
  pub plans: Vec<ActionPlan>,
}

impl BoardState {
  pub fn get(&self, task_id: RecordId) -> Option<&DailyTask> {
    self.tasks.iter().find(|t| t.id == task_id)
  }

  /// Plan a task belongs to: its own `action_plan_id`, or else the loaded
  /// plan that lists it.
  pub fn plan_for(&self, task_id: RecordId) -> Option<RecordId> {
    self
      .get(task_id)
      .and_then(|t| t.action_plan_id)
      .or_else(|| {
        self
          .plans
          .iter()
          .find(|p| p.daily_tasks.iter().any(|t| t.id == task_id))
          .map(|p| p.id)
      })
  }

  pub fn completed_count(&self) -> usize {
    self
      .tasks
      .iter()
      .filter(|t| t.status == TaskStatus::Completed)
      .count()
  }

  /// Set a task's status, returning how to put the old one back.
  pub fn set_status(&mut self, task_id: RecordId, status: TaskStatus) -> Option<Undo<Self>> {
    let task = self
      .tasks
      .iter_mut()
      .find(|t| t.id == task_id)
      .filter(|t| t.status != status)?;
    let previous = std::mem::replace(&mut task.status, status.clone());

    Some(Box::new(move |state: &mut BoardState| {
      if let Some(task) = state
        .tasks
        .iter_mut()
        .find(|t| t.id == task_id && t.status == status)
      {
        task.status = previous;
      }
    }))
  }
}

/// The user's daily tasks, completed optimistically.
pub struct TaskBoard {
  client: ApiClient,
  username: String,
  state: Optimistic<BoardState>,
}

impl TaskBoard {
  pub fn new(client: ApiClient, username: impl Into<String>) -> Self {
    Self {
      client,
      username: username.into(),
      state: Optimistic::new(BoardState::default(), RollbackPolicy::default()),
    }
  }

  pub fn with_rollback(mut self, policy: RollbackPolicy) -> Self {
    self.state = Optimistic::new(self.state.snapshot(), policy);
    self
  }

  /// Reload tasks and plans together.
  pub async fn load(&self) -> Result<(), ApiError> {
    let (tasks, plans) = futures::try_join!(
      self.client.daily_tasks(&self.username),
      self.client.action_plans(&self.username),
    )?;
    debug!(tasks = tasks.len(), plans = plans.len(), "task board loaded");
    self.state.replace(BoardState { tasks, plans });
    Ok(())
  }

  pub fn snapshot(&self) -> BoardState {
    self.state.snapshot()
  }

  pub fn changes(&self) -> watch::Receiver<u64> {
    self.state.changes()
  }

  /// Mark a task completed.
  ///
  /// The status flips locally before this returns. Resolves to `false`
  /// without a request when the task is unknown or already completed, and
  /// fails with [`ApiError::Invalid`] without touching anything when the
  /// task's plan cannot be determined. Once the server accepts the
  /// completion, cached goal progress and the dashboard overview for the
  /// user are invalidated.
  pub fn complete(&self, task_id: RecordId) -> impl Future<Output = Result<bool, ApiError>> + '_ {
    let step = self.completion_plan(task_id).map(|plan| {
      plan.map(|plan_id| {
        self.state.mutate(
          "complete_task",
          move |state| state.set_status(task_id, TaskStatus::Completed),
          self.client.complete_task(
            &self.username,
            plan_id,
            task_id,
            DASHBOARD_COMPLETION_NOTES.to_string(),
          ),
        )
      })
    });

    async move {
      match step? {
        Some(request) => {
          request.await?;
          self.invalidate_progress();
          Ok(true)
        }
        None => Ok(false),
      }
    }
  }

  fn invalidate_progress(&self) {
    let cache = self.client.cache();
    let overview = ApiQueryKey::Dashboard {
      username: self.username.clone(),
    };
    let removed = cache.invalidate_prefix(&ApiQueryKey::goals_prefix(&self.username))
      + usize::from(cache.invalidate(&overview.cache_key()));
    debug!(username = %self.username, removed, "invalidated cached progress");
  }

  fn completion_plan(&self, task_id: RecordId) -> Result<Option<RecordId>, ApiError> {
    self.state.read(|state| {
      let Some(task) = state.get(task_id) else {
        debug!(task_id, "task not on board");
        return Ok(None);
      };
      if task.status == TaskStatus::Completed {
        return Ok(None);
      }
      state
        .plan_for(task_id)
        .map(Some)
        .ok_or_else(|| ApiError::Invalid(format!("Plan ID not found for task {}", task_id)))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use mockito::{Matcher, Server};
  use serde_json::json;

  fn task(id: RecordId, status: &str, plan: Option<RecordId>) -> DailyTask {
    serde_json::from_value(json!({
      "id": id,
      "title": format!("Task {}", id),
      "status": status,
      "action_plan_id": plan
    }))
    .unwrap()
  }

  #[test]
  fn test_plan_for_falls_back_to_plan_listing() {
    let plan: ActionPlan = serde_json::from_value(json!({
      "id": 9,
      "title": "Learn Rust",
      "daily_tasks": [{"id": 2, "title": "Read the book"}]
    }))
    .unwrap();
    let state = BoardState {
      tasks: vec![task(1, "pending", Some(3)), task(2, "pending", None), task(4, "pending", None)],
      plans: vec![plan],
    };

    assert_eq!(state.plan_for(1), Some(3));
    assert_eq!(state.plan_for(2), Some(9));
    assert_eq!(state.plan_for(4), None);
  }

  #[test]
  fn test_set_status_undo_restores_previous() {
    let mut state = BoardState {
      tasks: vec![task(1, "in_progress", Some(3))],
      plans: vec![],
    };

    let undo = state.set_status(1, TaskStatus::Completed).unwrap();
    assert_eq!(state.completed_count(), 1);
    assert!(state.set_status(1, TaskStatus::Completed).is_none());

    undo(&mut state);
    assert_eq!(state.get(1).unwrap().status, TaskStatus::InProgress);
  }

  async fn board_for(server: &mut Server, tasks: serde_json::Value) -> TaskBoard {
    let _tasks = server
      .mock("GET", "/daily-tasks/alice")
      .with_body(tasks.to_string())
      .create_async()
      .await;
    let _plans = server
      .mock("GET", "/action-plans/alice")
      .with_body("[]")
      .create_async()
      .await;

    let config = ApiConfig {
      url: server.url(),
      ..ApiConfig::default()
    };
    let board = TaskBoard::new(ApiClient::new(&config, None).unwrap(), "alice");
    board.load().await.unwrap();
    board
  }

  #[tokio::test]
  async fn test_complete_posts_once() {
    let mut server = Server::new_async().await;
    let board = board_for(
      &mut server,
      json!([{"id": 12, "title": "Ship", "status": "pending", "action_plan_id": 3}]),
    )
    .await;
    let mock = server
      .mock("POST", "/action-plans/alice/3/tasks/12/complete")
      .match_body(Matcher::Json(json!({"notes": "Completed from Dashboard"})))
      .with_body("{}")
      .expect(1)
      .create_async()
      .await;

    let pending = board.complete(12);
    assert_eq!(board.snapshot().get(12).unwrap().status, TaskStatus::Completed);
    assert!(pending.await.unwrap());

    // Second completion is a no-op
    assert!(!board.complete(12).await.unwrap());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_complete_invalidates_cached_progress() {
    let mut server = Server::new_async().await;
    let board = board_for(
      &mut server,
      json!([{"id": 12, "title": "Ship", "status": "pending", "action_plan_id": 3}]),
    )
    .await;
    let _mock = server
      .mock("POST", "/action-plans/alice/3/tasks/12/complete")
      .with_body("{}")
      .create_async()
      .await;

    let cache = board.client.cache();
    cache.set("goals:alice:dashboard", 1u8);
    cache.set("dashboard:alice", 2u8);
    cache.set("goals:alice2:dashboard", 3u8);
    cache.set("commitments:alice:today", 4u8);

    assert!(board.complete(12).await.unwrap());

    assert_eq!(cache.len(), 2);
    assert!(cache.invalidate("goals:alice2:dashboard"));
    assert!(cache.invalidate("commitments:alice:today"));
  }

  #[tokio::test]
  async fn test_failed_complete_keeps_cache() {
    let mut server = Server::new_async().await;
    let board = board_for(
      &mut server,
      json!([{"id": 12, "title": "Ship", "status": "pending", "action_plan_id": 3}]),
    )
    .await;
    let _mock = server
      .mock("POST", "/action-plans/alice/3/tasks/12/complete")
      .with_status(500)
      .create_async()
      .await;
    board.client.cache().set("goals:alice:dashboard", 1u8);

    assert!(board.complete(12).await.is_err());
    assert_eq!(board.client.cache().len(), 1);
  }

  #[tokio::test]
  async fn test_complete_failure_restores_status() {
    let mut server = Server::new_async().await;
    let board = board_for(
      &mut server,
      json!([{"id": 12, "title": "Ship", "status": "in_progress", "action_plan_id": 3}]),
    )
    .await;
    let _mock = server
      .mock("POST", "/action-plans/alice/3/tasks/12/complete")
      .with_status(500)
      .create_async()
      .await;

    let err = board.complete(12).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(board.snapshot().get(12).unwrap().status, TaskStatus::InProgress);
  }

  #[tokio::test]
  async fn test_complete_without_plan_fails_before_request() {
    let mut server = Server::new_async().await;
    let board = board_for(&mut server, json!([{"id": 5, "title": "Orphan", "status": "pending"}])).await;
    let mock = server
      .mock("POST", Matcher::Any)
      .expect(0)
      .create_async()
      .await;

    let err = board.complete(5).await.unwrap_err();

    assert!(matches!(err, ApiError::Invalid(_)));
    assert_eq!(board.snapshot().get(5).unwrap().status, TaskStatus::Pending);
    assert!(!board.complete(404).await.unwrap());
    mock.assert_async().await;
  }
}
