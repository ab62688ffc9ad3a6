//! The dashboard view's data: a set of queries plus the task board.

use std::future::Future;

use serde_json::Value;
use tracing::debug;

use crate::api::types::{GoalsDashboard, TodayCommitment};
use crate::api::{ApiClient, ApiQueryKey};
use crate::cache::QueryKey;
use crate::error::ApiError;
use crate::mutation::RollbackPolicy;
use crate::query::{FetchOutcome, Query, QueryOptions};
use crate::tasks::TaskBoard;

/// Everything the dashboard shows for one user.
///
/// Queries share the client's [`FetchCache`](crate::cache::FetchCache), so a
/// dashboard built again within the stale time starts from cached data.
pub struct Dashboard {
  pub overview: Query<Value>,
  pub goals: Query<GoalsDashboard>,
  pub commitment: Query<Option<TodayCommitment>>,
  pub tasks: TaskBoard,
}

impl Dashboard {
  pub fn new(
    client: &ApiClient,
    username: &str,
    options: QueryOptions,
    rollback: RollbackPolicy,
  ) -> Self {
    let user = username.to_string();
    Self {
      overview: query(
        client,
        ApiQueryKey::Dashboard { username: user.clone() },
        &options,
        |api, user| async move { api.dashboard(&user).await },
      ),
      goals: query(
        client,
        ApiQueryKey::GoalsDashboard { username: user.clone() },
        &options,
        |api, user| async move { api.goals_dashboard(&user).await },
      ),
      commitment: query(
        client,
        ApiQueryKey::CommitmentToday { username: user.clone() },
        &options,
        |api, user| async move { api.commitment_today(&user).await },
      ),
      tasks: TaskBoard::new(client.clone(), user).with_rollback(rollback),
    }
  }

  /// Activate every query; the task board is loaded once.
  pub async fn start(&self) -> Result<(), ApiError> {
    self.overview.start();
    self.goals.start();
    self.commitment.start();
    self.tasks.load().await
  }

  /// Fetch everything at once. With `force` fresh data is refetched too.
  ///
  /// Query failures are kept in each query's state; the first one is
  /// returned alongside a task board failure.
  pub async fn refresh(&self, force: bool) -> Result<(), ApiError> {
    let (overview, goals, commitment, tasks) = futures::join!(
      self.overview.fetch_data(force),
      self.goals.fetch_data(force),
      self.commitment.fetch_data(force),
      self.tasks.load(),
    );
    debug!(?overview, ?goals, ?commitment, "dashboard refreshed");

    for outcome in [overview, goals, commitment] {
      if let FetchOutcome::Failed(err) = outcome {
        return Err(err);
      }
    }
    tasks
  }

  pub fn is_loading(&self) -> bool {
    self.overview.is_loading() || self.goals.is_loading() || self.commitment.is_loading()
  }

  /// Stop polling and abandon in-flight fetches.
  pub fn dispose(&self) {
    self.overview.dispose();
    self.goals.dispose();
    self.commitment.dispose();
  }
}

fn query<T, F, Fut>(
  client: &ApiClient,
  key: ApiQueryKey,
  options: &QueryOptions,
  fetch: F,
) -> Query<T>
where
  T: Clone + Send + Sync + 'static,
  F: Fn(ApiClient, String) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
  let api = client.clone();
  let username = key.username().to_string();
  debug!(query = %key.description(), "creating dashboard query");
  Query::new(key, move || fetch(api.clone(), username.clone()))
    .with_options(options.clone())
    .with_cache(client.cache().clone())
}
