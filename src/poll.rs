//! Cancellable background polling.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Handle to a spawned polling task.
///
/// The job runs once immediately and then every `period`. Cancelling the
/// handle (explicitly or by dropping it) stops the task at its next await
/// point: no further job is started, and a job that is in flight is dropped.
#[derive(Debug)]
pub struct PollHandle {
  token: CancellationToken,
  task: Option<JoinHandle<()>>,
}

impl PollHandle {
  /// Spawn `job` on the tokio runtime.
  ///
  /// With `period = None` the job runs once. Cancelling `token` (or any of
  /// its parents) stops the task as well.
  pub fn spawn<F, Fut>(token: CancellationToken, period: Option<Duration>, mut job: F) -> Self
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let task_token = token.clone();
    let task = tokio::spawn(async move {
      let Some(period) = period else {
        tokio::select! {
          biased;
          _ = task_token.cancelled() => {}
          _ = job() => {}
        }
        return;
      };

      // tokio intervals reject a zero period
      let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      debug!(?period, "polling started");

      loop {
        tokio::select! {
          biased;
          _ = task_token.cancelled() => break,
          _ = interval.tick() => {}
        }

        trace!("poll tick");
        tokio::select! {
          biased;
          _ = task_token.cancelled() => break,
          _ = job() => {}
        }
      }

      debug!("polling stopped");
    });

    Self {
      token,
      task: Some(task),
    }
  }

  /// Stop the task. Idempotent.
  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Whether the task has exited.
  pub fn is_finished(&self) -> bool {
    self.task.as_ref().map_or(true, |t| t.is_finished())
  }

  /// Cancel and wait for the task to exit.
  pub async fn shutdown(mut self) {
    self.token.cancel();
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }
}

impl Drop for PollHandle {
  fn drop(&mut self) {
    self.token.cancel();
  }
}
