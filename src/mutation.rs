//! Optimistic local mutations.
//!
//! [`Optimistic`] holds a piece of local state (a notification inbox, a task
//! board) and applies user actions to it before the server has confirmed
//! them. Each change is applied synchronously when [`Optimistic::mutate`] is
//! called; the returned future only drives the network request and, if that
//! fails or is dropped before it completes, the rollback chosen by
//! [`RollbackPolicy`].

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Reverses one local change. Returned by the closure that applied it.
pub type Undo<S> = Box<dyn FnOnce(&mut S) + Send>;

/// What to do with an optimistic change when the server rejects it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
  /// Undo the local change so the state matches the server again
  #[default]
  Restore,
  /// Keep the local change and only log the failure; the next reload
  /// reconciles with the server
  LeaveApplied,
}

/// Local state that accepts optimistic mutations.
#[derive(Debug)]
pub struct Optimistic<S> {
  state: Mutex<S>,
  policy: RollbackPolicy,
  /// Bumped after every change to `state`
  version: watch::Sender<u64>,
}

impl<S> Optimistic<S> {
  pub fn new(state: S, policy: RollbackPolicy) -> Self {
    Self {
      state: Mutex::new(state),
      policy,
      version: watch::Sender::new(0),
    }
  }

  pub fn policy(&self) -> RollbackPolicy {
    self.policy
  }

  fn lock(&self) -> MutexGuard<'_, S> {
    // Every change is a single closure call, so the state is whole even if
    // a closure panicked
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Receiver that is marked changed whenever the state changes.
  pub fn changes(&self) -> watch::Receiver<u64> {
    self.version.subscribe()
  }

  fn bump(&self) {
    self.version.send_modify(|v| *v += 1);
  }

  /// Run `f` against the current state.
  pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
    f(&self.lock())
  }

  /// Replace the state wholesale, e.g. with a fresh server copy.
  pub fn replace(&self, state: S) {
    *self.lock() = state;
    self.bump();
  }

  /// Apply a change now and send `request` when the returned future is
  /// polled.
  ///
  /// `apply` runs before this function returns, so readers see the change
  /// immediately. It returns the undo for what it did, or `None` when it
  /// changed nothing. `request` is awaited exactly once. When it fails and
  /// the policy is [`RollbackPolicy::Restore`] the undo runs before the error
  /// is returned.
  ///
  /// Dropping the returned future before it completes counts as a failure:
  /// under `Restore` the change is reverted, under `LeaveApplied` it is kept
  /// and logged.
  pub fn mutate<'a, T, A, Fut>(
    &'a self,
    action: &'static str,
    apply: A,
    request: Fut,
  ) -> impl Future<Output = Result<T, ApiError>> + 'a
  where
    A: FnOnce(&mut S) -> Option<Undo<S>>,
    Fut: Future<Output = Result<T, ApiError>> + 'a,
  {
    let undo = apply(&mut self.lock());
    if undo.is_some() {
      self.bump();
    }
    debug!(action, changed = undo.is_some(), "optimistic change applied");
    let mut pending = Pending {
      owner: self,
      action,
      undo,
      settled: false,
    };

    async move {
      let result = request.await;
      let undo = pending.settle();
      let err = match result {
        Ok(value) => return Ok(value),
        Err(err) => err,
      };

      match (self.policy, undo) {
        (RollbackPolicy::Restore, Some(undo)) => {
          undo(&mut self.lock());
          self.bump();
          warn!(action, error = %err, "mutation failed, local change reverted");
        }
        (RollbackPolicy::Restore, None) => {
          warn!(action, error = %err, "mutation failed, nothing to revert");
        }
        (RollbackPolicy::LeaveApplied, _) => {
          warn!(action, error = %err, "mutation failed, local change kept");
        }
      }
      Err(err)
    }
  }
}

/// An applied change whose request has not settled yet.
struct Pending<'a, S> {
  owner: &'a Optimistic<S>,
  action: &'static str,
  undo: Option<Undo<S>>,
  settled: bool,
}

impl<S> Pending<'_, S> {
  fn settle(&mut self) -> Option<Undo<S>> {
    self.settled = true;
    self.undo.take()
  }
}

impl<S> Drop for Pending<'_, S> {
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    let action = self.action;
    match (self.owner.policy, self.undo.take()) {
      (RollbackPolicy::Restore, Some(undo)) => {
        undo(&mut self.owner.lock());
        self.owner.bump();
        warn!(action, "mutation abandoned, local change reverted");
      }
      (RollbackPolicy::Restore, None) => {
        debug!(action, "mutation abandoned, nothing to revert");
      }
      (RollbackPolicy::LeaveApplied, _) => {
        warn!(action, "mutation abandoned, local change kept");
      }
    }
  }
}

impl<S: Clone> Optimistic<S> {
  pub fn snapshot(&self) -> S {
    self.lock().clone()
  }
}
