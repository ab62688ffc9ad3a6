//! Notification inbox with optimistic read/delete.
//!
//! The list and the unread counter live together in [`InboxState`] behind a
//! single lock, so every reader sees a counter that matches the list.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::types::{Ack, Notification, NotificationStats, RecordId};
use crate::api::ApiClient;
use crate::error::ApiError;
use crate::mutation::{Optimistic, RollbackPolicy, Undo};
use crate::poll::PollHandle;

/// How often the inbox reloads when polled.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Number of notifications loaded per reload.
pub const DEFAULT_LIMIT: u32 = 20;

/// Local copy of the user's notifications.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxState {
  pub notifications: Vec<Notification>,
  /// Always the number of unread entries in `notifications`
  pub unread_count: u32,
  /// Counters last reported by the server
  pub stats: Option<NotificationStats>,
}

impl InboxState {
  pub fn from_server(notifications: Vec<Notification>, stats: Option<NotificationStats>) -> Self {
    let unread_count = count_unread(&notifications);
    if let Some(stats) = &stats {
      if stats.unread != unread_count {
        // The list is capped at the load limit, the stats are not
        debug!(
          listed = unread_count,
          reported = stats.unread,
          "unread count differs from server stats"
        );
      }
    }
    Self {
      notifications,
      unread_count,
      stats,
    }
  }

  /// Whether the counter matches the list.
  pub fn is_consistent(&self) -> bool {
    self.unread_count == count_unread(&self.notifications)
  }

  pub fn get(&self, id: RecordId) -> Option<&Notification> {
    self.notifications.iter().find(|n| n.id == id)
  }

  fn get_mut(&mut self, id: RecordId) -> Option<&mut Notification> {
    self.notifications.iter_mut().find(|n| n.id == id)
  }

  pub fn unread(&self) -> impl Iterator<Item = &Notification> {
    self.notifications.iter().filter(|n| !n.read)
  }

  /// Mark one notification read.
  ///
  /// Unknown or already read notifications are left alone.
  pub fn mark_read(&mut self, id: RecordId, now: DateTime<Utc>) -> Option<Undo<Self>> {
    let notification = self.get_mut(id).filter(|n| !n.read)?;
    let previous_read_at = notification.read_at;
    notification.read = true;
    notification.read_at = Some(now);
    self.unread_count = self.unread_count.saturating_sub(1);

    Some(Box::new(move |state: &mut InboxState| {
      if let Some(n) = state.get_mut(id).filter(|n| n.read) {
        n.read = false;
        n.read_at = previous_read_at;
        state.unread_count += 1;
      }
    }))
  }

  /// Mark every notification read and zero the counter.
  pub fn mark_all_read(&mut self, now: DateTime<Utc>) -> Option<Undo<Self>> {
    let previously_unread: Vec<(RecordId, Option<DateTime<Utc>>)> = self
      .notifications
      .iter_mut()
      .filter(|n| !n.read)
      .map(|n| {
        let previous = (n.id, n.read_at);
        n.read = true;
        n.read_at = Some(now);
        previous
      })
      .collect();
    self.unread_count = 0;

    if previously_unread.is_empty() {
      return None;
    }

    Some(Box::new(move |state: &mut InboxState| {
      for (id, read_at) in previously_unread {
        if let Some(n) = state.get_mut(id).filter(|n| n.read) {
          n.read = false;
          n.read_at = read_at;
          state.unread_count += 1;
        }
      }
    }))
  }

  /// Remove a notification, decrementing the counter if it was unread.
  pub fn delete(&mut self, id: RecordId) -> Option<Undo<Self>> {
    let index = self.notifications.iter().position(|n| n.id == id)?;
    let removed = self.notifications.remove(index);
    // Checked on the removed item, before the list changed
    let was_unread = !removed.read;
    if was_unread {
      self.unread_count = self.unread_count.saturating_sub(1);
    }

    Some(Box::new(move |state: &mut InboxState| {
      if state.get(removed.id).is_some() {
        return;
      }
      let index = index.min(state.notifications.len());
      if !removed.read {
        state.unread_count += 1;
      }
      state.notifications.insert(index, removed);
    }))
  }
}

fn count_unread(notifications: &[Notification]) -> u32 {
  notifications.iter().filter(|n| !n.read).count() as u32
}

/// The signed-in user's notifications, kept in sync with the server.
///
/// Reads are served from the local copy. Mutations change the local copy
/// first and then send exactly one request; see [`RollbackPolicy`] for what
/// happens when that request fails.
pub struct NotificationInbox {
  client: ApiClient,
  username: String,
  limit: u32,
  state: Optimistic<InboxState>,
}

impl NotificationInbox {
  pub fn new(client: ApiClient, username: impl Into<String>) -> Self {
    Self {
      client,
      username: username.into(),
      limit: DEFAULT_LIMIT,
      state: Optimistic::new(InboxState::default(), RollbackPolicy::default()),
    }
  }

  pub fn with_limit(mut self, limit: u32) -> Self {
    self.limit = limit;
    self
  }

  pub fn with_rollback(mut self, policy: RollbackPolicy) -> Self {
    self.state = Optimistic::new(self.state.snapshot(), policy);
    self
  }

  pub fn username(&self) -> &str {
    &self.username
  }

  /// Reload the list and the server counters together.
  pub async fn load(&self) -> Result<(), ApiError> {
    let (notifications, stats) = futures::try_join!(
      self.client.notifications(&self.username, self.limit, false),
      self.client.notification_stats(&self.username),
    )?;
    debug!(
      username = %self.username,
      count = notifications.len(),
      "notifications loaded"
    );
    self
      .state
      .replace(InboxState::from_server(notifications, Some(stats)));
    Ok(())
  }

  pub fn snapshot(&self) -> InboxState {
    self.state.snapshot()
  }

  pub fn unread_count(&self) -> u32 {
    self.state.read(|s| s.unread_count)
  }

  /// Receiver marked changed after every local change or reload.
  pub fn changes(&self) -> watch::Receiver<u64> {
    self.state.changes()
  }

  /// Mark one notification read.
  ///
  /// The local copy changes before this returns; the request is sent when
  /// the future is awaited.
  pub fn mark_read(&self, id: RecordId) -> impl Future<Output = Result<Ack, ApiError>> + '_ {
    let now = Utc::now();
    self.state.mutate(
      "mark_read",
      move |state| state.mark_read(id, now),
      self.client.mark_notification_read(&self.username, id),
    )
  }

  pub fn mark_all_read(&self) -> impl Future<Output = Result<Ack, ApiError>> + '_ {
    let now = Utc::now();
    self.state.mutate(
      "mark_all_read",
      move |state| state.mark_all_read(now),
      self.client.mark_all_notifications_read(&self.username),
    )
  }

  pub fn delete(&self, id: RecordId) -> impl Future<Output = Result<Ack, ApiError>> + '_ {
    self.state.mutate(
      "delete",
      move |state| state.delete(id),
      self.client.delete_notification(&self.username, id),
    )
  }

  /// Reload every `interval` until the handle is cancelled or dropped.
  ///
  /// The first reload happens immediately. Failed reloads keep the previous
  /// list.
  pub fn poll(self: &Arc<Self>, interval: Duration) -> PollHandle {
    let inbox = Arc::clone(self);
    info!(username = %self.username, ?interval, "polling notifications");
    PollHandle::spawn(CancellationToken::new(), Some(interval), move || {
      let inbox = Arc::clone(&inbox);
      async move {
        if let Err(err) = inbox.load().await {
          warn!(error = %err, "notification reload failed");
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use mockito::{Matcher, Server};
  use serde_json::json;

  fn notification(id: RecordId, read: bool) -> Notification {
    serde_json::from_value(json!({
      "id": id,
      "title": format!("Notification {}", id),
      "message": "",
      "read": read,
      "created_at": "2024-05-01T09:30:00"
    }))
    .unwrap()
  }

  fn state(items: &[(RecordId, bool)]) -> InboxState {
    InboxState::from_server(
      items.iter().map(|&(id, read)| notification(id, read)).collect(),
      None,
    )
  }

  fn ids(state: &InboxState) -> Vec<RecordId> {
    state.notifications.iter().map(|n| n.id).collect()
  }

  #[test]
  fn test_delete_unread_decrements_counter() {
    let mut inbox = state(&[(1, false), (2, true), (3, false)]);
    assert_eq!(inbox.unread_count, 2);

    let _undo = inbox.delete(3).unwrap();

    assert_eq!(ids(&inbox), vec![1, 2]);
    assert_eq!(inbox.unread_count, 1);
    assert!(inbox.is_consistent());
  }

  #[test]
  fn test_delete_read_keeps_counter() {
    let mut inbox = state(&[(1, false), (2, true)]);
    let _undo = inbox.delete(2).unwrap();
    assert_eq!(inbox.unread_count, 1);
    assert!(inbox.is_consistent());
  }

  #[test]
  fn test_delete_unknown_is_noop() {
    let mut inbox = state(&[(1, false)]);
    assert!(inbox.delete(99).is_none());
    assert_eq!(inbox.unread_count, 1);
  }

  #[test]
  fn test_mark_all_read() {
    let mut inbox = state(&[(1, false), (2, false), (3, true)]);
    let now = Utc::now();

    let _undo = inbox.mark_all_read(now).unwrap();

    assert!(inbox.notifications.iter().all(|n| n.read));
    assert_eq!(inbox.unread_count, 0);
    assert_eq!(inbox.get(1).unwrap().read_at, Some(now));
  }

  #[test]
  fn test_mark_read_twice_decrements_once() {
    let mut inbox = state(&[(1, false), (2, false)]);
    let now = Utc::now();

    assert!(inbox.mark_read(1, now).is_some());
    assert!(inbox.mark_read(1, now).is_none());

    assert_eq!(inbox.unread_count, 1);
    assert!(inbox.is_consistent());
  }

  #[test]
  fn test_undo_restores_previous_state() {
    let original = state(&[(1, false), (2, true), (3, false)]);
    let now = Utc::now();

    let mut inbox = original.clone();
    let undo = inbox.delete(1).unwrap();
    undo(&mut inbox);
    assert_eq!(inbox, original);

    let undo = inbox.mark_all_read(now).unwrap();
    undo(&mut inbox);
    assert_eq!(inbox, original);

    let undo = inbox.mark_read(3, now).unwrap();
    undo(&mut inbox);
    assert_eq!(inbox, original);
  }

  #[test]
  fn test_counter_matches_list_after_every_operation() {
    let mut inbox = state(&[(1, false), (2, false), (3, true), (4, false), (5, true)]);
    let now = Utc::now();

    let steps: Vec<Box<dyn Fn(&mut InboxState)>> = vec![
      Box::new(move |s: &mut InboxState| drop(s.mark_read(1, now))),
      Box::new(move |s: &mut InboxState| drop(s.mark_read(3, now))),
      Box::new(|s: &mut InboxState| drop(s.delete(2))),
      Box::new(|s: &mut InboxState| drop(s.delete(5))),
      Box::new(|s: &mut InboxState| drop(s.delete(42))),
      Box::new(move |s: &mut InboxState| drop(s.mark_all_read(now))),
      Box::new(|s: &mut InboxState| drop(s.delete(4))),
      Box::new(move |s: &mut InboxState| drop(s.mark_all_read(now))),
    ];

    for step in steps {
      step(&mut inbox);
      assert!(inbox.is_consistent(), "counter drifted: {:?}", inbox);
    }
    assert_eq!(inbox.unread_count, 0);
  }

  #[test]
  fn test_counter_never_underflows() {
    let mut inbox = state(&[(1, false)]);
    // Force a drifted counter
    inbox.unread_count = 0;
    let _undo = inbox.mark_read(1, Utc::now()).unwrap();
    assert_eq!(inbox.unread_count, 0);
  }

  /// Loaded inbox plus the list/stats mocks, which must outlive any reload.
  async fn inbox_for(server: &mut Server) -> (NotificationInbox, Vec<mockito::Mock>) {
    let list = server
      .mock("GET", "/notifications/alice")
      .match_query(Matcher::UrlEncoded("limit".into(), "20".into()))
      .with_body(
        json!([
          {"id": 1, "title": "a", "read": false, "created_at": "2024-05-01T09:30:00"},
          {"id": 2, "title": "b", "read": true, "created_at": "2024-05-01T09:00:00"},
          {"id": 3, "title": "c", "read": false, "created_at": "2024-05-01T08:30:00"}
        ])
        .to_string(),
      )
      .create_async()
      .await;
    let stats = server
      .mock("GET", "/notifications/alice/stats")
      .with_body(r#"{"total": 3, "unread": 2, "by_type": {}, "recent_count": 1}"#)
      .create_async()
      .await;

    let config = ApiConfig {
      url: server.url(),
      ..ApiConfig::default()
    };
    let client = ApiClient::new(&config, None).unwrap();
    let inbox = NotificationInbox::new(client, "alice");
    inbox.load().await.unwrap();
    (inbox, vec![list, stats])
  }

  #[tokio::test]
  async fn test_load_fetches_list_and_stats() {
    let mut server = Server::new_async().await;
    let (inbox, _mocks) = inbox_for(&mut server).await;

    let snapshot = inbox.snapshot();
    assert_eq!(ids(&snapshot), vec![1, 2, 3]);
    assert_eq!(snapshot.unread_count, 2);
    assert_eq!(snapshot.stats.unwrap().total, 3);
  }

  #[tokio::test]
  async fn test_delete_sends_one_request() {
    let mut server = Server::new_async().await;
    let (inbox, _mocks) = inbox_for(&mut server).await;
    let mock = server
      .mock("DELETE", "/notifications/alice/3")
      .with_body(r#"{"message": "deleted"}"#)
      .expect(1)
      .create_async()
      .await;

    let pending = inbox.delete(3);
    // Applied before the request settles
    assert_eq!(inbox.unread_count(), 1);
    pending.await.unwrap();

    mock.assert_async().await;
    assert_eq!(ids(&inbox.snapshot()), vec![1, 2]);
    assert_eq!(inbox.unread_count(), 1);
  }

  #[tokio::test]
  async fn test_failed_mark_all_read_is_reverted() {
    let mut server = Server::new_async().await;
    let (inbox, _mocks) = inbox_for(&mut server).await;
    let before = inbox.snapshot();
    let _mock = server
      .mock("POST", "/notifications/alice/mark-all-read")
      .with_status(500)
      .with_body(r#"{"detail": "database unavailable"}"#)
      .create_async()
      .await;

    let err = inbox.mark_all_read().await.unwrap_err();

    assert_eq!(err.to_string(), "database unavailable");
    assert_eq!(inbox.snapshot(), before);
  }

  #[tokio::test]
  async fn test_failed_mark_read_left_applied() {
    let mut server = Server::new_async().await;
    let (inbox, _mocks) = inbox_for(&mut server).await;
    let inbox = inbox.with_rollback(RollbackPolicy::LeaveApplied);
    let _mock = server
      .mock("PATCH", "/notifications/alice/1/read")
      .with_status(503)
      .create_async()
      .await;

    assert!(inbox.mark_read(1).await.is_err());

    let snapshot = inbox.snapshot();
    assert!(snapshot.get(1).unwrap().read);
    assert_eq!(snapshot.unread_count, 1);
    assert!(snapshot.is_consistent());
  }

  #[tokio::test]
  async fn test_poll_reloads_until_cancelled() {
    let mut server = Server::new_async().await;
    let (inbox, _mocks) = inbox_for(&mut server).await;
    let inbox = Arc::new(inbox);
    let mut changes = inbox.changes();

    let handle = inbox.poll(Duration::from_millis(20));
    changes.changed().await.unwrap();
    handle.shutdown().await;

    assert_eq!(inbox.unread_count(), 2);
  }
}
