use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::debug;

use mentor_sync::api::types::{Notification, Priority, RecordId, TaskStatus};
use mentor_sync::config::Config;
use mentor_sync::dashboard::Dashboard;
use mentor_sync::notifications::NotificationInbox;
use mentor_sync::notify::{Notifier, NotifyKind};
use mentor_sync::query::Query;
use mentor_sync::tasks::TaskBoard;
use mentor_sync::ApiClient;

/// Poll period for `dashboard --watch` when none is configured.
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(60);

/// Window of the commitment stats shown on the dashboard.
const COMMITMENT_STATS_DAYS: u32 = 30;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Show goals, today's commitment and tasks
  Dashboard {
    /// Keep polling and reprint on change until Ctrl-C
    #[arg(short, long)]
    watch: bool,
  },
  /// List and manage notifications
  Notifications {
    #[command(subcommand)]
    action: Option<NotificationsCommand>,
  },
  /// List and complete today's tasks
  Tasks {
    #[command(subcommand)]
    action: Option<TasksCommand>,
  },
}

#[derive(Subcommand, Debug)]
pub enum NotificationsCommand {
  /// Show the latest notifications
  List {
    /// Only unread ones
    #[arg(long)]
    unread: bool,
  },
  /// Poll and print new notifications until Ctrl-C
  Watch,
  /// Mark one notification read
  Read { id: RecordId },
  /// Mark every notification read
  ReadAll,
  /// Delete a notification
  Delete { id: RecordId },
}

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
  /// Show today's tasks
  List,
  /// Mark a task completed
  Complete { id: RecordId },
}

/// Prints notifications to stderr so they don't mix with command output.
struct StderrNotifier;

impl Notifier for StderrNotifier {
  fn notify(&self, kind: NotifyKind, title: &str, message: &str) {
    eprintln!("[{}] {}: {}", kind, title, message);
  }
}

/// Command runner
pub struct App {
  config: Config,
  client: ApiClient,
  username: String,
  notifier: Arc<dyn Notifier>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let username = config.username()?.to_string();
    let notifier: Arc<dyn Notifier> = Arc::new(StderrNotifier);
    let client = ApiClient::new(&config.api, Config::get_api_key().as_deref())
      .map_err(|e| eyre!("Failed to create API client: {}", e))?
      .with_notifier(Arc::clone(&notifier));

    debug!(url = %client.base_url(), username = %username, "client ready");
    Ok(Self {
      config,
      client,
      username,
      notifier,
    })
  }

  pub async fn run(self, command: Command) -> Result<()> {
    match command {
      Command::Dashboard { watch } => self.dashboard(watch).await,
      Command::Notifications { action } => {
        self
          .notifications(action.unwrap_or(NotificationsCommand::List { unread: false }))
          .await
      }
      Command::Tasks { action } => self.tasks(action.unwrap_or(TasksCommand::List)).await,
    }
  }

  // ==========================================================================
  // Dashboard
  // ==========================================================================

  async fn dashboard(&self, watch: bool) -> Result<()> {
    let mut options = self.config.sync.query_options();
    if watch && options.refetch_interval.is_none() {
      options.refetch_interval = Some(DEFAULT_WATCH_INTERVAL);
    }
    let dashboard = Dashboard::new(&self.client, &self.username, options, self.config.sync.rollback);

    if !watch {
      let result = dashboard.refresh(false).await;
      self.print_dashboard(&dashboard).await;
      return Ok(result?);
    }

    dashboard.start().await?;
    let mut overview = dashboard.overview.subscribe();
    let mut goals = dashboard.goals.subscribe();
    let mut commitment = dashboard.commitment.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
      let changed = tokio::select! {
        _ = &mut ctrl_c => break,
        res = overview.changed() => res,
        res = goals.changed() => res,
        res = commitment.changed() => res,
      };
      if changed.is_err() {
        break;
      }
      if !dashboard.is_loading() {
        self.print_dashboard(&dashboard).await;
      }
    }

    dashboard.dispose();
    Ok(())
  }

  async fn print_dashboard(&self, dashboard: &Dashboard) {
    println!("== Dashboard for {} ==", self.username);

    if let Some(overview) = query_data(&dashboard.overview) {
      print_scalars(&overview);
    }

    if let Some(goals) = query_data(&dashboard.goals) {
      println!("\nActive goals ({})", goals.active_goals.len());
      for goal in &goals.active_goals {
        println!("  - {} ({:.0}%)", goal.title, goal.progress);
      }
    }

    if let Some(commitment) = query_data(&dashboard.commitment) {
      match commitment.and_then(|c| c.commitment.map(|text| (text, c.shipped))) {
        Some((text, Some(true))) => println!("\nToday: {} [shipped]", text),
        Some((text, _)) => println!("\nToday: {}", text),
        None => println!("\nNo commitment yet today"),
      }
    }

    // Failures are already reported by the notifier
    if let Ok(stats) = self
      .client
      .commitment_stats(&self.username, COMMITMENT_STATS_DAYS)
      .await
    {
      println!("\nLast {} days", COMMITMENT_STATS_DAYS);
      print_scalars(&stats);
    }

    print_tasks(&dashboard.tasks);
  }

  // ==========================================================================
  // Notifications
  // ==========================================================================

  fn inbox(&self) -> NotificationInbox {
    NotificationInbox::new(self.client.clone(), self.username.clone())
      .with_limit(self.config.sync.notifications_limit)
      .with_rollback(self.config.sync.rollback)
  }

  async fn notifications(&self, action: NotificationsCommand) -> Result<()> {
    let inbox = self.inbox();
    inbox.load().await?;

    match action {
      NotificationsCommand::List { unread } => {
        let state = inbox.snapshot();
        println!("{} unread", state.unread_count);
        for n in state.notifications.iter().filter(|n| !unread || !n.read) {
          print_notification(n);
        }
      }
      NotificationsCommand::Watch => self.watch_notifications(Arc::new(inbox)).await?,
      NotificationsCommand::Read { id } => {
        inbox.mark_read(id).await?;
        self
          .notifier
          .notify(NotifyKind::Success, "Done", "Notification marked as read");
      }
      NotificationsCommand::ReadAll => {
        inbox.mark_all_read().await?;
        self
          .notifier
          .notify(NotifyKind::Success, "Done", "All notifications marked as read");
      }
      NotificationsCommand::Delete { id } => {
        inbox.delete(id).await?;
        self
          .notifier
          .notify(NotifyKind::Success, "Done", "Notification deleted");
      }
    }
    Ok(())
  }

  async fn watch_notifications(&self, inbox: Arc<NotificationInbox>) -> Result<()> {
    let mut seen: HashSet<RecordId> = HashSet::new();
    // The poller reloads right away, so the first change prints the list
    let mut changes = inbox.changes();
    let poller = inbox.poll(self.config.sync.notifications_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
      tokio::select! {
        _ = &mut ctrl_c => break,
        res = changes.changed() => {
          if res.is_err() {
            break;
          }
        }
      }

      let state = inbox.snapshot();
      let fresh: Vec<&Notification> = state
        .notifications
        .iter()
        .filter(|n| seen.insert(n.id))
        .collect();
      if !fresh.is_empty() {
        println!("-- {} unread --", state.unread_count);
        for n in fresh {
          print_notification(n);
        }
      }
    }

    poller.shutdown().await;
    Ok(())
  }

  // ==========================================================================
  // Tasks
  // ==========================================================================

  async fn tasks(&self, action: TasksCommand) -> Result<()> {
    let board = TaskBoard::new(self.client.clone(), self.username.clone())
      .with_rollback(self.config.sync.rollback);
    board.load().await?;

    match action {
      TasksCommand::List => print_tasks(&board),
      TasksCommand::Complete { id } => {
        if board.complete(id).await? {
          self
            .notifier
            .notify(NotifyKind::Success, "Done", "Task completed");
        } else {
          self.notifier.notify(
            NotifyKind::Info,
            "Nothing to do",
            &format!("Task {} is already completed or not on today's list", id),
          );
        }
      }
    }
    Ok(())
  }
}

fn query_data<T: Clone + Send + Sync + 'static>(query: &Query<T>) -> Option<T> {
  let state = query.state();
  if let Some(err) = state.error() {
    println!("\n{}: {}", query.key(), err);
  }
  state.data
}

fn print_scalars(value: &Value) {
  let Some(object) = value.as_object() else {
    return;
  };
  for (key, value) in object {
    match value {
      Value::Number(n) => println!("  {}: {}", key, n),
      Value::Bool(b) => println!("  {}: {}", key, b),
      Value::String(s) => println!("  {}: {}", key, s),
      _ => {}
    }
  }
}

fn print_tasks(board: &TaskBoard) {
  let state = board.snapshot();
  println!(
    "\nToday's tasks ({}/{} done)",
    state.completed_count(),
    state.tasks.len()
  );
  for task in &state.tasks {
    let mark = match task.status {
      TaskStatus::Completed => "x",
      TaskStatus::InProgress => "~",
      TaskStatus::Skipped => "-",
      _ => " ",
    };
    let estimate = task
      .estimated_time
      .map(|m| format!(" ({} min)", m))
      .unwrap_or_default();
    println!("  [{}] #{} {}{}", mark, task.id, task.title, estimate);
  }
}

fn print_notification(n: &Notification) {
  let dot = if n.read { " " } else { "*" };
  let priority = match &n.priority {
    Priority::Urgent | Priority::High => format!(" [{}]", n.priority),
    _ => String::new(),
  };
  println!(
    "{} #{} {}{} ({})",
    dot,
    n.id,
    n.title,
    priority,
    n.created_at.with_timezone(&Local).format("%b %d %H:%M")
  );
  if !n.message.is_empty() {
    println!("    {}", n.message);
  }
}
