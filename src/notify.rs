//! User-facing notification surface ("toasts").

use std::fmt;

use tracing::{error, info, warn};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
  Success,
  Info,
  Warning,
  Error,
}

impl fmt::Display for NotifyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      NotifyKind::Success => "success",
      NotifyKind::Info => "info",
      NotifyKind::Warning => "warning",
      NotifyKind::Error => "error",
    };
    f.write_str(label)
  }
}

/// Somewhere to surface transient messages to the user.
pub trait Notifier: Send + Sync {
  fn notify(&self, kind: NotifyKind, title: &str, message: &str);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, kind: NotifyKind, title: &str, message: &str) {
    match kind {
      NotifyKind::Error => error!(title, message, "notify"),
      NotifyKind::Warning => warn!(title, message, "notify"),
      NotifyKind::Success | NotifyKind::Info => info!(title, message, "notify"),
    }
  }
}

/// Notifier that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
  fn notify(&self, _kind: NotifyKind, _title: &str, _message: &str) {}
}
