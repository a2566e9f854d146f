//! User-visible notifications (toasts / announcements).
//!
//! The core fires notifications and never looks at what happens to them.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
  Success,
  Error,
  Warning,
  Info,
}

#[derive(Debug, Clone)]
pub struct Notification {
  pub level: NotificationLevel,
  pub message: String,
  /// How long the UI should keep it visible (UI default if unset)
  pub duration: Option<Duration>,
  pub created_at: DateTime<Utc>,
}

impl Notification {
  pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
    Self {
      level,
      message: message.into(),
      duration: None,
      created_at: Utc::now(),
    }
  }

  pub fn with_duration(mut self, duration: Duration) -> Self {
    self.duration = Some(duration);
    self
  }
}

/// Sink for notifications. Fire-and-forget.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);

  fn success(&self, message: &str) {
    self.notify(Notification::new(NotificationLevel::Success, message));
  }

  fn error(&self, message: &str, duration: Option<Duration>) {
    let n = Notification::new(NotificationLevel::Error, message);
    self.notify(match duration {
      Some(d) => n.with_duration(d),
      None => n,
    });
  }

  fn warning(&self, message: &str) {
    self.notify(Notification::new(NotificationLevel::Warning, message));
  }

  fn info(&self, message: &str) {
    self.notify(Notification::new(NotificationLevel::Info, message));
  }
}

/// Shared handle used throughout the crate.
pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log. Used by the CLI.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, notification: Notification) {
    match notification.level {
      NotificationLevel::Error => tracing::error!(target: "courier::toast", "{}", notification.message),
      NotificationLevel::Warning => tracing::warn!(target: "courier::toast", "{}", notification.message),
      NotificationLevel::Success | NotificationLevel::Info => {
        tracing::info!(target: "courier::toast", "{}", notification.message)
      }
    }
  }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn notifications(&self) -> Vec<Notification> {
    self
      .seen
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .clone()
  }

  pub fn messages(&self, level: NotificationLevel) -> Vec<String> {
    self
      .notifications()
      .into_iter()
      .filter(|n| n.level == level)
      .map(|n| n.message)
      .collect()
  }

  pub fn count(&self) -> usize {
    self.notifications().len()
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, notification: Notification) {
    self
      .seen
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .push(notification);
  }
}
