//! User-facing notifications
//!
//! Every success or failure surfaced by the session ends up here. Without
//! an installed sink, messages go to the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Error;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Error,
    Warning,
    Info,
    Success,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Error => write!(f, "error"),
            NotificationKind::Warning => write!(f, "warning"),
            NotificationKind::Info => write!(f, "info"),
            NotificationKind::Success => write!(f, "success"),
        }
    }
}

/// A single dismissible message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, description)
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, description)
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, title, description)
    }

    /// Build an error notification from a failed operation
    pub fn from_error(context: &str, err: &Error) -> Self {
        Self::new(
            NotificationKind::Error,
            err.title(),
            format!("{}: {}", context, err),
        )
    }
}

/// Output channel for user-facing status
pub trait Notifier: Send + Sync {
    fn add_message(&self, notification: Notification);
}

fn log_notification(n: &Notification) {
    match n.kind {
        NotificationKind::Error => error!(title = %n.title, "{}", n.description),
        NotificationKind::Warning => warn!(title = %n.title, "{}", n.description),
        NotificationKind::Info | NotificationKind::Success => {
            info!(kind = %n.kind, title = %n.title, "{}", n.description)
        }
    }
}

/// Fallback sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn add_message(&self, notification: Notification) {
        log_notification(&notification);
    }
}

/// Bounded list of messages, newest last
pub struct NotificationCenter {
    messages: Mutex<VecDeque<Notification>>,
    max_messages: usize,
}

impl NotificationCenter {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(max_messages)),
            max_messages: max_messages.max(1),
        }
    }

    /// Snapshot of current messages
    pub fn messages(&self) -> Vec<Notification> {
        self.lock().iter().cloned().collect()
    }

    /// Remove a message; returns false if it was already gone
    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut messages = self.lock();
        let before = messages.len();
        messages.retain(|m| m.id != id);
        messages.len() != before
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn latest(&self) -> Option<Notification> {
        self.lock().back().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Notification>> {
        // A poisoned list is still a valid list of messages
        self.messages.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Notifier for NotificationCenter {
    fn add_message(&self, notification: Notification) {
        log_notification(&notification);
        let mut messages = self.lock();
        while messages.len() >= self.max_messages {
            messages.pop_front();
        }
        messages.push_back(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_is_bounded() {
        let center = NotificationCenter::new(2);
        center.add_message(Notification::info("a", "first"));
        center.add_message(Notification::info("b", "second"));
        center.add_message(Notification::info("c", "third"));

        let titles: Vec<_> = center.messages().into_iter().map(|m| m.title).collect();
        assert_eq!(titles, vec!["b", "c"]);
    }

    #[test]
    fn test_dismiss() {
        let center = NotificationCenter::default();
        let n = Notification::success("Done", "ok");
        let id = n.id;
        center.add_message(n);

        assert!(center.dismiss(id));
        assert!(!center.dismiss(id));
        assert!(center.messages().is_empty());
    }

    #[test]
    fn test_from_error() {
        let n = Notification::from_error("Approve #3", &Error::WalletNotConnected);
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.title, "Wallet not connected");
        assert_eq!(n.description, "Approve #3: Wallet not connected");
    }
}
