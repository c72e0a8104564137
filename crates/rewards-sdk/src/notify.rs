//! Transient user-facing notifications
//!
//! Dismissible and auto-expiring. Expiry is evaluated lazily on read, so no
//! timer outlives the notification list.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(skip)]
    expires_at: Instant,
}

pub struct Notifications {
    ttl: Duration,
    entries: Mutex<Vec<Notification>>,
    next_id: AtomicU64,
}

impl Notifications {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn push(&self, kind: NotificationKind, message: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notification = Notification {
            id,
            kind,
            message: message.into(),
            expires_at: Instant::now() + self.ttl,
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|n| n.expires_at > now);
        entries.push(notification);
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(NotificationKind::Success, message)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(NotificationKind::Info, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.push(NotificationKind::Error, message)
    }

    pub fn dismiss(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|n| n.id != id);
    }

    /// Unexpired notifications, newest first
    pub fn active(&self) -> Vec<Notification> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|n| n.expires_at > now);
        entries.iter().rev().cloned().collect()
    }

    /// Most recent unexpired message
    pub fn latest(&self) -> Option<Notification> {
        self.active().into_iter().next()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_newest_first_and_expiry() {
        let notes = Notifications::new(Duration::from_millis(4000));
        notes.info("first");
        tokio::time::advance(Duration::from_millis(1000)).await;
        notes.success("second");

        let active = notes.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].message, "second");
        assert_eq!(active[1].kind, NotificationKind::Info);

        tokio::time::advance(Duration::from_millis(3500)).await;
        let active = notes.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss() {
        let notes = Notifications::new(Duration::from_secs(4));
        let id = notes.error("Failed to claim offer");
        notes.dismiss(id);
        assert!(notes.active().is_empty());
    }
}
