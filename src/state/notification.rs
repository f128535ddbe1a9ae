use super::message::Message;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub code: &'static str,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Channel through which the connection layer talks to the user.
///
/// Cloning is cheap; clones share the same queue and subscribers.
#[derive(Debug, Clone)]
pub struct NotificationManager {
    queue: Arc<Mutex<VecDeque<Notification>>>,
    sender: broadcast::Sender<Notification>,
    capacity: usize,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            sender,
            capacity: capacity.max(1),
        }
    }

    pub fn info(&self, message: Message) {
        tracing::info!(code = message.code(), "{}", message);
        self.push(NotificationKind::Info, message);
    }

    pub fn user_warning(&self, message: Message) {
        tracing::warn!(code = message.code(), "{}", message);
        self.push(NotificationKind::Warning, message);
    }

    pub fn user_error(&self, message: Message) {
        tracing::error!(code = message.code(), "{}", message);
        self.push(NotificationKind::Error, message);
    }

    fn push(&self, kind: NotificationKind, message: Message) {
        let notification = Notification {
            id: Uuid::new_v4(),
            kind,
            code: message.code(),
            message: message.to_string(),
            created_at: Utc::now(),
        };
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() == self.capacity {
                queue.pop_front();
            }
            queue.push_back(notification.clone());
        }
        // No subscribers is fine, the queue still holds it
        let _ = self.sender.send(notification);
    }

    /// Snapshot of the pending notifications, oldest first
    pub fn queue(&self) -> Vec<Notification> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn dismiss(&self, id: Uuid) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|n| n.id != id);
    }

    pub fn dismiss_all(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Count of queued notifications with the given code
    pub fn count(&self, code: &str) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|n| n.code == code)
            .count()
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}
