use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::wire::Notification;

/// Buffer between the notification listener, which must never block, and
/// the draining consumer. Unbounded; a result burst is small compared to
/// what the outbound side already accumulates.
pub struct NotificationQueue {
    queue: Mutex<VecDeque<Notification>>,
    available: Notify,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    fn locked(&self) -> MutexGuard<'_, VecDeque<Notification>> {
        self.queue.lock().expect("notification queue lock poisoned")
    }

    pub fn push(&self, notification: Notification) {
        self.locked().push_back(notification);
        self.available.notify_one();
    }

    pub fn pop(&self) -> Option<Notification> {
        self.locked().pop_front()
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    pub fn clear(&self) {
        self.locked().clear();
    }

    /// Wakes one drain waiter without queueing anything. Used for status
    /// transitions, which the listener folds into the gate instead.
    pub fn wake(&self) {
        self.available.notify_one();
    }

    /// Resolves once new notifications may be available. A wake that
    /// happened before this call is not lost.
    pub async fn notified(&self) {
        self.available.notified().await;
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}
