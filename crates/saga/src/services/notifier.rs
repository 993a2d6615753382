//! Notifier trait and its implementations.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One follow-up message. Rendering it is the notifier's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub purchase_id: AggregateId,
    pub tag: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub product_name: String,
    pub event_start: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError>;
}

#[derive(Debug, Default)]
struct Outbox {
    sent: Vec<Notification>,
    fail: bool,
}

/// Records notifications instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    outbox: Arc<Mutex<Outbox>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.lock().sent.clone()
    }

    /// Tags sent for one purchase, in send order.
    pub fn tags_for(&self, purchase_id: AggregateId) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter(|n| n.purchase_id == purchase_id)
            .map(|n| n.tag.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError> {
        let mut outbox = self.lock();
        if outbox.fail {
            return Err(NotifierError::Delivery {
                recipient: notification.recipient_email.clone(),
                reason: "mailbox unavailable".to_string(),
            });
        }
        outbox.sent.push(notification.clone());
        Ok(())
    }
}

/// Writes each notification to the log. Used by the server binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError> {
        tracing::info!(
            purchase_id = %notification.purchase_id,
            tag = %notification.tag,
            to = %notification.recipient_email,
            product = %notification.product_name,
            "notification sent"
        );
        Ok(())
    }
}
