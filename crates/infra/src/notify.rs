//! Best-effort notifications for escalations and alerts.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use stockroute_core::{AggregateId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Escalation,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub tenant_id: TenantId,
    pub kind: NotificationKind,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    /// The record the notification is about.
    pub reference: Option<AggregateId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification has no recipients")]
    NoRecipients,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError>;
}

impl<D> NotificationDispatcher for Arc<D>
where
    D: NotificationDispatcher + ?Sized,
{
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        (**self).dispatch(notification)
    }
}

/// Send `notification`, logging instead of failing. Returns whether it went out.
pub fn notify_best_effort(dispatcher: &dyn NotificationDispatcher, notification: Notification) -> bool {
    if notification.recipients.is_empty() {
        debug!(tenant = %notification.tenant_id, subject = %notification.subject, "no recipients configured; notification skipped");
        return false;
    }
    match dispatcher.dispatch(&notification) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                tenant = %notification.tenant_id,
                kind = ?notification.kind,
                error = %e,
                "notification dispatch failed"
            );
            false
        }
    }
}

/// Keeps every notification in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationDispatcher for InMemoryNotifier {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        if notification.recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::Delivery("lock poisoned".to_string()))?;
        sent.push(notification.clone());
        Ok(())
    }
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl NotificationDispatcher for NoopNotifier {
    fn dispatch(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(recipients: &[&str]) -> Notification {
        Notification {
            tenant_id: TenantId::new(),
            kind: NotificationKind::Escalation,
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: "Emergency transfer escalated".to_string(),
            body: "level 1".to_string(),
            reference: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn delivered_notifications_are_recorded() {
        let notifier = InMemoryNotifier::new();
        assert!(notify_best_effort(&notifier, notification(&["ops@example.com"])));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn missing_recipients_are_skipped_quietly() {
        let notifier = InMemoryNotifier::new();
        assert!(!notify_best_effort(&notifier, notification(&[])));
        assert!(notifier.sent().is_empty());
    }

    struct Broken;

    impl NotificationDispatcher for Broken {
        fn dispatch(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp down".to_string()))
        }
    }

    #[test]
    fn delivery_failure_is_swallowed() {
        assert!(!notify_best_effort(&Broken, notification(&["ops@example.com"])));
    }
}
