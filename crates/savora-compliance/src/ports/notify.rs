//! Notification sink port.
//!
//! Delivery is fire-and-forget: a failed send is logged and swallowed, and
//! must never block or roll back the state transition it accompanies.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use savora_core::UserId;

use crate::error::Result;

/// Kind of notification, for client-side routing and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A CAPA was assigned to the recipient.
    CapaAssigned,
    /// An overdue CAPA was escalated in the recipient's area.
    CapaEscalated,
    /// The recipient's CAPA was rejected and needs rework.
    CapaRejected,
    /// An audit was flagged by a verifier.
    AuditFlagged,
}

/// Trait for outbound notification delivery.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification to one user.
    async fn notify(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        link_to: Option<&str>,
    ) -> Result<()>;
}

/// Best-effort wrapper around a [`NotificationSink`].
///
/// All engine call sites go through [`Notifier::send`], which logs failures
/// at `warn` and returns nothing — notification is a side channel, not part
/// of the transaction.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    /// Wrap a sink.
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// A notifier that drops everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopNotificationSink))
    }

    /// Send, swallowing and logging any delivery failure.
    pub async fn send(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        link_to: Option<&str>,
    ) {
        if let Err(err) = self
            .sink
            .notify(user_id, kind, title, message, link_to)
            .await
        {
            warn!(%user_id, ?kind, error = %err, "notification delivery failed");
        }
    }
}

/// Sink that discards all notifications.
#[derive(Debug, Default)]
pub struct NoopNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(
        &self,
        _user_id: UserId,
        _kind: NotificationKind,
        _title: &str,
        _message: &str,
        _link_to: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

/// A notification captured by the in-memory sink.
#[derive(Debug, Clone)]
pub struct SentNotification {
    /// Recipient.
    pub user_id: UserId,
    /// Kind.
    pub kind: NotificationKind,
    /// Title line.
    pub title: String,
    /// Body.
    pub message: String,
    /// Deep link, if any.
    pub link_to: Option<String>,
}

/// Recording sink for tests.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    sent: Arc<RwLock<Vec<SentNotification>>>,
}

impl InMemoryNotificationSink {
    /// Create a new recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured notifications, send order.
    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        link_to: Option<&str>,
    ) -> Result<()> {
        self.sent.write().await.push(SentNotification {
            user_id,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            link_to: link_to.map(ToString::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComplianceError;

    struct FailingSink;

    #[async_trait::async_trait]
    impl NotificationSink for FailingSink {
        async fn notify(
            &self,
            _user_id: UserId,
            _kind: NotificationKind,
            _title: &str,
            _message: &str,
            _link_to: Option<&str>,
        ) -> Result<()> {
            Err(ComplianceError::Notification("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn test_send_swallows_failures() {
        let notifier = Notifier::new(Arc::new(FailingSink));
        // Must not panic or propagate.
        notifier
            .send(UserId::new(), NotificationKind::CapaRejected, "t", "m", None)
            .await;
    }

    #[tokio::test]
    async fn test_in_memory_sink_records() {
        let sink = Arc::new(InMemoryNotificationSink::new());
        let notifier = Notifier::new(sink.clone());
        let user = UserId::new();
        notifier
            .send(
                user,
                NotificationKind::CapaEscalated,
                "CAPA escalated",
                "overdue by 5 days",
                Some("/capas/1"),
            )
            .await;

        let sent = sink.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, user);
        assert_eq!(sent[0].kind, NotificationKind::CapaEscalated);
        assert_eq!(sent[0].link_to.as_deref(), Some("/capas/1"));
    }
}
