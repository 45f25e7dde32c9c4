//! Post-commit notification collaborator.
//!
//! Publishing happens after the unit of work commits and holds no lock.
//! Delivery is at-least-once: a failure is reported to the caller, who
//! redelivers using the notification's `idempotency_key`. The settlement
//! itself is never retried for a delivery failure.

use async_trait::async_trait;
use tally_types::{Result, SettlementNotification, TallyError, constants};
use tokio::sync::mpsc::{self, error::TrySendError};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one notification. An error means it was not accepted.
    async fn publish(&self, notification: &SettlementNotification) -> Result<()>;
}

/// Notifier backed by a bounded `tokio` channel. A full or closed channel
/// is a delivery failure.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<SettlementNotification>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SettlementNotification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    #[must_use]
    pub fn with_default_capacity() -> (Self, mpsc::Receiver<SettlementNotification>) {
        Self::new(constants::DEFAULT_NOTIFICATION_CAPACITY)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(&self, notification: &SettlementNotification) -> Result<()> {
        self.sender
            .try_send(notification.clone())
            .map_err(|err| match err {
                TrySendError::Full(_) => TallyError::NotificationFailed {
                    movement: notification.movement.id,
                    reason: "notification channel full".into(),
                },
                TrySendError::Closed(_) => TallyError::NotificationFailed {
                    movement: notification.movement.id,
                    reason: "notification channel closed".into(),
                },
            })?;
        tracing::debug!(
            movement = %notification.movement.id,
            status = %notification.status,
            key = %notification.idempotency_key,
            "Notification published"
        );
        Ok(())
    }
}
