//! Notification delivery trait and implementations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::FulfillmentError;
use crate::notification::{NotificationEvent, Recipient};

/// Delivers a notification to one recipient.
#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn notify(
        &self,
        recipient: &Recipient,
        event: &NotificationEvent,
    ) -> Result<(), FulfillmentError>;
}

/// Delivery that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDelivery;

#[async_trait]
impl NotificationDelivery for LoggingDelivery {
    async fn notify(
        &self,
        recipient: &Recipient,
        event: &NotificationEvent,
    ) -> Result<(), FulfillmentError> {
        tracing::info!(
            recipient_type = recipient.recipient_type(),
            recipient_id = %recipient.recipient_id(),
            event_type = event.event_type.as_str(),
            reference_type = event.reference_type.as_str(),
            reference_id = %event.reference_id,
            title = %event.title,
            "notification"
        );
        Ok(())
    }
}

/// A notification that reached [`RecordingDelivery`].
#[derive(Debug, Clone)]
pub struct Delivered {
    pub recipient: Recipient,
    pub event: NotificationEvent,
}

#[derive(Debug, Default)]
struct RecordingState {
    delivered: Vec<Delivered>,
    fail_on_notify: bool,
}

/// In-memory delivery for testing.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelivery {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingDelivery {
    /// Creates an empty delivery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following delivery fail.
    pub async fn set_fail_on_notify(&self, fail: bool) {
        self.state.lock().await.fail_on_notify = fail;
    }

    /// Returns every delivered notification, oldest first.
    pub async fn delivered(&self) -> Vec<Delivered> {
        self.state.lock().await.delivered.clone()
    }

    /// Returns the notifications delivered to `recipient`.
    pub async fn delivered_to(&self, recipient: &Recipient) -> Vec<NotificationEvent> {
        self.state
            .lock()
            .await
            .delivered
            .iter()
            .filter(|d| &d.recipient == recipient)
            .map(|d| d.event.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationDelivery for RecordingDelivery {
    async fn notify(
        &self,
        recipient: &Recipient,
        event: &NotificationEvent,
    ) -> Result<(), FulfillmentError> {
        let mut state = self.state.lock().await;
        if state.fail_on_notify {
            return Err(FulfillmentError::external("notifications", "delivery refused"));
        }
        state.delivered.push(Delivered {
            recipient: recipient.clone(),
            event: event.clone(),
        });
        Ok(())
    }
}
