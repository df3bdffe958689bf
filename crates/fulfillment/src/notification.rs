//! Notification routing.
//!
//! The router picks recipients from a typed failure kind and hands each
//! notification to the delivery collaborator. Delivery problems are logged
//! and counted, never returned, so the router is safe to call from a
//! failing operation.

use std::sync::Arc;

use common::AggregateId;
use domain::{Aggregate, CustomerId, FailureKind, LowStockAlert, Order, Payment};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::services::notification::NotificationDelivery;

/// Operations teams that receive internal notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpsTeam {
    Inventory,
    Payment,
    System,
}

impl OpsTeam {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpsTeam::Inventory => "inventory_ops",
            OpsTeam::Payment => "payment_ops",
            OpsTeam::System => "system_ops",
        }
    }
}

/// Who a notification is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Customer(CustomerId),
    Operations(OpsTeam),
}

impl Recipient {
    pub fn recipient_type(&self) -> &'static str {
        match self {
            Recipient::Customer(_) => "customer",
            Recipient::Operations(team) => team.as_str(),
        }
    }

    pub fn recipient_id(&self) -> String {
        match self {
            Recipient::Customer(customer_id) => customer_id.to_string(),
            Recipient::Operations(team) => team.as_str().to_string(),
        }
    }

    pub fn is_customer(&self) -> bool {
        matches!(self, Recipient::Customer(_))
    }
}

/// Notification type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OrderFailed,
    OrderConfirmed,
    PaymentFailed,
    PaymentSucceeded,
    PaymentHeld,
    LowStock,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::OrderFailed => "order_failed",
            NotificationType::OrderConfirmed => "order_confirmed",
            NotificationType::PaymentFailed => "payment_failed",
            NotificationType::PaymentSucceeded => "payment_succeeded",
            NotificationType::PaymentHeld => "payment_held",
            NotificationType::LowStock => "low_stock",
        }
    }
}

/// What a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Order,
    Payment,
    InventoryRecord,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Order => "order",
            ReferenceType::Payment => "payment",
            ReferenceType::InventoryRecord => "inventory_record",
        }
    }
}

/// An ephemeral message. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: NotificationType,
    pub title: String,
    pub message: String,
    pub reference_type: ReferenceType,
    pub reference_id: AggregateId,
    pub details: serde_json::Value,
}

/// Picks recipients and delivers notifications.
#[derive(Clone)]
pub struct NotificationRouter {
    delivery: Arc<dyn NotificationDelivery>,
}

impl NotificationRouter {
    /// Creates a router over a delivery collaborator.
    pub fn new(delivery: Arc<dyn NotificationDelivery>) -> Self {
        Self { delivery }
    }

    /// Recipients of an order failure.
    pub fn order_failure_recipients(
        kind: FailureKind,
        customer_id: Option<CustomerId>,
    ) -> Vec<Recipient> {
        match kind {
            FailureKind::StockShortage => vec![Recipient::Operations(OpsTeam::Inventory)],
            FailureKind::PaymentDeclined => customer_id.map(Recipient::Customer).into_iter().collect(),
            FailureKind::Configuration | FailureKind::Transient | FailureKind::Internal => {
                vec![Recipient::Operations(OpsTeam::System)]
            }
        }
    }

    /// Recipients of a payment failure.
    pub fn payment_failure_recipients(
        kind: FailureKind,
        customer_id: Option<CustomerId>,
    ) -> Vec<Recipient> {
        let team = match kind {
            FailureKind::Internal => return vec![Recipient::Operations(OpsTeam::System)],
            FailureKind::Configuration => OpsTeam::System,
            FailureKind::PaymentDeclined | FailureKind::Transient | FailureKind::StockShortage => {
                OpsTeam::Payment
            }
        };

        customer_id
            .map(Recipient::Customer)
            .into_iter()
            .chain(std::iter::once(Recipient::Operations(team)))
            .collect()
    }

    /// Reports an order that moved to `error`.
    pub async fn order_failed(&self, order: &Order, kind: FailureKind, note: &str) {
        let Some(order_id) = order.id() else {
            return;
        };
        let event = NotificationEvent {
            event_type: NotificationType::OrderFailed,
            title: format!("Order {order_id} failed"),
            message: note.to_string(),
            reference_type: ReferenceType::Order,
            reference_id: order_id,
            details: json!({
                "category": kind,
                "status": order.status().as_str(),
                "lines": order.lines().len(),
            }),
        };

        let recipients = Self::order_failure_recipients(kind, order.customer_id());
        self.route(&recipients, &event).await;
    }

    /// Reports a failed payment attempt.
    ///
    /// The customer gets a message asking for action; operations get the
    /// gateway's reason.
    pub async fn payment_failed(&self, payment: &Payment, kind: FailureKind, reason: &str) {
        let Some(payment_id) = payment.id() else {
            return;
        };
        let amount = payment
            .amount()
            .map(|amount| amount.to_string())
            .unwrap_or_default();
        let details = json!({
            "category": kind,
            "order_id": payment.order_id(),
            "amount": amount,
            "attempts": payment.attempts(),
            "reason": reason,
        });

        let customer_event = NotificationEvent {
            event_type: NotificationType::PaymentFailed,
            title: "Payment could not be completed".to_string(),
            message: format!(
                "Your payment of {amount} could not be processed. Please check your payment method and try again."
            ),
            reference_type: ReferenceType::Payment,
            reference_id: payment_id,
            details: details.clone(),
        };
        let ops_event = NotificationEvent {
            title: format!("Payment {payment_id} failed"),
            message: format!("Payment of {amount} failed ({kind}): {reason}"),
            ..customer_event.clone()
        };

        for recipient in Self::payment_failure_recipients(kind, payment.customer_id()) {
            let event = if recipient.is_customer() {
                &customer_event
            } else {
                &ops_event
            };
            self.deliver(&recipient, event).await;
        }
    }

    /// Asks payment operations to reconcile a captured payment that could
    /// not be verified. The customer is not told anything yet.
    pub async fn payment_held(&self, payment: &Payment, reason: &str) {
        let Some(payment_id) = payment.id() else {
            return;
        };
        let amount = payment
            .amount()
            .map(|amount| amount.to_string())
            .unwrap_or_default();
        let transaction_id = payment.transaction_id().unwrap_or_default();
        let event = NotificationEvent {
            event_type: NotificationType::PaymentHeld,
            title: format!("Payment {payment_id} needs reconciliation"),
            message: format!(
                "Captured {amount} as {transaction_id} but could not verify it: {reason}"
            ),
            reference_type: ReferenceType::Payment,
            reference_id: payment_id,
            details: json!({
                "order_id": payment.order_id(),
                "amount": amount,
                "transaction_id": transaction_id,
                "attempts": payment.attempts(),
                "reason": reason,
            }),
        };

        self.deliver(&Recipient::Operations(OpsTeam::Payment), &event)
            .await;
    }

    /// Confirms a completed payment to the customer.
    pub async fn payment_succeeded(&self, payment: &Payment) {
        let (Some(payment_id), Some(customer_id)) = (payment.id(), payment.customer_id()) else {
            return;
        };
        let amount = payment
            .amount()
            .map(|amount| amount.to_string())
            .unwrap_or_default();
        let event = NotificationEvent {
            event_type: NotificationType::PaymentSucceeded,
            title: "Payment received".to_string(),
            message: format!("We received your payment of {amount}."),
            reference_type: ReferenceType::Payment,
            reference_id: payment_id,
            details: json!({
                "order_id": payment.order_id(),
                "amount": amount,
                "transaction_id": payment.transaction_id(),
            }),
        };

        self.deliver(&Recipient::Customer(customer_id), &event).await;
    }

    /// Confirms a completed order to the customer.
    pub async fn order_confirmed(&self, order: &Order) {
        let (Some(order_id), Some(customer_id)) = (order.id(), order.customer_id()) else {
            return;
        };
        let total = order
            .total()
            .map(|total| total.to_string())
            .unwrap_or_default();
        let event = NotificationEvent {
            event_type: NotificationType::OrderConfirmed,
            title: "Your order is confirmed".to_string(),
            message: format!("Order {order_id} for {total} is on its way."),
            reference_type: ReferenceType::Order,
            reference_id: order_id,
            details: json!({
                "total": total,
                "loyalty_points": order.loyalty_points(),
            }),
        };

        self.deliver(&Recipient::Customer(customer_id), &event).await;
    }

    /// Reports a record at or below its reorder threshold.
    pub async fn low_stock(&self, alert: &LowStockAlert) {
        metrics::counter!("low_stock_alerts_total").increment(1);
        let event = NotificationEvent {
            event_type: NotificationType::LowStock,
            title: format!("Low stock: {}", alert.key),
            message: format!(
                "{} has {} on hand (reorder at {})",
                alert.key, alert.on_hand, alert.reorder_threshold
            ),
            reference_type: ReferenceType::InventoryRecord,
            reference_id: alert.key.record_id(),
            details: json!({
                "key": alert.key,
                "on_hand": alert.on_hand,
                "reorder_threshold": alert.reorder_threshold,
            }),
        };

        self.deliver(&Recipient::Operations(OpsTeam::Inventory), &event)
            .await;
    }

    /// Delivers one event to each recipient. Returns how many succeeded.
    pub async fn route(&self, recipients: &[Recipient], event: &NotificationEvent) -> usize {
        let mut delivered = 0;
        for recipient in recipients {
            if self.deliver(recipient, event).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn deliver(&self, recipient: &Recipient, event: &NotificationEvent) -> bool {
        match self.delivery.notify(recipient, event).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("notifications_dropped_total").increment(1);
                tracing::warn!(
                    error = %e,
                    recipient_type = recipient.recipient_type(),
                    event_type = event.event_type.as_str(),
                    reference_id = %event.reference_id,
                    "notification dropped"
                );
                false
            }
        }
    }
}
