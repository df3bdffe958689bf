//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::failure::FailureKind;

use super::{CustomerId, FollowUp, OrderLine};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was placed at checkout.
    OrderPlaced(OrderPlacedData),

    /// A payment attempt was attached to the order.
    PaymentAttached(PaymentAttachedData),

    /// A processor claimed the order.
    ProcessingStarted(ProcessingStartedData),

    /// Stock was reserved for every line.
    InventoryChecked(InventoryCheckedData),

    /// The attached payment settles later; the order waits for confirmation.
    PaymentDeferred(PaymentDeferredData),

    /// The attached payment completed.
    OrderPaid(OrderPaidData),

    /// A post-payment job was handed to the scheduler.
    FollowUpScheduled(FollowUpScheduledData),

    /// Completion tasks ran.
    OrderCompleted(OrderCompletedData),

    /// Order was cancelled by an operator.
    OrderCancelled(OrderCancelledData),

    /// A saga step failed.
    OrderFailed(OrderFailedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::PaymentAttached(_) => "OrderPaymentAttached",
            OrderEvent::ProcessingStarted(_) => "OrderProcessingStarted",
            OrderEvent::InventoryChecked(_) => "OrderInventoryChecked",
            OrderEvent::PaymentDeferred(_) => "OrderPaymentDeferred",
            OrderEvent::OrderPaid(_) => "OrderPaid",
            OrderEvent::FollowUpScheduled(_) => "OrderFollowUpScheduled",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderFailed(_) => "OrderFailed",
        }
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    /// The unique order ID.
    pub order_id: AggregateId,

    /// The customer who placed the order.
    pub customer_id: CustomerId,

    /// Lines in entry order.
    pub lines: Vec<OrderLine>,

    /// Sum of the line totals.
    pub total: Money,

    /// When the order was placed.
    pub placed_at: DateTime<Utc>,
}

/// Data for PaymentAttached event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttachedData {
    /// The payment now responsible for the order.
    pub payment_id: AggregateId,

    /// When it was attached.
    pub attached_at: DateTime<Utc>,
}

/// Data for ProcessingStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStartedData {
    pub started_at: DateTime<Utc>,
}

/// Data for InventoryChecked event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCheckedData {
    /// Number of lines reserved.
    pub lines_reserved: usize,

    pub checked_at: DateTime<Utc>,
}

/// Data for PaymentDeferred event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDeferredData {
    /// The payment awaiting confirmation.
    pub payment_id: AggregateId,

    pub deferred_at: DateTime<Utc>,
}

/// Data for OrderPaid event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidData {
    /// The payment that settled the order.
    pub payment_id: AggregateId,

    pub paid_at: DateTime<Utc>,
}

/// Data for FollowUpScheduled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpScheduledData {
    pub follow_up: FollowUp,

    pub scheduled_at: DateTime<Utc>,
}

/// Data for OrderCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompletedData {
    /// Loyalty points awarded for the order.
    pub loyalty_points: u64,

    pub completed_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    /// Reason for cancellation.
    pub reason: String,

    /// Who cancelled the order.
    pub cancelled_by: Option<String>,

    pub cancelled_at: DateTime<Utc>,
}

/// Data for OrderFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFailedData {
    /// Human-readable failure note.
    pub note: String,

    /// Failure class used for routing.
    pub category: FailureKind,

    pub failed_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    /// Creates an OrderPlaced event.
    pub fn order_placed(
        order_id: AggregateId,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
        total: Money,
    ) -> Self {
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            customer_id,
            lines,
            total,
            placed_at: Utc::now(),
        })
    }

    /// Creates a PaymentAttached event.
    pub fn payment_attached(payment_id: AggregateId) -> Self {
        OrderEvent::PaymentAttached(PaymentAttachedData {
            payment_id,
            attached_at: Utc::now(),
        })
    }

    /// Creates a ProcessingStarted event.
    pub fn processing_started() -> Self {
        OrderEvent::ProcessingStarted(ProcessingStartedData {
            started_at: Utc::now(),
        })
    }

    /// Creates an InventoryChecked event.
    pub fn inventory_checked(lines_reserved: usize) -> Self {
        OrderEvent::InventoryChecked(InventoryCheckedData {
            lines_reserved,
            checked_at: Utc::now(),
        })
    }

    /// Creates a PaymentDeferred event.
    pub fn payment_deferred(payment_id: AggregateId) -> Self {
        OrderEvent::PaymentDeferred(PaymentDeferredData {
            payment_id,
            deferred_at: Utc::now(),
        })
    }

    /// Creates an OrderPaid event.
    pub fn order_paid(payment_id: AggregateId) -> Self {
        OrderEvent::OrderPaid(OrderPaidData {
            payment_id,
            paid_at: Utc::now(),
        })
    }

    /// Creates a FollowUpScheduled event.
    pub fn follow_up_scheduled(follow_up: FollowUp) -> Self {
        OrderEvent::FollowUpScheduled(FollowUpScheduledData {
            follow_up,
            scheduled_at: Utc::now(),
        })
    }

    /// Creates an OrderCompleted event.
    pub fn order_completed(loyalty_points: u64) -> Self {
        OrderEvent::OrderCompleted(OrderCompletedData {
            loyalty_points,
            completed_at: Utc::now(),
        })
    }

    /// Creates an OrderCancelled event.
    pub fn order_cancelled(reason: impl Into<String>, cancelled_by: Option<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason: reason.into(),
            cancelled_by,
            cancelled_at: Utc::now(),
        })
    }

    /// Creates an OrderFailed event.
    pub fn order_failed(note: impl Into<String>, category: FailureKind) -> Self {
        OrderEvent::OrderFailed(OrderFailedData {
            note: note.into(),
            category,
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        let payment_id = AggregateId::new();

        let event = OrderEvent::order_placed(
            AggregateId::new(),
            CustomerId::new(),
            vec![],
            Money::from_cents(0),
        );
        assert_eq!(event.event_type(), "OrderPlaced");
        assert_eq!(
            OrderEvent::payment_attached(payment_id).event_type(),
            "OrderPaymentAttached"
        );
        assert_eq!(
            OrderEvent::processing_started().event_type(),
            "OrderProcessingStarted"
        );
        assert_eq!(
            OrderEvent::inventory_checked(2).event_type(),
            "OrderInventoryChecked"
        );
        assert_eq!(
            OrderEvent::payment_deferred(payment_id).event_type(),
            "OrderPaymentDeferred"
        );
        assert_eq!(OrderEvent::order_paid(payment_id).event_type(), "OrderPaid");
        assert_eq!(
            OrderEvent::follow_up_scheduled(FollowUp::Shipment).event_type(),
            "OrderFollowUpScheduled"
        );
        assert_eq!(OrderEvent::order_completed(10).event_type(), "OrderCompleted");
        assert_eq!(
            OrderEvent::order_cancelled("fraud", None).event_type(),
            "OrderCancelled"
        );
        assert_eq!(
            OrderEvent::order_failed("boom", FailureKind::Internal).event_type(),
            "OrderFailed"
        );
    }

    #[test]
    fn test_order_placed_serialization() {
        let order_id = AggregateId::new();
        let customer_id = CustomerId::new();
        let lines = vec![OrderLine::new("SKU-001", 2, Money::from_cents(1500))];
        let event = OrderEvent::order_placed(order_id, customer_id, lines, Money::from_cents(3000));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("OrderPlaced"));

        let deserialized: OrderEvent = serde_json::from_str(&json).unwrap();
        if let OrderEvent::OrderPlaced(data) = deserialized {
            assert_eq!(data.order_id, order_id);
            assert_eq!(data.customer_id, customer_id);
            assert_eq!(data.lines.len(), 1);
            assert_eq!(data.total, Money::from_cents(3000));
        } else {
            panic!("Expected OrderPlaced event");
        }
    }

    #[test]
    fn test_order_failed_keeps_category() {
        let event = OrderEvent::order_failed("SKU-B: requested 100, available 5", FailureKind::StockShortage);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("stock_shortage"));

        let deserialized: OrderEvent = serde_json::from_str(&json).unwrap();
        if let OrderEvent::OrderFailed(data) = deserialized {
            assert_eq!(data.category, FailureKind::StockShortage);
        } else {
            panic!("Expected OrderFailed event");
        }
    }
}
