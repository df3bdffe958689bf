//! Order commands.

use common::AggregateId;

use crate::command::Command;
use crate::failure::FailureKind;

use super::{CustomerId, FollowUp, Order, OrderLine};

/// Command to place a new order at checkout.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The order ID to create.
    pub order_id: AggregateId,

    /// The customer placing the order.
    pub customer_id: CustomerId,

    /// Lines in entry order.
    pub lines: Vec<OrderLine>,
}

impl PlaceOrder {
    /// Creates a new PlaceOrder command.
    pub fn new(order_id: AggregateId, customer_id: CustomerId, lines: Vec<OrderLine>) -> Self {
        Self {
            order_id,
            customer_id,
            lines,
        }
    }

    /// Creates a new PlaceOrder command with a generated order ID.
    pub fn for_customer(customer_id: CustomerId, lines: Vec<OrderLine>) -> Self {
        Self::new(AggregateId::new(), customer_id, lines)
    }
}

impl Command for PlaceOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to attach a payment attempt to an order.
#[derive(Debug, Clone)]
pub struct AttachPayment {
    pub order_id: AggregateId,
    pub payment_id: AggregateId,
}

impl AttachPayment {
    /// Creates a new AttachPayment command.
    pub fn new(order_id: AggregateId, payment_id: AggregateId) -> Self {
        Self {
            order_id,
            payment_id,
        }
    }
}

impl Command for AttachPayment {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to claim an order for processing.
#[derive(Debug, Clone)]
pub struct StartProcessing {
    pub order_id: AggregateId,
}

impl StartProcessing {
    /// Creates a new StartProcessing command.
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for StartProcessing {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record a successful inventory check.
#[derive(Debug, Clone)]
pub struct MarkInventoryChecked {
    pub order_id: AggregateId,
}

impl MarkInventoryChecked {
    /// Creates a new MarkInventoryChecked command.
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for MarkInventoryChecked {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to park an order until its payment is confirmed.
#[derive(Debug, Clone)]
pub struct DeferPayment {
    pub order_id: AggregateId,
    pub payment_id: AggregateId,
}

impl DeferPayment {
    /// Creates a new DeferPayment command.
    pub fn new(order_id: AggregateId, payment_id: AggregateId) -> Self {
        Self {
            order_id,
            payment_id,
        }
    }
}

impl Command for DeferPayment {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to mark an order paid.
#[derive(Debug, Clone)]
pub struct MarkPaid {
    pub order_id: AggregateId,

    /// The completed payment.
    pub payment_id: AggregateId,
}

impl MarkPaid {
    /// Creates a new MarkPaid command.
    pub fn new(order_id: AggregateId, payment_id: AggregateId) -> Self {
        Self {
            order_id,
            payment_id,
        }
    }
}

impl Command for MarkPaid {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record that a follow-up job was scheduled.
#[derive(Debug, Clone)]
pub struct RecordFollowUp {
    pub order_id: AggregateId,
    pub follow_up: FollowUp,
}

impl RecordFollowUp {
    /// Creates a new RecordFollowUp command.
    pub fn new(order_id: AggregateId, follow_up: FollowUp) -> Self {
        Self {
            order_id,
            follow_up,
        }
    }
}

impl Command for RecordFollowUp {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to complete an order.
#[derive(Debug, Clone)]
pub struct CompleteOrder {
    pub order_id: AggregateId,

    /// Loyalty points awarded for the order.
    pub loyalty_points: u64,
}

impl CompleteOrder {
    /// Creates a new CompleteOrder command.
    pub fn new(order_id: AggregateId, loyalty_points: u64) -> Self {
        Self {
            order_id,
            loyalty_points,
        }
    }
}

impl Command for CompleteOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to cancel an order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    /// The order to cancel.
    pub order_id: AggregateId,

    /// Reason for cancellation.
    pub reason: String,

    /// Who is cancelling the order.
    pub cancelled_by: Option<String>,
}

impl CancelOrder {
    /// Creates a new CancelOrder command.
    pub fn new(order_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reason: reason.into(),
            cancelled_by: None,
        }
    }

    /// Sets who cancelled the order.
    pub fn cancelled_by(mut self, by: impl Into<String>) -> Self {
        self.cancelled_by = Some(by.into());
        self
    }
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to move an order to `Error`.
#[derive(Debug, Clone)]
pub struct FailOrder {
    pub order_id: AggregateId,

    /// Human-readable failure note.
    pub note: String,

    /// Failure class used for routing.
    pub category: FailureKind,
}

impl FailOrder {
    /// Creates a new FailOrder command.
    pub fn new(order_id: AggregateId, note: impl Into<String>, category: FailureKind) -> Self {
        Self {
            order_id,
            note: note.into(),
            category,
        }
    }
}

impl Command for FailOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
