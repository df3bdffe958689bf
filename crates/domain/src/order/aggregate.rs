//! Order aggregate implementation.

use common::{AggregateId, Money};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::failure::FailureKind;

use super::{
    CustomerId, FollowUp, FulfillmentStep, OrderError, OrderEvent, OrderLine, OrderStatus,
};

/// Order aggregate root.
///
/// Created at checkout and then moved forward only by the fulfillment saga
/// (and by operator cancellation). Never deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    id: Option<AggregateId>,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    /// Customer who placed the order.
    customer_id: Option<CustomerId>,

    /// Current status of the order.
    status: OrderStatus,

    /// Where the saga resumes.
    next_step: FulfillmentStep,

    /// Lines in entry order.
    lines: Vec<OrderLine>,

    /// Total amount of the order.
    total: Option<Money>,

    /// The payment attempt currently responsible for the order.
    payment_id: Option<AggregateId>,

    /// Set when the order is in `Error`.
    failure_note: Option<String>,
    failure_category: Option<FailureKind>,

    /// Post-payment jobs already handed to the scheduler.
    #[serde(default)]
    follow_ups: Vec<FollowUp>,

    /// Loyalty points awarded on completion.
    loyalty_points: u64,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => {
                self.id = Some(data.order_id);
                self.customer_id = Some(data.customer_id);
                self.lines = data.lines;
                self.total = Some(data.total);
                self.status = OrderStatus::Pending;
                self.next_step = FulfillmentStep::CheckInventory;
            }
            OrderEvent::PaymentAttached(data) => {
                self.payment_id = Some(data.payment_id);
                // A fresh attempt replaces one that was waiting on confirmation.
                if self.next_step == FulfillmentStep::AwaitPaymentConfirmation {
                    self.next_step = FulfillmentStep::CapturePayment;
                }
            }
            OrderEvent::ProcessingStarted(_) => {
                self.status = OrderStatus::Processing;
            }
            OrderEvent::InventoryChecked(_) => {
                self.status = OrderStatus::InventoryChecked;
                self.next_step = FulfillmentStep::CapturePayment;
            }
            OrderEvent::PaymentDeferred(_) => {
                self.next_step = FulfillmentStep::AwaitPaymentConfirmation;
            }
            OrderEvent::OrderPaid(data) => {
                self.payment_id = Some(data.payment_id);
                self.status = OrderStatus::Paid;
                self.next_step = FulfillmentStep::Finalize;
            }
            OrderEvent::FollowUpScheduled(data) => {
                if !self.follow_ups.contains(&data.follow_up) {
                    self.follow_ups.push(data.follow_up);
                }
            }
            OrderEvent::OrderCompleted(data) => {
                self.loyalty_points = data.loyalty_points;
                self.status = OrderStatus::Completed;
                self.next_step = FulfillmentStep::None;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
                self.next_step = FulfillmentStep::None;
            }
            OrderEvent::OrderFailed(data) => {
                self.failure_note = Some(data.note);
                self.failure_category = Some(data.category);
                self.status = OrderStatus::Error;
                self.next_step = FulfillmentStep::None;
            }
        }
    }
}

// Query methods
impl Order {
    /// Returns the customer ID.
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the saga resumption point.
    pub fn next_step(&self) -> FulfillmentStep {
        self.next_step
    }

    /// Returns the lines in entry order.
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Returns the total quantity of all lines.
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Returns the order total.
    pub fn total(&self) -> Option<Money> {
        self.total
    }

    /// Returns the attached payment, if any.
    pub fn payment_id(&self) -> Option<AggregateId> {
        self.payment_id
    }

    /// Returns the failure note when the order is in `Error`.
    pub fn failure_note(&self) -> Option<&str> {
        self.failure_note.as_deref()
    }

    /// Returns the failure class when the order is in `Error`.
    pub fn failure_category(&self) -> Option<FailureKind> {
        self.failure_category
    }

    /// Returns the follow-up jobs scheduled so far.
    pub fn follow_ups(&self) -> &[FollowUp] {
        &self.follow_ups
    }

    /// Returns true if the follow-up job was already scheduled.
    pub fn has_scheduled(&self, follow_up: FollowUp) -> bool {
        self.follow_ups.contains(&follow_up)
    }

    /// Returns the loyalty points awarded on completion.
    pub fn loyalty_points(&self) -> u64 {
        self.loyalty_points
    }

    /// Returns true if the saga must not touch the order any more.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Command methods (return events)
impl Order {
    /// Places a new order.
    ///
    /// Every line must have a positive quantity and price in a single
    /// currency, and no two lines may name the same product and variant.
    pub fn place(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }

        let Some(first) = lines.first() else {
            return Err(OrderError::NoLines);
        };
        let currency = first.unit_price.currency();

        let mut total = Money::zero(currency);
        for (index, line) in lines.iter().enumerate() {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                });
            }
            if !line.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    product_id: line.product_id.to_string(),
                    price: line.unit_price,
                });
            }
            if line.unit_price.currency() != currency {
                return Err(OrderError::CurrencyMismatch {
                    expected: currency,
                    found: line.unit_price.currency(),
                });
            }
            if lines[..index].iter().any(|earlier| earlier.same_item(line)) {
                return Err(OrderError::DuplicateLine {
                    product_id: line.product_id.to_string(),
                });
            }
            total = total
                .checked_add(line.line_total())
                .ok_or(OrderError::TotalOverflow)?;
        }

        Ok(vec![OrderEvent::order_placed(
            order_id,
            customer_id,
            lines,
            total,
        )])
    }

    /// Attaches a payment attempt.
    ///
    /// Re-attaching the current payment is a no-op.
    pub fn attach_payment(&self, payment_id: AggregateId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if self.payment_id == Some(payment_id) {
            return Ok(vec![]);
        }
        if matches!(self.status, OrderStatus::Paid | OrderStatus::Completed) {
            return Err(OrderError::AlreadyPaid);
        }
        if !self.status.accepts_payment() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "attach payment",
            });
        }

        Ok(vec![OrderEvent::payment_attached(payment_id)])
    }

    /// Claims the order for processing.
    pub fn start_processing(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if !self.status.can_start_processing() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "start processing",
            });
        }

        Ok(vec![OrderEvent::processing_started()])
    }

    /// Records that stock was reserved for every line.
    pub fn mark_inventory_checked(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if !self.status.can_mark_inventory_checked() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "mark inventory checked",
            });
        }

        Ok(vec![OrderEvent::inventory_checked(self.lines.len())])
    }

    /// Records that the attached payment will be confirmed later.
    pub fn defer_payment(&self, payment_id: AggregateId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.ensure_attached(payment_id)?;

        match (self.status, self.next_step) {
            (OrderStatus::InventoryChecked, FulfillmentStep::AwaitPaymentConfirmation) => {
                Ok(vec![])
            }
            (OrderStatus::InventoryChecked, FulfillmentStep::CapturePayment) => {
                Ok(vec![OrderEvent::payment_deferred(payment_id)])
            }
            (status, _) => Err(OrderError::InvalidStateTransition {
                current_state: status,
                action: "defer payment",
            }),
        }
    }

    /// Marks the order paid by the given payment.
    ///
    /// Repeating the call for the same payment once paid is a no-op.
    pub fn mark_paid(&self, payment_id: AggregateId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.ensure_attached(payment_id)?;

        if matches!(self.status, OrderStatus::Paid | OrderStatus::Completed) {
            return Ok(vec![]);
        }
        if !self.status.can_mark_paid() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "mark paid",
            });
        }

        Ok(vec![OrderEvent::order_paid(payment_id)])
    }

    /// Records that a post-payment job was scheduled.
    ///
    /// Recording the same follow-up twice is a no-op.
    pub fn record_follow_up(&self, follow_up: FollowUp) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if self.has_scheduled(follow_up) {
            return Ok(vec![]);
        }
        if self.status != OrderStatus::Paid {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "record follow-up",
            });
        }

        Ok(vec![OrderEvent::follow_up_scheduled(follow_up)])
    }

    /// Completes the order after the completion tasks ran.
    ///
    /// Completing a completed order is a no-op.
    pub fn complete(&self, loyalty_points: u64) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if self.status == OrderStatus::Completed {
            return Ok(vec![]);
        }
        if !self.status.can_complete() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "complete",
            });
        }

        Ok(vec![OrderEvent::order_completed(loyalty_points)])
    }

    /// Cancels the order.
    pub fn cancel(
        &self,
        reason: impl Into<String>,
        cancelled_by: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "cancel",
            });
        }

        Ok(vec![OrderEvent::order_cancelled(reason, cancelled_by)])
    }

    /// Moves the order to `Error`.
    ///
    /// Failing an order that already failed is a no-op, so a redelivered
    /// error path does not record a second failure.
    pub fn fail(
        &self,
        note: impl Into<String>,
        category: FailureKind,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        match self.status {
            OrderStatus::Error => Ok(vec![]),
            OrderStatus::Completed | OrderStatus::Cancelled => {
                Err(OrderError::InvalidStateTransition {
                    current_state: self.status,
                    action: "fail",
                })
            }
            _ => Ok(vec![OrderEvent::order_failed(note, category)]),
        }
    }

    fn ensure_placed(&self) -> Result<(), OrderError> {
        match self.id {
            Some(_) => Ok(()),
            None => Err(OrderError::NotPlaced),
        }
    }

    fn ensure_attached(&self, payment_id: AggregateId) -> Result<(), OrderError> {
        if self.payment_id == Some(payment_id) {
            Ok(())
        } else {
            Err(OrderError::PaymentMismatch {
                attached: self.payment_id,
                received: payment_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Currency;

    fn line(sku: &str, quantity: u32, cents: i64) -> OrderLine {
        OrderLine::new(sku, quantity, Money::from_cents(cents))
    }

    fn placed_order() -> Order {
        let mut order = Order::default();
        let events = order
            .place(
                AggregateId::new(),
                CustomerId::new(),
                vec![line("SKU-A", 2, 1000), line("SKU-B", 1, 550)],
            )
            .unwrap();
        order.apply_events(events);
        order
    }

    fn run(order: &mut Order, events: Vec<OrderEvent>) {
        order.apply_events(events);
    }

    #[test]
    fn test_place_order_computes_total() {
        let order = placed_order();

        assert!(order.id().is_some());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.next_step(), FulfillmentStep::CheckInventory);
        assert_eq!(order.total(), Some(Money::from_cents(2550)));
        assert_eq!(order.total_quantity(), 3);
        assert_eq!(order.lines()[0].product_id.as_str(), "SKU-A");
    }

    #[test]
    fn test_place_rejects_invalid_lines() {
        let order = Order::default();
        let id = AggregateId::new();
        let customer = CustomerId::new();

        assert!(matches!(
            order.place(id, customer, vec![]),
            Err(OrderError::NoLines)
        ));
        assert!(matches!(
            order.place(id, customer, vec![line("SKU-A", 0, 100)]),
            Err(OrderError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            order.place(id, customer, vec![line("SKU-A", 1, 0)]),
            Err(OrderError::InvalidPrice { .. })
        ));
        assert!(matches!(
            order.place(id, customer, vec![line("SKU-A", 1, 100), line("SKU-A", 2, 100)]),
            Err(OrderError::DuplicateLine { .. })
        ));
        assert!(matches!(
            order.place(
                id,
                customer,
                vec![
                    line("SKU-A", 1, 100),
                    OrderLine::new("SKU-B", 1, Money::new(100, Currency::Jpy))
                ]
            ),
            Err(OrderError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_same_product_different_variant_allowed() {
        let order = Order::default();
        let result = order.place(
            AggregateId::new(),
            CustomerId::new(),
            vec![
                line("SKU-A", 1, 100).with_variant("S"),
                line("SKU-A", 1, 100).with_variant("M"),
            ],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_cannot_place_twice() {
        let order = placed_order();
        assert!(matches!(
            order.place(AggregateId::new(), CustomerId::new(), vec![line("X", 1, 1)]),
            Err(OrderError::AlreadyPlaced)
        ));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = placed_order();
        let payment_id = AggregateId::new();

        let events = order.attach_payment(payment_id).unwrap();
        run(&mut order, events);
        let events = order.start_processing().unwrap();
        run(&mut order, events);
        assert_eq!(order.status(), OrderStatus::Processing);

        let events = order.mark_inventory_checked().unwrap();
        run(&mut order, events);
        assert_eq!(order.status(), OrderStatus::InventoryChecked);
        assert_eq!(order.next_step(), FulfillmentStep::CapturePayment);

        let events = order.mark_paid(payment_id).unwrap();
        run(&mut order, events);
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.next_step(), FulfillmentStep::Finalize);

        let events = order.complete(25).unwrap();
        run(&mut order, events);
        assert_eq!(order.status(), OrderStatus::Completed);
        assert_eq!(order.next_step(), FulfillmentStep::None);
        assert_eq!(order.loyalty_points(), 25);
        assert!(order.complete(25).unwrap().is_empty());
    }

    #[test]
    fn test_follow_ups_recorded_once_while_paid() {
        let mut order = placed_order();
        let payment_id = AggregateId::new();
        assert!(matches!(
            order.record_follow_up(FollowUp::Shipment),
            Err(OrderError::InvalidStateTransition { .. })
        ));

        let events = order.attach_payment(payment_id).unwrap();
        run(&mut order, events);
        let events = order.start_processing().unwrap();
        run(&mut order, events);
        let events = order.mark_inventory_checked().unwrap();
        run(&mut order, events);
        let events = order.mark_paid(payment_id).unwrap();
        run(&mut order, events);

        let events = order.record_follow_up(FollowUp::Shipment).unwrap();
        assert_eq!(events.len(), 1);
        run(&mut order, events);
        assert!(order.has_scheduled(FollowUp::Shipment));
        assert!(!order.has_scheduled(FollowUp::Analytics));
        assert!(order.record_follow_up(FollowUp::Shipment).unwrap().is_empty());

        let events = order.complete(0).unwrap();
        run(&mut order, events);
        assert_eq!(order.follow_ups(), &[FollowUp::Shipment]);
        assert!(order.record_follow_up(FollowUp::Shipment).unwrap().is_empty());
        assert!(order.record_follow_up(FollowUp::Analytics).is_err());
    }

    #[test]
    fn test_claim_only_once() {
        let mut order = placed_order();
        let events = order.start_processing().unwrap();
        run(&mut order, events);

        assert!(matches!(
            order.start_processing(),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_mark_paid_requires_attached_payment() {
        let mut order = placed_order();
        let attached = AggregateId::new();
        let events = order.attach_payment(attached).unwrap();
        run(&mut order, events);
        let events = order.start_processing().unwrap();
        run(&mut order, events);
        let events = order.mark_inventory_checked().unwrap();
        run(&mut order, events);

        assert!(matches!(
            order.mark_paid(AggregateId::new()),
            Err(OrderError::PaymentMismatch { .. })
        ));

        let events = order.mark_paid(attached).unwrap();
        run(&mut order, events);
        assert!(order.mark_paid(attached).unwrap().is_empty());
    }

    #[test]
    fn test_deferred_payment_and_replacement_attempt() {
        let mut order = placed_order();
        let first = AggregateId::new();
        let events = order.attach_payment(first).unwrap();
        run(&mut order, events);
        let events = order.start_processing().unwrap();
        run(&mut order, events);
        let events = order.mark_inventory_checked().unwrap();
        run(&mut order, events);

        let events = order.defer_payment(first).unwrap();
        run(&mut order, events);
        assert_eq!(order.next_step(), FulfillmentStep::AwaitPaymentConfirmation);
        assert!(order.defer_payment(first).unwrap().is_empty());

        let second = AggregateId::new();
        let events = order.attach_payment(second).unwrap();
        run(&mut order, events);
        assert_eq!(order.payment_id(), Some(second));
        assert_eq!(order.next_step(), FulfillmentStep::CapturePayment);
    }

    #[test]
    fn test_attach_refused_once_paid() {
        let mut order = placed_order();
        let payment_id = AggregateId::new();
        for step in 0..4 {
            let events = match step {
                0 => order.attach_payment(payment_id),
                1 => order.start_processing(),
                2 => order.mark_inventory_checked(),
                _ => order.mark_paid(payment_id),
            }
            .unwrap();
            run(&mut order, events);
        }

        assert!(matches!(
            order.attach_payment(AggregateId::new()),
            Err(OrderError::AlreadyPaid)
        ));
    }

    #[test]
    fn test_fail_records_note_and_is_idempotent() {
        let mut order = placed_order();
        let events = order
            .fail("SKU-B: requested 100, available 5", FailureKind::StockShortage)
            .unwrap();
        run(&mut order, events);

        assert_eq!(order.status(), OrderStatus::Error);
        assert_eq!(order.failure_category(), Some(FailureKind::StockShortage));
        assert!(order.failure_note().unwrap().contains("SKU-B"));
        assert!(order.fail("again", FailureKind::Internal).unwrap().is_empty());
        assert_eq!(order.failure_category(), Some(FailureKind::StockShortage));
    }

    #[test]
    fn test_cancel_rules() {
        let mut order = placed_order();
        let events = order.fail("boom", FailureKind::Internal).unwrap();
        run(&mut order, events);

        let events = order.cancel("operator override", Some("ops".into())).unwrap();
        run(&mut order, events);
        assert_eq!(order.status(), OrderStatus::Cancelled);

        assert!(order.cancel("again", None).is_err());
        assert!(order.fail("late", FailureKind::Internal).is_err());
    }

    #[test]
    fn test_commands_on_unplaced_order() {
        let order = Order::default();
        assert!(matches!(order.start_processing(), Err(OrderError::NotPlaced)));
        assert!(matches!(
            order.attach_payment(AggregateId::new()),
            Err(OrderError::NotPlaced)
        ));
    }
}
