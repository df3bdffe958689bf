//! The order state machine.
//!
//! `advance` dispatches on the order's persisted next step, so any delivery
//! of an `AdvanceOrder` job resumes where the last one stopped:
//!
//! 1. check inventory: claim, reserve every line, mark inventory checked
//! 2. capture payment: run the attached attempt; an inline failure fails the order
//! 3. await payment confirmation: pick up a confirmed deferred payment
//! 4. finalize: clear the cart, award loyalty, schedule follow-ups, complete
//!
//! Each follow-up job is recorded on the order once scheduled, so a
//! redelivered finalize only schedules the ones still missing.

use std::time::Instant;

use common::AggregateId;
use domain::{
    Aggregate, CompleteOrder, DeferPayment, DomainError, FailOrder, FailureKind, FollowUp,
    FulfillmentStep, InventoryError, InventoryLedger, MarkInventoryChecked, MarkPaid, Order,
    OrderService, OrderStatus, Payment, PaymentStatus, RecordFollowUp, StartProcessing,
    StockRequest,
};
use event_store::EventStore;

use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::jobs::Job;
use crate::payment_processor::{PaymentOutcome, PaymentProcessor};
use crate::services::Collaborators;

/// What an advance did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Completed,
    /// Waiting for a payment attempt to be attached or retried.
    AwaitingPayment,
    /// Waiting for a deferred payment's confirmation job.
    AwaitingConfirmation,
    Failed(FailureKind),
    /// Halted, already done, or advanced by another delivery.
    NoOp,
    /// The order does not exist.
    Skipped,
}

impl AdvanceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvanceOutcome::Completed => "completed",
            AdvanceOutcome::AwaitingPayment => "awaiting_payment",
            AdvanceOutcome::AwaitingConfirmation => "awaiting_confirmation",
            AdvanceOutcome::Failed(_) => "failed",
            AdvanceOutcome::NoOp => "noop",
            AdvanceOutcome::Skipped => "skipped",
        }
    }
}

enum Step {
    Continue(Order),
    Done(AdvanceOutcome),
}

/// Drives orders from pending to completed.
pub struct OrderProcessor<S: EventStore> {
    orders: OrderService<S>,
    ledger: InventoryLedger<S>,
    payments: PaymentProcessor<S>,
    collaborators: Collaborators,
    config: FulfillmentConfig,
}

impl<S: EventStore + Clone> OrderProcessor<S> {
    /// Creates an order processor and its payment processor over one store.
    pub fn new(store: S, collaborators: Collaborators, config: FulfillmentConfig) -> Self {
        Self {
            ledger: InventoryLedger::with_retry_limit(store.clone(), config.inventory_retry_limit),
            payments: PaymentProcessor::new(store.clone(), collaborators.clone(), config.clone()),
            orders: OrderService::new(store),
            collaborators,
            config,
        }
    }

    /// Returns the order service.
    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    /// Returns the inventory ledger.
    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    /// Returns the payment processor.
    pub fn payments(&self) -> &PaymentProcessor<S> {
        &self.payments
    }

    /// Moves an order as far along as it can go.
    ///
    /// Business failures move the order to `error` and notify. Transient
    /// errors are returned untouched so the runner redelivers. Losing a race
    /// with another delivery is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn advance(&self, order_id: AggregateId) -> Result<AdvanceOutcome, FulfillmentError> {
        let started = Instant::now();

        let Some(order) = self.orders.get_order(order_id).await? else {
            tracing::warn!(%order_id, "order not found, skipping");
            return Ok(AdvanceOutcome::Skipped);
        };
        if order.is_terminal() {
            tracing::debug!(%order_id, status = %order.status(), "order halted");
            return Ok(AdvanceOutcome::NoOp);
        }

        let outcome = match self.run_steps(order).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_stale() => {
                tracing::info!(%order_id, error = %e, "order advanced by another delivery");
                AdvanceOutcome::NoOp
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(%order_id, error = %e, "transient failure, order left for redelivery");
                return Err(e);
            }
            Err(e) => AdvanceOutcome::Failed(self.fail_order(order_id, &e).await?),
        };

        metrics::counter!("orders_advanced_total", "outcome" => outcome.as_str()).increment(1);
        metrics::histogram!("order_advance_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Moves an order to `error` after a transient failure outlived its retries.
    ///
    /// An order whose payment was captured but not verified stays open; the
    /// payment is held for reconciliation instead.
    #[tracing::instrument(skip(self, error))]
    pub async fn give_up(
        &self,
        order_id: AggregateId,
        error: &FulfillmentError,
    ) -> Result<(), FulfillmentError> {
        let Some(order) = self.orders.get_order(order_id).await? else {
            return Ok(());
        };
        if order.is_terminal() {
            return Ok(());
        }

        if let Some(payment_id) = order.payment_id()
            && let Some(payment) = self.payments.payments().get_payment(payment_id).await?
            && payment.status().is_open()
            && payment.is_captured()
        {
            tracing::warn!(%order_id, %payment_id, "order left open while its captured payment is reconciled");
            return self.payments.give_up(payment_id, error).await;
        }

        self.fail_order(order_id, error).await?;
        Ok(())
    }

    /// Sends the customer the order confirmation.
    #[tracing::instrument(skip(self))]
    pub async fn send_confirmation(&self, order_id: AggregateId) -> Result<(), FulfillmentError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        if order.status() == OrderStatus::Completed {
            self.collaborators.notifier.order_confirmed(&order).await;
        } else {
            tracing::warn!(%order_id, status = %order.status(), "confirmation for unfinished order");
        }
        Ok(())
    }

    async fn run_steps(&self, mut order: Order) -> Result<AdvanceOutcome, FulfillmentError> {
        loop {
            let step = order.next_step();
            tracing::debug!(%step, status = %order.status(), "advancing");

            let next = match step {
                FulfillmentStep::CheckInventory => self.check_inventory(&order).await?,
                FulfillmentStep::CapturePayment => self.capture_payment(&order).await?,
                FulfillmentStep::AwaitPaymentConfirmation => self.await_confirmation(&order).await?,
                FulfillmentStep::Finalize => self.finalize(&order).await?,
                FulfillmentStep::None => Step::Done(AdvanceOutcome::NoOp),
            };

            match next {
                Step::Continue(advanced) if advanced.next_step() != step => order = advanced,
                Step::Continue(_) => return Ok(AdvanceOutcome::NoOp),
                Step::Done(outcome) => return Ok(outcome),
            }
        }
    }

    async fn check_inventory(&self, order: &Order) -> Result<Step, FulfillmentError> {
        let order_id = order_id_of(order)?;

        if order.status() == OrderStatus::Pending {
            self.orders
                .start_processing(StartProcessing::new(order_id))
                .await?;
            tracing::info!(%order_id, "order claimed");
        }

        let requests = StockRequest::for_lines(order.lines(), &self.config.warehouse);
        let outcome = self
            .ledger
            .check_and_reserve(order_id, &requests)
            .await
            .map_err(inventory_error)?;

        for alert in &outcome.low_stock {
            tracing::info!(key = %alert.key, on_hand = alert.on_hand, "stock at reorder threshold");
            self.collaborators.notifier.low_stock(alert).await;
            let job = Job::ReplenishStock {
                key: alert.key.clone(),
                on_hand: alert.on_hand,
            };
            if let Err(e) = self.collaborators.scheduler.schedule(job, None).await {
                tracing::warn!(key = %alert.key, error = %e, "replenishment not scheduled");
            }
        }

        if let Some(shortage) = outcome.shortage {
            return Err(FulfillmentError::InsufficientStock(shortage));
        }

        let result = self
            .orders
            .mark_inventory_checked(MarkInventoryChecked::new(order_id))
            .await?;
        tracing::info!(
            %order_id,
            reserved = outcome.reserved.len(),
            already_reserved = outcome.already_reserved.len(),
            "inventory checked"
        );

        Ok(Step::Continue(result.aggregate))
    }

    async fn capture_payment(&self, order: &Order) -> Result<Step, FulfillmentError> {
        let order_id = order_id_of(order)?;
        let Some(payment_id) = order.payment_id() else {
            tracing::info!(%order_id, "waiting for a payment attempt");
            return Ok(Step::Done(AdvanceOutcome::AwaitingPayment));
        };

        let mut payment = self.load_payment(payment_id).await?;
        if matches!(
            payment.status(),
            PaymentStatus::Pending | PaymentStatus::Processing
        ) {
            if self.payments.process(payment_id).await? == PaymentOutcome::InFlight {
                return Ok(Step::Done(AdvanceOutcome::AwaitingPayment));
            }
            payment = self.load_payment(payment_id).await?;
        }

        let inline = payment.method_kind().is_none_or(|kind| kind.is_immediate());
        if payment.status() == PaymentStatus::Failed && payment.superseded_by().is_none() && inline {
            let kind = payment.failure_category().unwrap_or(FailureKind::Internal);
            let note = format!(
                "Payment {payment_id}: {}",
                payment.failure_reason().unwrap_or("failed")
            );
            let kind = self.fail_order_as(order_id, kind, &note).await?;
            return Ok(Step::Done(AdvanceOutcome::Failed(kind)));
        }

        self.follow_payment(order_id, payment_id, &payment).await
    }

    async fn await_confirmation(&self, order: &Order) -> Result<Step, FulfillmentError> {
        let order_id = order_id_of(order)?;
        let Some(payment_id) = order.payment_id() else {
            return Ok(Step::Done(AdvanceOutcome::AwaitingPayment));
        };

        let payment = self.load_payment(payment_id).await?;
        self.follow_payment(order_id, payment_id, &payment).await
    }

    /// Moves the order to match its payment.
    async fn follow_payment(
        &self,
        order_id: AggregateId,
        payment_id: AggregateId,
        payment: &Payment,
    ) -> Result<Step, FulfillmentError> {
        match payment.status() {
            PaymentStatus::Completed => {
                let result = self
                    .orders
                    .mark_paid(MarkPaid::new(order_id, payment_id))
                    .await?;
                Ok(Step::Continue(result.aggregate))
            }
            PaymentStatus::PendingConfirmation => {
                self.orders
                    .defer_payment(DeferPayment::new(order_id, payment_id))
                    .await?;
                Ok(Step::Done(AdvanceOutcome::AwaitingConfirmation))
            }
            PaymentStatus::Failed | PaymentStatus::Refunded => {
                tracing::info!(%order_id, %payment_id, "payment attempt failed, waiting for a new one");
                Ok(Step::Done(AdvanceOutcome::AwaitingPayment))
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {
                Ok(Step::Done(AdvanceOutcome::AwaitingPayment))
            }
        }
    }

    async fn finalize(&self, order: &Order) -> Result<Step, FulfillmentError> {
        let order_id = order_id_of(order)?;
        let customer_id = order
            .customer_id()
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        self.collaborators.cart.clear_active_cart(customer_id).await?;

        let points = self.loyalty_points(order);
        let awarded = self
            .collaborators
            .loyalty
            .award(customer_id, order_id, points)
            .await?;

        // A crash between scheduling and recording still repeats that one job.
        for follow_up in FollowUp::ALL {
            if order.has_scheduled(follow_up) {
                continue;
            }
            self.collaborators
                .scheduler
                .schedule(follow_up_job(follow_up, order_id), None)
                .await?;
            self.orders
                .record_follow_up(RecordFollowUp::new(order_id, follow_up))
                .await?;
        }

        self.orders
            .complete_order(CompleteOrder::new(order_id, points))
            .await?;
        tracing::info!(%order_id, points, awarded, "order completed");

        Ok(Step::Done(AdvanceOutcome::Completed))
    }

    fn loyalty_points(&self, order: &Order) -> u64 {
        let whole_units = order.total().map_or(0, |total| total.whole_units());
        u64::try_from(whole_units)
            .unwrap_or(0)
            .saturating_mul(self.config.loyalty_points_per_unit)
    }

    async fn load_payment(&self, payment_id: AggregateId) -> Result<Payment, FulfillmentError> {
        self.payments
            .payments()
            .get_payment(payment_id)
            .await?
            .ok_or(FulfillmentError::PaymentNotFound(payment_id))
    }

    async fn fail_order(
        &self,
        order_id: AggregateId,
        error: &FulfillmentError,
    ) -> Result<FailureKind, FulfillmentError> {
        self.fail_order_as(order_id, error.kind(), &error.to_string())
            .await
    }

    async fn fail_order_as(
        &self,
        order_id: AggregateId,
        kind: FailureKind,
        note: &str,
    ) -> Result<FailureKind, FulfillmentError> {
        let result = self
            .orders
            .fail_order(FailOrder::new(order_id, note, kind))
            .await
            .inspect_err(|e| {
                tracing::error!(%order_id, error = %e, "order failure not recorded");
            })?;

        if !result.is_noop() {
            metrics::counter!("order_failures_total", "kind" => kind.as_str()).increment(1);
            tracing::warn!(%order_id, %kind, note, "order failed");
            self.collaborators
                .notifier
                .order_failed(&result.aggregate, kind, note)
                .await;
        }

        Ok(kind)
    }
}

fn order_id_of(order: &Order) -> Result<AggregateId, FulfillmentError> {
    order.id().ok_or_else(|| {
        DomainError::IncompleteEnvelope {
            aggregate_type: Order::aggregate_type(),
        }
        .into()
    })
}

fn follow_up_job(follow_up: FollowUp, order_id: AggregateId) -> Job {
    match follow_up {
        FollowUp::Shipment => Job::CreateShipment { order_id },
        FollowUp::Confirmation => Job::SendOrderConfirmation { order_id },
        FollowUp::Analytics => Job::UpdateAnalytics { order_id },
    }
}

fn inventory_error(error: DomainError) -> FulfillmentError {
    match error {
        DomainError::Inventory(InventoryError::RecordNotFound { key }) => {
            FulfillmentError::InventoryRecordNotFound { key }
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use common::Money;
    use domain::{
        CustomerId, InMemoryPaymentMethodStore, OrderLine, PaymentMethod, PaymentMethodKind,
        PlaceOrder, StockKey,
    };
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::services::{
        FakeGateway, FakeResponse, GatewayDispatcher, RecordingDelivery, RecordingScheduler,
    };

    struct Fixture {
        processor: OrderProcessor<InMemoryEventStore>,
        card: FakeGateway,
        scheduler: RecordingScheduler,
    }

    fn fixture(config: FulfillmentConfig) -> (Fixture, InMemoryPaymentMethodStore) {
        let methods = InMemoryPaymentMethodStore::new();
        let card = FakeGateway::new("card");
        let scheduler = RecordingScheduler::new();
        let gateways = GatewayDispatcher::new(Duration::from_millis(50))
            .with_client(PaymentMethodKind::Card, Arc::new(card.clone()));
        let collaborators = Collaborators::new(
            gateways,
            Arc::new(methods.clone()),
            Arc::new(scheduler.clone()),
            Arc::new(RecordingDelivery::new()),
        );
        let processor = OrderProcessor::new(InMemoryEventStore::new(), collaborators, config);

        (
            Fixture {
                processor,
                card,
                scheduler,
            },
            methods,
        )
    }

    impl Fixture {
        async fn card_order(
            &self,
            methods: &InMemoryPaymentMethodStore,
            unit_cents: i64,
        ) -> AggregateId {
            self.processor
                .ledger()
                .open_record(StockKey::new("SKU-A", "main"), 100, 0)
                .await
                .unwrap();

            let customer_id = CustomerId::new();
            methods
                .insert_default(PaymentMethod::new(
                    customer_id,
                    PaymentMethodKind::Card,
                    "tok_card",
                ))
                .await;
            let cmd = PlaceOrder::for_customer(
                customer_id,
                vec![OrderLine::new("SKU-A", 2, Money::from_cents(unit_cents))],
            );
            let order_id = cmd.order_id;
            self.processor.orders().place_order(cmd).await.unwrap();
            self.processor
                .payments()
                .begin_attempt(order_id, None)
                .await
                .unwrap();
            order_id
        }

        async fn order(&self, order_id: AggregateId) -> Order {
            self.processor
                .orders()
                .get_order(order_id)
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_loyalty_points_use_whole_units() {
        let (f, methods) = fixture(FulfillmentConfig {
            loyalty_points_per_unit: 3,
            ..FulfillmentConfig::default()
        });
        let order_id = f.card_order(&methods, 2599).await;

        let order = f.order(order_id).await;
        assert_eq!(f.processor.loyalty_points(&order), 153);
    }

    #[tokio::test]
    async fn test_inline_decline_fails_the_order() {
        let (f, methods) = fixture(FulfillmentConfig::default());
        f.card
            .push_capture(FakeResponse::Reject("card_declined".to_string()))
            .await;
        let order_id = f.card_order(&methods, 1000).await;

        let outcome = f.processor.advance(order_id).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Failed(FailureKind::PaymentDeclined));

        let order = f.order(order_id).await;
        assert_eq!(order.status(), OrderStatus::Error);
        assert_eq!(order.failure_category(), Some(FailureKind::PaymentDeclined));
        assert!(order.failure_note().unwrap().contains("card_declined"));
        assert_eq!(f.scheduler.count("create_shipment").await, 0);
    }

    #[tokio::test]
    async fn test_redelivered_finalize_schedules_missing_follow_ups_only() {
        let (f, methods) = fixture(FulfillmentConfig::default());
        let order_id = f.card_order(&methods, 1000).await;
        f.scheduler.drain().await;

        // generate_invoice and advance_order go through, then create_shipment.
        f.scheduler.fail_after(3).await;
        let err = f.processor.advance(order_id).await.unwrap_err();
        assert!(err.is_transient());

        let order = f.order(order_id).await;
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.follow_ups(), &[FollowUp::Shipment]);

        f.scheduler.set_fail_on_schedule(false).await;
        let outcome = f.processor.advance(order_id).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);

        assert_eq!(f.scheduler.count("create_shipment").await, 1);
        assert_eq!(f.scheduler.count("send_order_confirmation").await, 1);
        assert_eq!(f.scheduler.count("update_analytics").await, 1);
        assert_eq!(f.order(order_id).await.follow_ups().len(), 3);
        assert_eq!(f.card.charge_count().await, 1);
    }

    #[test]
    fn test_every_follow_up_maps_to_its_job() {
        let order_id = AggregateId::new();
        let names: Vec<_> = FollowUp::ALL
            .into_iter()
            .map(|follow_up| follow_up_job(follow_up, order_id).name())
            .collect();
        assert_eq!(
            names,
            ["create_shipment", "send_order_confirmation", "update_analytics"]
        );
    }
}
