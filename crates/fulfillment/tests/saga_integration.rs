//! Integration tests for the order and payment state machines.

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, Currency, Money};
use domain::{
    CustomerId, DomainError, FailureKind, FulfillmentStep, InMemoryPaymentMethodStore, Order,
    OrderLine, OrderStatus, Payment, PaymentError, PaymentMethod, PaymentMethodKind,
    PaymentStatus, PlaceOrder, StockKey,
};
use event_store::InMemoryEventStore;
use fulfillment::services::CaptureRequest;
use fulfillment::{
    AdvanceOutcome, Collaborators, FakeGateway, FakeResponse, FulfillmentConfig, FulfillmentError,
    GatewayClient, GatewayDispatcher, InMemoryCartService, InMemoryLoyaltyService, Job,
    JobContext, JobHandler, JobOutcome, NotificationType, OpsTeam, OrderProcessor,
    PaymentOutcome, Recipient, RecordingDelivery, RecordingScheduler,
};

struct TestHarness {
    handler: JobHandler<InMemoryEventStore>,
    processor: Arc<OrderProcessor<InMemoryEventStore>>,
    methods: InMemoryPaymentMethodStore,
    card: FakeGateway,
    bank: FakeGateway,
    scheduler: RecordingScheduler,
    delivery: RecordingDelivery,
    cart: InMemoryCartService,
    loyalty: InMemoryLoyaltyService,
    config: FulfillmentConfig,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(FulfillmentConfig {
            gateway_timeout: Duration::from_millis(50),
            payment_confirmation_delay: Duration::from_secs(3600),
            ..FulfillmentConfig::default()
        })
    }

    fn with_config(config: FulfillmentConfig) -> Self {
        let store = InMemoryEventStore::new();
        let methods = InMemoryPaymentMethodStore::new();
        let card = FakeGateway::new("card");
        let wallet = FakeGateway::new("wallet");
        let bank = FakeGateway::new("bank");
        let scheduler = RecordingScheduler::new();
        let delivery = RecordingDelivery::new();
        let cart = InMemoryCartService::new();
        let loyalty = InMemoryLoyaltyService::new();

        let gateways = GatewayDispatcher::new(config.gateway_timeout)
            .with_client(PaymentMethodKind::Card, Arc::new(card.clone()))
            .with_client(PaymentMethodKind::Wallet, Arc::new(wallet))
            .with_client(PaymentMethodKind::BankTransfer, Arc::new(bank.clone()));
        let collaborators = Collaborators::new(
            gateways,
            Arc::new(methods.clone()),
            Arc::new(scheduler.clone()),
            Arc::new(delivery.clone()),
        )
        .with_cart(Arc::new(cart.clone()))
        .with_loyalty(Arc::new(loyalty.clone()));

        let processor = Arc::new(OrderProcessor::new(store, collaborators, config.clone()));
        let handler = JobHandler::new(processor.clone());

        Self {
            handler,
            processor,
            methods,
            card,
            bank,
            scheduler,
            delivery,
            cart,
            loyalty,
            config,
        }
    }

    async fn stock(&self, sku: &str, on_hand: u32, reorder_threshold: u32) -> StockKey {
        let key = StockKey::new(sku, "main");
        self.processor
            .ledger()
            .open_record(key.clone(), on_hand, reorder_threshold)
            .await
            .unwrap();
        key
    }

    async fn customer(&self, kind: PaymentMethodKind) -> (CustomerId, PaymentMethod) {
        let customer_id = CustomerId::new();
        let method = PaymentMethod::new(customer_id, kind, format!("tok_{}", kind.as_str()));
        self.methods.insert_default(method.clone()).await;
        (customer_id, method)
    }

    async fn place(&self, customer_id: CustomerId, lines: Vec<OrderLine>) -> AggregateId {
        for line in &lines {
            self.cart.add_item(customer_id, line.product_id.as_str()).await;
        }
        let cmd = PlaceOrder::for_customer(customer_id, lines);
        let order_id = cmd.order_id;
        self.processor.orders().place_order(cmd).await.unwrap();
        order_id
    }

    async fn place_with_payment(
        &self,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
    ) -> (AggregateId, AggregateId) {
        let order_id = self.place(customer_id, lines).await;
        let payment_id = self
            .processor
            .payments()
            .begin_attempt(order_id, None)
            .await
            .unwrap();
        (order_id, payment_id)
    }

    async fn order(&self, order_id: AggregateId) -> Order {
        self.processor
            .orders()
            .get_order(order_id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn payment(&self, payment_id: AggregateId) -> Payment {
        self.processor
            .payments()
            .payments()
            .get_payment(payment_id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn notified(&self, recipient: &Recipient, event_type: NotificationType) -> usize {
        self.delivery
            .delivered_to(recipient)
            .await
            .iter()
            .filter(|event| event.event_type == event_type)
            .count()
    }
}

fn line(sku: &str, quantity: u32, cents: i64) -> OrderLine {
    OrderLine::new(sku, quantity, Money::from_cents(cents))
}

#[tokio::test]
async fn test_card_order_completes() {
    let h = TestHarness::new();
    let key = h.stock("SKU-001", 10, 2).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 2, 2500)])
        .await;

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Completed);

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Completed);
    assert_eq!(order.next_step(), FulfillmentStep::None);
    assert_eq!(order.loyalty_points(), 50);

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Completed);
    assert!(payment.is_verified());
    assert!(payment.transaction_id().unwrap().starts_with("card_"));

    assert_eq!(h.processor.ledger().quantity(&key).await.unwrap(), Some(8));
    assert_eq!(h.cart.item_count(customer_id).await, 0);
    assert_eq!(h.loyalty.grant_count().await, 1);
    assert_eq!(h.loyalty.balance(customer_id).await, 50);
    assert_eq!(h.card.charge_count().await, 1);

    let customer = Recipient::Customer(customer_id);
    assert_eq!(h.notified(&customer, NotificationType::PaymentSucceeded).await, 1);

    for job in [
        "generate_invoice",
        "create_shipment",
        "send_order_confirmation",
        "update_analytics",
    ] {
        assert_eq!(h.scheduler.count(job).await, 1, "{job} scheduled once");
    }
}

#[tokio::test]
async fn test_advance_is_idempotent_once_completed() {
    let h = TestHarness::new();
    let key = h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 3, 1000)])
        .await;
    h.processor.advance(order_id).await.unwrap();

    let again = h.processor.advance(order_id).await.unwrap();
    let payment_again = h.processor.payments().process(payment_id).await.unwrap();

    assert_eq!(again, AdvanceOutcome::NoOp);
    assert_eq!(payment_again, PaymentOutcome::AlreadySettled);
    assert_eq!(h.processor.ledger().quantity(&key).await.unwrap(), Some(7));
    assert_eq!(h.processor.ledger().movements(&key).await.unwrap().len(), 1);
    assert_eq!(h.loyalty.grant_count().await, 1);
    assert_eq!(h.card.charge_count().await, 1);
}

#[tokio::test]
async fn test_shortage_keeps_earlier_decrements() {
    let h = TestHarness::new();
    let sku_a = h.stock("SKU-A", 10, 0).await;
    let sku_b = h.stock("SKU-B", 5, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(
            customer_id,
            vec![line("SKU-A", 1, 1000), line("SKU-B", 100, 100)],
        )
        .await;

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Failed(FailureKind::StockShortage));

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Error);
    assert_eq!(order.failure_category(), Some(FailureKind::StockShortage));
    assert!(order.failure_note().unwrap().contains("SKU-B@main"));

    assert_eq!(h.processor.ledger().quantity(&sku_a).await.unwrap(), Some(9));
    assert_eq!(h.processor.ledger().quantity(&sku_b).await.unwrap(), Some(5));

    let movements = h
        .processor
        .ledger()
        .movements_for_reference(order_id)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].0, sku_a.record_id());
    assert_eq!(movements[0].1.delta, -1);

    let inventory_ops = Recipient::Operations(OpsTeam::Inventory);
    assert_eq!(h.notified(&inventory_ops, NotificationType::OrderFailed).await, 1);
    assert_eq!(h.payment(payment_id).await.status(), PaymentStatus::Pending);
    assert_eq!(h.card.capture_calls().await, 0);

    assert_eq!(h.processor.advance(order_id).await.unwrap(), AdvanceOutcome::NoOp);
    assert_eq!(h.processor.ledger().quantity(&sku_a).await.unwrap(), Some(9));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_orders_race_for_last_unit() {
    let h = Arc::new(TestHarness::new());
    let key = h.stock("SKU-LAST", 1, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (first, _) = h
        .place_with_payment(customer_id, vec![line("SKU-LAST", 1, 1000)])
        .await;
    let (second, _) = h
        .place_with_payment(customer_id, vec![line("SKU-LAST", 1, 1000)])
        .await;

    let a = tokio::spawn({
        let h = h.clone();
        async move { h.processor.advance(first).await.unwrap() }
    });
    let b = tokio::spawn({
        let h = h.clone();
        async move { h.processor.advance(second).await.unwrap() }
    });
    let outcomes = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == AdvanceOutcome::Completed)
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == AdvanceOutcome::Failed(FailureKind::StockShortage))
            .count(),
        1
    );
    assert_eq!(h.processor.ledger().quantity(&key).await.unwrap(), Some(0));
    assert_eq!(h.processor.ledger().movements(&key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bank_transfer_waits_for_confirmation() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::BankTransfer).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 4200)])
        .await;

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::AwaitingConfirmation);

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::PendingConfirmation);
    assert!(payment.confirmation_due_at().is_some());
    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::InventoryChecked);
    assert_eq!(order.next_step(), FulfillmentStep::AwaitPaymentConfirmation);
    assert_eq!(h.bank.capture_calls().await, 0);

    let confirm = h
        .scheduler
        .scheduled()
        .await
        .into_iter()
        .find(|s| s.job == Job::ConfirmPayment { payment_id })
        .expect("confirmation scheduled");
    assert_eq!(confirm.delay, Some(h.config.payment_confirmation_delay));

    // An advance before confirmation changes nothing.
    assert_eq!(
        h.processor.advance(order_id).await.unwrap(),
        AdvanceOutcome::AwaitingConfirmation
    );

    let outcome = h
        .handler
        .handle(&Job::ConfirmPayment { payment_id }, JobContext::once())
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Payment(PaymentOutcome::Completed));
    assert_eq!(h.order(order_id).await.status(), OrderStatus::Paid);
    assert!(
        h.scheduler
            .scheduled()
            .await
            .iter()
            .any(|s| s.job == Job::AdvanceOrder { order_id })
    );

    let outcome = h
        .handler
        .handle(&Job::AdvanceOrder { order_id }, JobContext::once())
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Order(AdvanceOutcome::Completed));
    assert_eq!(h.loyalty.balance(customer_id).await, 42);
}

#[tokio::test]
async fn test_card_rejection_routes_to_customer_and_payment_ops() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1999)])
        .await;
    h.card
        .push_capture(FakeResponse::Reject("card_declined".to_string()))
        .await;

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Failed(FailureKind::PaymentDeclined));

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Failed);
    assert_eq!(payment.failure_category(), Some(FailureKind::PaymentDeclined));
    assert!(payment.failure_reason().unwrap().contains("card_declined"));

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Error);
    assert_eq!(order.failure_category(), Some(FailureKind::PaymentDeclined));
    assert!(order.failure_note().unwrap().contains("card_declined"));

    let customer = Recipient::Customer(customer_id);
    let payment_ops = Recipient::Operations(OpsTeam::Payment);
    assert_eq!(h.notified(&customer, NotificationType::PaymentFailed).await, 1);
    assert_eq!(h.notified(&customer, NotificationType::OrderFailed).await, 1);
    assert_eq!(h.notified(&payment_ops, NotificationType::PaymentFailed).await, 1);
    assert_eq!(h.notified(&payment_ops, NotificationType::OrderFailed).await, 0);
    let customer_message = &h.delivery.delivered_to(&customer).await[0].message;
    assert!(customer_message.contains("$19.99"));

    // A failed order takes no further attempts.
    let result = h.processor.payments().begin_attempt(order_id, None).await;
    assert!(matches!(result, Err(FulfillmentError::Domain(_))));
    assert_eq!(h.scheduler.count("create_shipment").await, 0);
}

#[tokio::test]
async fn test_gateway_timeout_returns_payment_to_pending_then_fails() {
    let h = TestHarness::with_config(FulfillmentConfig {
        gateway_timeout: Duration::from_millis(20),
        payment_max_attempts: 2,
        ..FulfillmentConfig::default()
    });
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;
    h.card.push_capture(FakeResponse::Hang).await;
    h.card.push_capture(FakeResponse::Hang).await;

    let first = h.processor.advance(order_id).await;
    assert!(matches!(first, Err(ref e) if e.is_transient()));

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Pending);
    assert_eq!(payment.attempts(), 1);
    assert_eq!(h.order(order_id).await.status(), OrderStatus::InventoryChecked);

    let second = h.processor.advance(order_id).await.unwrap();
    assert_eq!(second, AdvanceOutcome::Failed(FailureKind::Transient));

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Failed);
    assert_eq!(payment.attempts(), 2);
    assert_eq!(payment.failure_category(), Some(FailureKind::Transient));
    assert_eq!(h.order(order_id).await.status(), OrderStatus::Error);

    let payment_ops = Recipient::Operations(OpsTeam::Payment);
    let system_ops = Recipient::Operations(OpsTeam::System);
    assert_eq!(h.notified(&payment_ops, NotificationType::PaymentFailed).await, 1);
    assert_eq!(h.notified(&system_ops, NotificationType::OrderFailed).await, 1);
    assert_eq!(h.card.charge_count().await, 0);
}

#[tokio::test]
async fn test_unverified_capture_blocks_a_second_charge() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;
    h.card.push_verify(FakeResponse::Hang).await;

    let first = h.processor.advance(order_id).await;
    assert!(matches!(first, Err(ref e) if e.is_transient()));

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Pending);
    assert!(payment.is_captured());

    let result = h.processor.payments().begin_attempt(order_id, None).await;
    assert!(matches!(
        result,
        Err(FulfillmentError::Domain(DomainError::Payment(
            PaymentError::AttemptInProgress
        )))
    ));
    assert_eq!(h.order(order_id).await.payment_id(), Some(payment_id));

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Completed);
    assert_eq!(h.payment(payment_id).await.status(), PaymentStatus::Completed);
    assert_eq!(h.card.capture_calls().await, 1);
    assert_eq!(h.card.charge_count().await, 1);
}

#[tokio::test]
async fn test_exhausted_captured_payment_is_held_not_failed() {
    let h = TestHarness::with_config(FulfillmentConfig {
        gateway_timeout: Duration::from_millis(20),
        payment_max_attempts: 1,
        ..FulfillmentConfig::default()
    });
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;
    h.card.push_verify(FakeResponse::Hang).await;

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::AwaitingPayment);

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Pending);
    assert!(payment.is_captured());
    assert_eq!(payment.failure_category(), None);
    assert_eq!(h.order(order_id).await.status(), OrderStatus::InventoryChecked);

    let customer = Recipient::Customer(customer_id);
    let payment_ops = Recipient::Operations(OpsTeam::Payment);
    assert_eq!(h.notified(&payment_ops, NotificationType::PaymentHeld).await, 1);
    assert_eq!(h.notified(&customer, NotificationType::PaymentFailed).await, 0);
    assert!(
        h.processor
            .payments()
            .begin_attempt(order_id, None)
            .await
            .is_err()
    );

    // Payment operations re-enqueue the attempt once the gateway answers.
    let outcome = h
        .handler
        .handle(&Job::ProcessPayment { payment_id }, JobContext::once())
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Payment(PaymentOutcome::Completed));
    assert_eq!(h.order(order_id).await.status(), OrderStatus::Paid);
    assert_eq!(h.card.charge_count().await, 1);
}

#[tokio::test]
async fn test_final_delivery_holds_captured_payment() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;
    h.card.push_verify(FakeResponse::Unavailable).await;

    let outcome = h
        .handler
        .handle(
            &Job::AdvanceOrder { order_id },
            JobContext {
                attempt: 3,
                max_attempts: 3,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::GaveUp);
    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Pending);
    assert!(payment.is_captured());
    assert_eq!(h.order(order_id).await.status(), OrderStatus::InventoryChecked);

    let payment_ops = Recipient::Operations(OpsTeam::Payment);
    let system_ops = Recipient::Operations(OpsTeam::System);
    assert_eq!(h.notified(&payment_ops, NotificationType::PaymentHeld).await, 1);
    assert_eq!(h.notified(&system_ops, NotificationType::OrderFailed).await, 0);
    assert_eq!(h.card.charge_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_advance_and_payment_job_never_error_a_paid_order() {
    let h = Arc::new(TestHarness::new());
    h.stock("SKU-001", 1000, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;

    let trials = 40;
    for _ in 0..trials {
        let (order_id, payment_id) = h
            .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
            .await;

        let advance = tokio::spawn({
            let h = h.clone();
            async move { h.processor.advance(order_id).await }
        });
        let process = tokio::spawn({
            let h = h.clone();
            async move { h.processor.payments().process(payment_id).await }
        });
        let advanced = advance.await.unwrap();
        let processed = process.await.unwrap();
        assert!(advanced.is_ok(), "{advanced:?}");
        assert!(processed.is_ok(), "{processed:?}");

        assert_ne!(h.order(order_id).await.status(), OrderStatus::Error);
        assert_eq!(h.payment(payment_id).await.status(), PaymentStatus::Completed);

        // The AdvanceOrder job the payment scheduled finishes the order.
        h.processor.advance(order_id).await.unwrap();
        assert_eq!(h.order(order_id).await.status(), OrderStatus::Completed);
    }

    let system_ops = Recipient::Operations(OpsTeam::System);
    assert_eq!(h.notified(&system_ops, NotificationType::OrderFailed).await, 0);
    assert_eq!(h.card.charge_count().await, trials);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redelivery_of_one_payment_charges_once() {
    let h = Arc::new(TestHarness::new());
    h.stock("SKU-001", 100, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;

    let trials = 20;
    for _ in 0..trials {
        let (order_id, payment_id) = h
            .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
            .await;
        let deliveries: Vec<_> = (0..3)
            .map(|_| {
                let h = h.clone();
                tokio::spawn(async move { h.processor.payments().process(payment_id).await })
            })
            .collect();

        let mut completed = 0;
        for delivery in deliveries {
            match delivery.await.unwrap().unwrap() {
                PaymentOutcome::Completed => completed += 1,
                PaymentOutcome::AlreadySettled | PaymentOutcome::InFlight => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(completed, 1);

        let payment = h.payment(payment_id).await;
        assert_ne!(payment.status(), PaymentStatus::Failed);
        let order = h.order(order_id).await;
        assert_ne!(order.status(), OrderStatus::Error);
    }
    assert_eq!(h.card.charge_count().await, trials);
}

#[tokio::test]
async fn test_redelivered_payment_verifies_without_recapturing() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, method) = h.customer(PaymentMethodKind::Card).await;
    let order_id = h.place(customer_id, vec![line("SKU-001", 1, 1000)]).await;
    let payment_id = h
        .processor
        .payments()
        .begin_attempt(order_id, Some(method.id))
        .await
        .unwrap();

    // A delivery that captured and crashed before completing.
    let payments = h.processor.payments().payments();
    payments
        .start_processing(domain::StartPaymentProcessing { payment_id })
        .await
        .unwrap();
    let transaction_id = h
        .card
        .capture(&CaptureRequest {
            payment_id,
            amount: Money::from_cents(1000),
            credentials: method.credentials.clone(),
        })
        .await
        .unwrap();
    payments
        .record_capture(domain::RecordCapture {
            payment_id,
            transaction_id: transaction_id.clone(),
        })
        .await
        .unwrap();

    let outcome = h.processor.payments().process(payment_id).await.unwrap();

    assert_eq!(outcome, PaymentOutcome::Completed);
    assert_eq!(h.card.capture_calls().await, 1);
    let payment = h.payment(payment_id).await;
    assert_eq!(payment.transaction_id(), Some(transaction_id.as_str()));
    assert_eq!(payment.attempts(), 1);
}

#[tokio::test]
async fn test_notification_failures_do_not_affect_the_saga() {
    let h = TestHarness::new();
    h.stock("SKU-001", 3, 5).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Wallet).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;
    h.delivery.set_fail_on_notify(true).await;

    let outcome = h.processor.advance(order_id).await.unwrap();

    assert_eq!(outcome, AdvanceOutcome::Completed);
    assert!(
        h.payment(payment_id)
            .await
            .transaction_id()
            .unwrap()
            .starts_with("wallet_")
    );
    assert!(h.delivery.delivered().await.is_empty());
    assert_eq!(h.scheduler.count("replenish_stock").await, 1);
}

#[tokio::test]
async fn test_low_stock_alerts_inventory_ops() {
    let h = TestHarness::new();
    let key = h.stock("SKU-001", 5, 3).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, _) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 2, 1000)])
        .await;

    h.processor.advance(order_id).await.unwrap();

    let inventory_ops = Recipient::Operations(OpsTeam::Inventory);
    assert_eq!(h.notified(&inventory_ops, NotificationType::LowStock).await, 1);
    let replenish = h
        .scheduler
        .scheduled()
        .await
        .into_iter()
        .find(|s| s.job.name() == "replenish_stock")
        .unwrap();
    assert_eq!(replenish.job, Job::ReplenishStock { key, on_hand: 3 });
}

#[tokio::test]
async fn test_missing_payment_method_is_a_configuration_failure() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let customer_id = CustomerId::new();
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Failed(FailureKind::Configuration));

    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Failed);
    assert_eq!(payment.failure_category(), Some(FailureKind::Configuration));
    assert_eq!(h.order(order_id).await.status(), OrderStatus::Error);

    let system_ops = Recipient::Operations(OpsTeam::System);
    let customer = Recipient::Customer(customer_id);
    assert_eq!(h.notified(&system_ops, NotificationType::PaymentFailed).await, 1);
    assert_eq!(h.notified(&system_ops, NotificationType::OrderFailed).await, 1);
    assert_eq!(h.notified(&customer, NotificationType::PaymentFailed).await, 1);
}

#[tokio::test]
async fn test_missing_inventory_record_fails_order_to_system_ops() {
    let h = TestHarness::new();
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, _) = h
        .place_with_payment(customer_id, vec![line("SKU-GHOST", 1, 1000)])
        .await;

    let outcome = h.processor.advance(order_id).await.unwrap();

    assert_eq!(outcome, AdvanceOutcome::Failed(FailureKind::Configuration));
    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Error);
    assert!(order.failure_note().unwrap().contains("SKU-GHOST@main"));

    let system_ops = Recipient::Operations(OpsTeam::System);
    assert_eq!(h.notified(&system_ops, NotificationType::OrderFailed).await, 1);
}

#[tokio::test]
async fn test_order_without_payment_waits() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let order_id = h.place(customer_id, vec![line("SKU-001", 1, 1000)]).await;

    let outcome = h.processor.advance(order_id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::AwaitingPayment);
    assert_eq!(h.order(order_id).await.status(), OrderStatus::InventoryChecked);

    h.processor
        .payments()
        .begin_attempt(order_id, None)
        .await
        .unwrap();
    let advance = h.scheduler.drain().await;
    assert_eq!(advance.len(), 1);

    let outcome = h.handler.handle(&advance[0].job, JobContext::once()).await.unwrap();
    assert_eq!(outcome, JobOutcome::Order(AdvanceOutcome::Completed));
}

#[tokio::test]
async fn test_new_attempt_supersedes_parked_payment() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::BankTransfer).await;
    let (order_id, first) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;
    assert_eq!(
        h.processor.advance(order_id).await.unwrap(),
        AdvanceOutcome::AwaitingConfirmation
    );

    let card = PaymentMethod::new(customer_id, PaymentMethodKind::Card, "tok_visa");
    h.methods.insert(card.clone()).await;
    let second = h
        .processor
        .payments()
        .begin_attempt(order_id, Some(card.id))
        .await
        .unwrap();

    let superseded = h.payment(first).await;
    assert_eq!(superseded.status(), PaymentStatus::Failed);
    assert_eq!(superseded.superseded_by(), Some(second));
    assert_eq!(h.order(order_id).await.next_step(), FulfillmentStep::CapturePayment);

    assert_eq!(
        h.processor.advance(order_id).await.unwrap(),
        AdvanceOutcome::Completed
    );

    // The stale confirmation job finds nothing to do.
    let outcome = h.processor.payments().confirm(first).await.unwrap();
    assert_eq!(outcome, PaymentOutcome::AlreadySettled);
    assert_eq!(h.bank.capture_calls().await, 0);

    // A paid order takes no further attempts.
    let result = h.processor.payments().begin_attempt(order_id, None).await;
    assert!(matches!(result, Err(FulfillmentError::Domain(_))));
}

#[tokio::test]
async fn test_confirmation_gives_up_on_final_delivery() {
    let h = TestHarness::new();
    h.stock("SKU-001", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::BankTransfer).await;
    let (order_id, payment_id) = h
        .place_with_payment(customer_id, vec![line("SKU-001", 1, 1000)])
        .await;
    h.processor.advance(order_id).await.unwrap();

    h.bank.push_capture(FakeResponse::Unavailable).await;
    let job = Job::ConfirmPayment { payment_id };
    let first = h
        .handler
        .handle(
            &job,
            JobContext {
                attempt: 1,
                max_attempts: 2,
            },
        )
        .await;
    assert!(matches!(first, Err(ref e) if e.is_transient()));
    assert_eq!(
        h.payment(payment_id).await.status(),
        PaymentStatus::PendingConfirmation
    );

    h.bank.push_capture(FakeResponse::Unavailable).await;
    let last = h
        .handler
        .handle(
            &job,
            JobContext {
                attempt: 2,
                max_attempts: 2,
            },
        )
        .await
        .unwrap();

    assert_eq!(last, JobOutcome::GaveUp);
    let payment = h.payment(payment_id).await;
    assert_eq!(payment.status(), PaymentStatus::Failed);
    assert_eq!(payment.failure_category(), Some(FailureKind::Transient));
    assert_eq!(h.order(order_id).await.status(), OrderStatus::InventoryChecked);
}

#[tokio::test]
async fn test_missing_order_is_skipped() {
    let h = TestHarness::new();
    let outcome = h.processor.advance(AggregateId::new()).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Skipped);
}

#[tokio::test]
async fn test_yen_amounts_have_no_minor_units() {
    let h = TestHarness::new();
    h.stock("SKU-JP", 10, 0).await;
    let (customer_id, _) = h.customer(PaymentMethodKind::Card).await;
    let (order_id, _) = h
        .place_with_payment(
            customer_id,
            vec![OrderLine::new("SKU-JP", 1, Money::new(1500, Currency::Jpy))],
        )
        .await;
    h.card
        .push_capture(FakeResponse::Reject("do_not_honor".to_string()))
        .await;

    h.processor.advance(order_id).await.unwrap();

    let customer = Recipient::Customer(customer_id);
    let message = &h.delivery.delivered_to(&customer).await[0].message;
    assert!(message.contains("¥1500"), "{message}");
}
