//! Integration tests for the worker: HTTP surface and queue runner.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{AggregateId, Money};
use domain::{
    CustomerId, InMemoryPaymentMethodStore, OrderLine, OrderStatus, PaymentMethod,
    PaymentMethodKind, PaymentStatus, PlaceOrder, StockKey,
};
use event_store::InMemoryEventStore;
use fulfillment::{
    Collaborators, FakeGateway, FakeResponse, FulfillmentConfig, GatewayDispatcher, Job,
    JobHandler, JobOutcome, LoggingDelivery, OrderProcessor, PaymentOutcome,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;
use worker::AppState;
use worker::queue::{self, Delivery, JobWorker, QueueScheduler, RetryPolicy};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, mpsc::UnboundedReceiver<Delivery>) {
    let (scheduler, receiver) = queue::channel();
    let app = worker::create_app(Arc::new(AppState { scheduler }), get_metrics_handle());
    (app, receiver)
}

fn post_job(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// The saga over an in-memory store, fed by a queue the test controls.
struct TestHarness {
    processor: Arc<OrderProcessor<InMemoryEventStore>>,
    worker: Arc<JobWorker<InMemoryEventStore>>,
    scheduler: QueueScheduler,
    methods: InMemoryPaymentMethodStore,
    card: FakeGateway,
}

impl TestHarness {
    fn new(policy: RetryPolicy) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (scheduler, receiver) = queue::channel();
        let methods = InMemoryPaymentMethodStore::new();
        let card = FakeGateway::new("card");
        let config = FulfillmentConfig {
            gateway_timeout: Duration::from_millis(50),
            ..FulfillmentConfig::default()
        };

        let collaborators = Collaborators::new(
            GatewayDispatcher::new(config.gateway_timeout)
                .with_client(PaymentMethodKind::Card, Arc::new(card.clone())),
            Arc::new(methods.clone()),
            Arc::new(scheduler.clone()),
            Arc::new(LoggingDelivery),
        );
        let processor = Arc::new(OrderProcessor::new(
            InMemoryEventStore::new(),
            collaborators,
            config,
        ));
        let handler = Arc::new(JobHandler::new(processor.clone()));
        let worker = Arc::new(JobWorker::new(handler, scheduler.clone(), policy));

        let harness = Self {
            processor,
            worker,
            scheduler,
            methods,
            card,
        };
        (harness, receiver)
    }

    async fn card_order(&self) -> (AggregateId, AggregateId) {
        let key = StockKey::new("SKU-001", "main");
        self.processor
            .ledger()
            .open_record(key, 10, 0)
            .await
            .unwrap();

        let customer_id = CustomerId::new();
        self.methods
            .insert_default(PaymentMethod::new(
                customer_id,
                PaymentMethodKind::Card,
                "tok_visa",
            ))
            .await;

        let cmd = PlaceOrder::for_customer(
            customer_id,
            vec![OrderLine::new("SKU-001", 2, Money::from_cents(1500))],
        );
        let order_id = cmd.order_id;
        self.processor.orders().place_order(cmd).await.unwrap();
        let payment_id = self
            .processor
            .payments()
            .begin_attempt(order_id, None)
            .await
            .unwrap();
        (order_id, payment_id)
    }

    async fn order_status(&self, order_id: AggregateId) -> OrderStatus {
        self.processor
            .orders()
            .get_order(order_id)
            .await
            .unwrap()
            .unwrap()
            .status()
    }

    async fn payment_status(&self, payment_id: AggregateId) -> PaymentStatus {
        self.processor
            .payments()
            .payments()
            .get_payment(payment_id)
            .await
            .unwrap()
            .unwrap()
            .status()
    }
}

fn quick_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_health_check() {
    let (app, _rx) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _rx) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_enqueue_job() {
    let (app, mut rx) = setup();
    let order_id = AggregateId::new();

    let response = app
        .oneshot(post_job(serde_json::json!({
            "job": { "type": "advance_order", "order_id": order_id }
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["job"], "advance_order");
    assert_eq!(json["queued"], format!("advance_order({order_id})"));

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery, Delivery::first(Job::AdvanceOrder { order_id }));
}

#[tokio::test]
async fn test_enqueue_delayed_job() {
    let (app, mut rx) = setup();

    let response = app
        .oneshot(post_job(serde_json::json!({
            "job": { "type": "confirm_payment", "payment_id": AggregateId::new() },
            "delay_secs": 3600
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["delay_secs"], 3600);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_enqueue_rejects_excessive_delay() {
    let (app, mut rx) = setup();

    let response = app
        .oneshot(post_job(serde_json::json!({
            "job": { "type": "confirm_payment", "payment_id": AggregateId::new() },
            "delay_secs": 30 * 24 * 60 * 60
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_enqueue_unknown_job_type() {
    let (app, _rx) = setup();

    let response = app
        .oneshot(post_job(serde_json::json!({
            "job": { "type": "reticulate_splines" }
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_enqueue_after_queue_closed() {
    let (app, rx) = setup();
    drop(rx);

    let response = app
        .oneshot(post_job(serde_json::json!({
            "job": { "type": "advance_order", "order_id": AggregateId::new() }
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("closed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_runs_order_to_completion() {
    let (h, receiver) = TestHarness::new(quick_retries(3));
    let (order_id, payment_id) = h.card_order().await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(h.worker.clone().run(receiver, shutdown_rx));

    h.scheduler
        .enqueue(Delivery::first(Job::AdvanceOrder { order_id }), None)
        .unwrap();

    let mut status = h.order_status(order_id).await;
    for _ in 0..100 {
        if status == OrderStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = h.order_status(order_id).await;
    }

    assert_eq!(status, OrderStatus::Completed);
    assert_eq!(h.payment_status(payment_id).await, PaymentStatus::Completed);
    assert_eq!(h.card.charge_count().await, 1);

    shutdown_tx.send(true).unwrap();
    running.await.unwrap();
}

#[tokio::test]
async fn test_failed_delivery_is_redelivered() {
    let (h, mut receiver) = TestHarness::new(quick_retries(3));
    let (_, payment_id) = h.card_order().await;
    h.card.push_capture(FakeResponse::Unavailable).await;

    let job = Job::ProcessPayment { payment_id };
    let first = h.worker.deliver(Delivery::first(job.clone())).await;
    assert!(matches!(first, Err(ref e) if e.is_transient()));
    assert_eq!(h.payment_status(payment_id).await, PaymentStatus::Pending);

    let redelivery = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redelivery.job, job);
    assert_eq!(redelivery.attempt, 2);

    let second = h.worker.deliver(redelivery).await.unwrap();
    assert_eq!(second, JobOutcome::Payment(PaymentOutcome::Completed));
    assert_eq!(h.payment_status(payment_id).await, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_final_delivery_gives_up_without_requeue() {
    let (h, mut receiver) = TestHarness::new(quick_retries(1));
    let (_, payment_id) = h.card_order().await;
    h.card.push_capture(FakeResponse::Unavailable).await;

    let outcome = h
        .worker
        .deliver(Delivery::first(Job::ProcessPayment { payment_id }))
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::GaveUp);
    assert_eq!(h.payment_status(payment_id).await, PaymentStatus::Failed);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.try_recv().is_err());
}
