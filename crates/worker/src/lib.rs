//! Single-node job worker for the fulfillment saga.
//!
//! Hosts the order and payment state machines behind an in-process job
//! queue, with structured logging (tracing), Prometheus metrics and a small
//! HTTP surface for health checks and job intake.

pub mod config;
pub mod error;
pub mod queue;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use domain::{PaymentMethodKind, PaymentMethodStore};
use fulfillment::{Collaborators, FakeGateway, GatewayDispatcher, LoggingDelivery};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use queue::QueueScheduler;

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub scheduler: QueueScheduler,
}

/// Creates the Axum router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/jobs", post(routes::jobs::enqueue))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the saga's collaborators for a local run.
///
/// Every method kind is served by an approving [`FakeGateway`] and
/// notifications go to the log. Cart and loyalty are no-ops.
pub fn local_collaborators(
    scheduler: QueueScheduler,
    methods: Arc<dyn PaymentMethodStore>,
    gateway_timeout: Duration,
) -> Collaborators {
    let gateways = [
        (PaymentMethodKind::Card, "card"),
        (PaymentMethodKind::Wallet, "wallet"),
        (PaymentMethodKind::BankTransfer, "bank"),
        (PaymentMethodKind::Other, "other"),
    ]
    .into_iter()
    .fold(
        GatewayDispatcher::new(gateway_timeout),
        |gateways, (kind, prefix)| gateways.with_client(kind, Arc::new(FakeGateway::new(prefix))),
    );

    Collaborators::new(
        gateways,
        methods,
        Arc::new(scheduler),
        Arc::new(LoggingDelivery),
    )
}
