//! Worker entry point.

use std::sync::Arc;

use domain::InMemoryPaymentMethodStore;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use fulfillment::{FulfillmentConfig, JobHandler, OrderProcessor};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::config::{Config, LogFormat};
use worker::queue::{self, JobWorker, RetryPolicy};
use worker::AppState;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<S: EventStore + Clone + 'static>(
    store: S,
    config: Config,
    fulfillment_config: FulfillmentConfig,
    metrics_handle: PrometheusHandle,
) {
    // 1. Wire the saga onto the in-process queue
    let (scheduler, receiver) = queue::channel();
    let collaborators = worker::local_collaborators(
        scheduler.clone(),
        Arc::new(InMemoryPaymentMethodStore::new()),
        fulfillment_config.gateway_timeout,
    );
    let processor = Arc::new(OrderProcessor::new(store, collaborators, fulfillment_config));
    let handler = Arc::new(JobHandler::new(processor));

    // 2. Start draining the queue
    let job_worker = Arc::new(JobWorker::new(
        handler,
        scheduler.clone(),
        RetryPolicy::from(&config),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(job_worker.run(receiver, shutdown_rx));

    // 3. Serve health, metrics and job intake
    let app = worker::create_app(Arc::new(AppState { scheduler }), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting worker");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 4. Stop taking jobs
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_task.await {
        tracing::error!(error = %e, "job worker task failed");
    }

    tracing::info!("worker shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let fulfillment_config = FulfillmentConfig::from_env();
    tracing::info!(?fulfillment_config, "fulfillment settings loaded");

    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresEventStore::connect(&url)
                .await
                .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using postgres event store");
            serve(store, config, fulfillment_config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory event store");
            serve(
                InMemoryEventStore::new(),
                config,
                fulfillment_config,
                metrics_handle,
            )
            .await;
        }
    }
}
