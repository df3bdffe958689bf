//! Jobs exchanged with the scheduler and the handler that runs them.

use std::sync::Arc;

use common::AggregateId;
use domain::StockKey;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::error::FulfillmentError;
use crate::order_processor::{AdvanceOutcome, OrderProcessor};
use crate::payment_processor::{PaymentOutcome, PaymentProcessor};

/// A unit of work for the at-least-once queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    AdvanceOrder { order_id: AggregateId },
    ProcessPayment { payment_id: AggregateId },
    ConfirmPayment { payment_id: AggregateId },
    CreateShipment { order_id: AggregateId },
    SendOrderConfirmation { order_id: AggregateId },
    GenerateInvoice { payment_id: AggregateId },
    UpdateAnalytics { order_id: AggregateId },
    ReplenishStock { key: StockKey, on_hand: u32 },
}

impl Job {
    /// Returns the job name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Job::AdvanceOrder { .. } => "advance_order",
            Job::ProcessPayment { .. } => "process_payment",
            Job::ConfirmPayment { .. } => "confirm_payment",
            Job::CreateShipment { .. } => "create_shipment",
            Job::SendOrderConfirmation { .. } => "send_order_confirmation",
            Job::GenerateInvoice { .. } => "generate_invoice",
            Job::UpdateAnalytics { .. } => "update_analytics",
            Job::ReplenishStock { .. } => "replenish_stock",
        }
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::AdvanceOrder { order_id }
            | Job::CreateShipment { order_id }
            | Job::SendOrderConfirmation { order_id }
            | Job::UpdateAnalytics { order_id } => write!(f, "{}({order_id})", self.name()),
            Job::ProcessPayment { payment_id }
            | Job::ConfirmPayment { payment_id }
            | Job::GenerateInvoice { payment_id } => write!(f, "{}({payment_id})", self.name()),
            Job::ReplenishStock { key, .. } => write!(f, "{}({key})", self.name()),
        }
    }
}

/// Delivery information the runner passes with each job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    /// 1-based delivery count.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext {
    /// Context for a single delivery with no redelivery.
    pub fn once() -> Self {
        Self {
            attempt: 1,
            max_attempts: 1,
        }
    }

    /// Returns true if the runner will not redeliver after this attempt.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// What a handled job did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Order(AdvanceOutcome),
    Payment(PaymentOutcome),
    /// A transient error outlived its final delivery and was turned into a failure.
    GaveUp,
    /// Hand-off to a subsystem outside the core (shipping, invoicing, analytics).
    Acknowledged,
}

impl JobOutcome {
    /// Returns the outcome label used in metrics.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Order(outcome) => outcome.as_str(),
            JobOutcome::Payment(outcome) => outcome.as_str(),
            JobOutcome::GaveUp => "gave_up",
            JobOutcome::Acknowledged => "acknowledged",
        }
    }
}

/// Runs jobs against the order and payment state machines.
///
/// Business failures are turned into state transitions and notifications
/// here. Only transient errors and failures of the error path itself are
/// returned, so the runner knows to redeliver.
pub struct JobHandler<S: EventStore> {
    orders: Arc<OrderProcessor<S>>,
}

impl<S: EventStore + Clone> JobHandler<S> {
    /// Creates a handler over an order processor.
    pub fn new(orders: Arc<OrderProcessor<S>>) -> Self {
        Self { orders }
    }

    /// Returns the order processor.
    pub fn orders(&self) -> &OrderProcessor<S> {
        &self.orders
    }

    /// Returns the payment processor.
    pub fn payments(&self) -> &PaymentProcessor<S> {
        self.orders.payments()
    }

    /// Runs one delivery of a job.
    #[tracing::instrument(skip(self), fields(job = job.name(), attempt = ctx.attempt))]
    pub async fn handle(&self, job: &Job, ctx: JobContext) -> Result<JobOutcome, FulfillmentError> {
        let result = self.dispatch(job).await;

        let result = match result {
            Err(e) if e.is_transient() && ctx.is_final_attempt() => {
                tracing::error!(error = %e, "transient failure outlived its retries");
                self.give_up(job, &e).await.map(|_| JobOutcome::GaveUp)
            }
            other => other,
        };

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) if e.is_transient() => "retry",
            Err(_) => "error",
        };
        metrics::counter!("jobs_processed_total", "job" => job.name(), "outcome" => outcome)
            .increment(1);

        result
    }

    async fn dispatch(&self, job: &Job) -> Result<JobOutcome, FulfillmentError> {
        match job {
            Job::AdvanceOrder { order_id } => {
                self.orders.advance(*order_id).await.map(JobOutcome::Order)
            }
            Job::ProcessPayment { payment_id } => self
                .payments()
                .process(*payment_id)
                .await
                .map(JobOutcome::Payment),
            Job::ConfirmPayment { payment_id } => self
                .payments()
                .confirm(*payment_id)
                .await
                .map(JobOutcome::Payment),
            Job::SendOrderConfirmation { order_id } => {
                self.orders.send_confirmation(*order_id).await?;
                Ok(JobOutcome::Acknowledged)
            }
            Job::CreateShipment { order_id } | Job::UpdateAnalytics { order_id } => {
                tracing::info!(%order_id, job = job.name(), "handed off");
                Ok(JobOutcome::Acknowledged)
            }
            Job::GenerateInvoice { payment_id } => {
                tracing::info!(%payment_id, job = job.name(), "handed off");
                Ok(JobOutcome::Acknowledged)
            }
            Job::ReplenishStock { key, on_hand } => {
                tracing::info!(%key, on_hand, "replenishment requested");
                Ok(JobOutcome::Acknowledged)
            }
        }
    }

    async fn give_up(&self, job: &Job, error: &FulfillmentError) -> Result<(), FulfillmentError> {
        match job {
            Job::AdvanceOrder { order_id } => self.orders.give_up(*order_id, error).await,
            Job::ProcessPayment { payment_id } | Job::ConfirmPayment { payment_id } => {
                self.payments().give_up(*payment_id, error).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_json_shape() {
        let order_id = AggregateId::new();
        let job = Job::AdvanceOrder { order_id };

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "advance_order");
        assert_eq!(json["order_id"], order_id.to_string());

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_replenish_job_carries_key() {
        let job: Job = serde_json::from_str(
            r#"{"type":"replenish_stock","key":{"product_id":"SKU-A","variant_id":null,"warehouse_id":"main"},"on_hand":2}"#,
        )
        .unwrap();
        assert_eq!(job.to_string(), "replenish_stock(SKU-A@main)");
    }

    #[test]
    fn test_final_attempt() {
        assert!(JobContext::once().is_final_attempt());
        let ctx = JobContext {
            attempt: 2,
            max_attempts: 5,
        };
        assert!(!ctx.is_final_attempt());
    }
}
