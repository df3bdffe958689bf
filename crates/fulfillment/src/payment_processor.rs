//! The payment state machine.
//!
//! Card and wallet payments are captured and verified inline. Bank transfers
//! and other kinds park in `pending_confirmation` until their confirmation
//! job runs. A completed payment marks its order paid and schedules the
//! order to advance.

use chrono::Utc;
use common::AggregateId;
use domain::{
    Aggregate, AttachPayment, CompletePayment, DeferPayment, DomainError, FailPayment,
    FailureKind, InitiatePayment, MarkPaid, OrderError, OrderService, OrderStatus, Payment,
    PaymentError, PaymentMethod, PaymentMethodId, PaymentService, PaymentStatus, RecordCapture,
    RefundPayment, ResolveMethod, ScheduleConfirmation, ScheduleRetry, StartPaymentProcessing,
    SupersedePayment,
};
use event_store::EventStore;

use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::jobs::Job;
use crate::services::{CaptureRequest, Collaborators, GatewayError};

/// What a payment job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Completed,
    /// Waiting on the confirmation job.
    Deferred,
    Failed(FailureKind),
    /// Completed, failed or refunded before this delivery.
    AlreadySettled,
    /// Another delivery holds the attempt.
    InFlight,
    /// Captured but unverified; left pending for payment operations.
    Held,
    /// Nothing to do.
    Skipped,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Completed => "completed",
            PaymentOutcome::Deferred => "deferred",
            PaymentOutcome::Failed(_) => "failed",
            PaymentOutcome::AlreadySettled => "already_settled",
            PaymentOutcome::InFlight => "in_flight",
            PaymentOutcome::Held => "held",
            PaymentOutcome::Skipped => "skipped",
        }
    }
}

/// Which job is settling the payment. Decides how transient errors end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    /// ProcessPayment: the attempt returns to pending for another try.
    Inline,
    /// ConfirmPayment: the payment stays parked and the runner redelivers.
    Confirmation,
}

/// Drives payment attempts through the gateways.
pub struct PaymentProcessor<S: EventStore> {
    payments: PaymentService<S>,
    orders: OrderService<S>,
    collaborators: Collaborators,
    config: FulfillmentConfig,
}

impl<S: EventStore + Clone> PaymentProcessor<S> {
    /// Creates a payment processor.
    pub fn new(store: S, collaborators: Collaborators, config: FulfillmentConfig) -> Self {
        Self {
            payments: PaymentService::new(store.clone()),
            orders: OrderService::new(store),
            collaborators,
            config,
        }
    }

    /// Returns the payment service.
    pub fn payments(&self) -> &PaymentService<S> {
        &self.payments
    }

    /// Creates a payment attempt for an order's total and attaches it.
    ///
    /// A previous attempt that has not settled is superseded. An attempt
    /// that is mid-capture, holds captured funds or is already paid blocks
    /// the new one.
    #[tracing::instrument(skip(self))]
    pub async fn begin_attempt(
        &self,
        order_id: AggregateId,
        method_id: Option<PaymentMethodId>,
    ) -> Result<AggregateId, FulfillmentError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        let (Some(customer_id), Some(amount)) = (order.customer_id(), order.total()) else {
            return Err(FulfillmentError::OrderNotFound(order_id));
        };
        if !order.status().accepts_payment() {
            let error = match order.status() {
                OrderStatus::Paid | OrderStatus::Completed => OrderError::AlreadyPaid,
                current_state => OrderError::InvalidStateTransition {
                    current_state,
                    action: "attach payment",
                },
            };
            return Err(DomainError::from(error).into());
        }

        let previous = match order.payment_id() {
            Some(previous_id) => self.payments.get_payment(previous_id).await?,
            None => None,
        };
        if let Some(previous) = &previous {
            match previous.status() {
                PaymentStatus::Processing => {
                    return Err(DomainError::from(PaymentError::AttemptInProgress).into());
                }
                PaymentStatus::Completed | PaymentStatus::Refunded => {
                    return Err(DomainError::from(PaymentError::AlreadyPaid).into());
                }
                status if status.is_open() && previous.is_captured() => {
                    return Err(DomainError::from(PaymentError::AttemptInProgress).into());
                }
                _ => {}
            }
        }

        let mut cmd = InitiatePayment::new(order_id, customer_id, amount);
        if let Some(method_id) = method_id {
            cmd = cmd.with_method(method_id);
        }
        let payment_id = cmd.payment_id;
        self.payments.initiate(cmd).await?;

        if let Some(previous_id) = previous.as_ref().and_then(|p| p.id()) {
            self.payments
                .supersede(SupersedePayment {
                    payment_id: previous_id,
                    superseded_by: payment_id,
                })
                .await?;
            tracing::info!(%previous_id, %payment_id, "previous payment attempt superseded");
        }

        let result = self
            .orders
            .attach_payment(AttachPayment::new(order_id, payment_id))
            .await?;
        tracing::info!(%order_id, %payment_id, %amount, "payment attempt attached");

        if result.aggregate.status() == OrderStatus::InventoryChecked {
            self.collaborators
                .scheduler
                .schedule(Job::AdvanceOrder { order_id }, None)
                .await?;
        }

        Ok(payment_id)
    }

    /// Runs a payment attempt.
    ///
    /// Settled and parked payments are left alone. A payment found in
    /// `processing` is resumed: a recorded capture is verified, not repeated.
    /// Losing a race to another delivery reports where that delivery left
    /// the payment.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, payment_id: AggregateId) -> Result<PaymentOutcome, FulfillmentError> {
        match self.run_attempt(payment_id).await {
            Err(e) if e.is_stale() => self.overtaken(payment_id, &e).await,
            outcome => outcome,
        }
    }

    async fn run_attempt(&self, payment_id: AggregateId) -> Result<PaymentOutcome, FulfillmentError> {
        let Some(payment) = self.payments.get_payment(payment_id).await? else {
            tracing::warn!(%payment_id, "payment not found, skipping");
            return Ok(PaymentOutcome::Skipped);
        };

        let payment = match payment.status() {
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded => {
                return Ok(PaymentOutcome::AlreadySettled);
            }
            PaymentStatus::PendingConfirmation => return Ok(PaymentOutcome::Deferred),
            PaymentStatus::Pending => {
                self.payments
                    .start_processing(StartPaymentProcessing { payment_id })
                    .await?
                    .aggregate
            }
            PaymentStatus::Processing => {
                tracing::info!(%payment_id, attempt = payment.attempts(), "resuming payment");
                payment
            }
        };

        let Some(method) = self.method_for(&payment).await? else {
            return self
                .fail(&payment, &FulfillmentError::PaymentMethodNotFound { payment_id })
                .await;
        };
        let payment = self
            .payments
            .resolve_method(ResolveMethod {
                payment_id,
                method: method.clone(),
            })
            .await?
            .aggregate;

        if method.kind.is_immediate() {
            self.settle(&payment, &method, Settlement::Inline).await
        } else {
            self.defer(&payment).await
        }
    }

    /// Settles a parked payment through its gateway.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, payment_id: AggregateId) -> Result<PaymentOutcome, FulfillmentError> {
        match self.run_confirmation(payment_id).await {
            Err(e) if e.is_stale() => self.overtaken(payment_id, &e).await,
            outcome => outcome,
        }
    }

    async fn run_confirmation(
        &self,
        payment_id: AggregateId,
    ) -> Result<PaymentOutcome, FulfillmentError> {
        let Some(payment) = self.payments.get_payment(payment_id).await? else {
            tracing::warn!(%payment_id, "payment not found, skipping");
            return Ok(PaymentOutcome::Skipped);
        };

        match payment.status() {
            PaymentStatus::PendingConfirmation => {}
            status if status.is_settled() => return Ok(PaymentOutcome::AlreadySettled),
            status => {
                tracing::info!(%payment_id, %status, "payment not awaiting confirmation");
                return Ok(PaymentOutcome::Skipped);
            }
        }

        match self.method_for(&payment).await? {
            Some(method) => self.settle(&payment, &method, Settlement::Confirmation).await,
            None => {
                self.fail(&payment, &FulfillmentError::PaymentMethodNotFound { payment_id })
                    .await
            }
        }
    }

    /// Refunds a completed payment. Moves state only.
    #[tracing::instrument(skip(self))]
    pub async fn refund(
        &self,
        payment_id: AggregateId,
        reason: String,
    ) -> Result<Payment, FulfillmentError> {
        let result = self
            .payments
            .refund(RefundPayment { payment_id, reason })
            .await?;
        tracing::info!(%payment_id, "payment refunded");
        Ok(result.aggregate)
    }

    /// Fails an unsettled payment whose transient error outlived its retries.
    ///
    /// A payment the gateway already captured is held instead.
    #[tracing::instrument(skip(self, error))]
    pub async fn give_up(
        &self,
        payment_id: AggregateId,
        error: &FulfillmentError,
    ) -> Result<(), FulfillmentError> {
        let Some(payment) = self.payments.get_payment(payment_id).await? else {
            return Ok(());
        };
        if !payment.status().is_open() {
            return Ok(());
        }
        if payment.is_captured() {
            self.hold(&payment, &error.to_string()).await?;
        } else {
            self.fail_as(&payment, FailureKind::Transient, &error.to_string())
                .await?;
        }
        Ok(())
    }

    /// Reports where another delivery left a payment this one lost the
    /// race for.
    async fn overtaken(
        &self,
        payment_id: AggregateId,
        error: &FulfillmentError,
    ) -> Result<PaymentOutcome, FulfillmentError> {
        let status = self
            .payments
            .get_payment(payment_id)
            .await?
            .map(|payment| payment.status());
        tracing::info!(%payment_id, ?status, error = %error, "payment moved on by another delivery");

        Ok(match status {
            Some(status) if status.is_settled() => PaymentOutcome::AlreadySettled,
            Some(PaymentStatus::PendingConfirmation) => PaymentOutcome::Deferred,
            Some(_) => PaymentOutcome::InFlight,
            None => PaymentOutcome::Skipped,
        })
    }

    async fn method_for(&self, payment: &Payment) -> Result<Option<PaymentMethod>, FulfillmentError> {
        let methods = &self.collaborators.methods;
        let method = match (payment.method_id(), payment.customer_id()) {
            (Some(method_id), _) => methods.get(method_id).await,
            (None, Some(customer_id)) => methods.default_for_customer(customer_id).await,
            (None, None) => None,
        };
        Ok(method)
    }

    async fn defer(&self, payment: &Payment) -> Result<PaymentOutcome, FulfillmentError> {
        let payment_id = self.id_of(payment)?;
        let delay = self.config.payment_confirmation_delay;

        // Scheduled before the state change: a confirmation job that finds
        // the payment still processing is a no-op.
        self.collaborators
            .scheduler
            .schedule(Job::ConfirmPayment { payment_id }, Some(delay))
            .await?;
        let due_at = Utc::now() + self.config.confirmation_delay();
        self.payments
            .schedule_confirmation(ScheduleConfirmation { payment_id, due_at })
            .await?;
        tracing::info!(%payment_id, %due_at, "payment awaiting confirmation");

        if let Some(order_id) = payment.order_id()
            && let Err(e) = self
                .orders
                .defer_payment(DeferPayment::new(order_id, payment_id))
                .await
        {
            tracing::debug!(%order_id, error = %e, "order not parked; its next advance will");
        }

        Ok(PaymentOutcome::Deferred)
    }

    async fn settle(
        &self,
        payment: &Payment,
        method: &PaymentMethod,
        settlement: Settlement,
    ) -> Result<PaymentOutcome, FulfillmentError> {
        let payment_id = self.id_of(payment)?;
        let amount = payment
            .amount()
            .ok_or(FulfillmentError::PaymentNotFound(payment_id))?;
        let gateways = &self.collaborators.gateways;

        let (payment, transaction_id) = match payment.transaction_id() {
            Some(recorded) => (payment.clone(), recorded.to_string()),
            None => {
                let request = CaptureRequest {
                    payment_id,
                    amount,
                    credentials: method.credentials.clone(),
                };
                match gateways.capture(method.kind, &request).await {
                    Ok(transaction_id) => {
                        let captured = self
                            .payments
                            .record_capture(RecordCapture {
                                payment_id,
                                transaction_id: transaction_id.clone(),
                            })
                            .await?
                            .aggregate;
                        (captured, transaction_id)
                    }
                    Err(e) => return self.gateway_failure(payment, e, settlement).await,
                }
            }
        };

        match gateways.verify(method.kind, &transaction_id).await {
            Ok(true) => self.complete(payment_id).await,
            Ok(false) => {
                self.fail(
                    &payment,
                    &FulfillmentError::PaymentVerificationFailed { transaction_id },
                )
                .await
            }
            Err(e) => self.gateway_failure(&payment, e, settlement).await,
        }
    }

    async fn gateway_failure(
        &self,
        payment: &Payment,
        error: GatewayError,
        settlement: Settlement,
    ) -> Result<PaymentOutcome, FulfillmentError> {
        let error = FulfillmentError::from(error);
        if !error.is_transient() {
            return self.fail(payment, &error).await;
        }

        match settlement {
            Settlement::Confirmation => {
                tracing::warn!(error = %error, "confirmation deferred by gateway failure");
                Err(error)
            }
            Settlement::Inline if payment.attempts() >= self.config.payment_max_attempts => {
                tracing::warn!(
                    attempts = payment.attempts(),
                    error = %error,
                    "payment attempts exhausted"
                );
                if payment.is_captured() {
                    return self.hold(payment, &error.to_string()).await;
                }
                self.fail_as(payment, FailureKind::Transient, &error.to_string())
                    .await
            }
            Settlement::Inline => {
                let payment_id = self.id_of(payment)?;
                self.payments
                    .schedule_retry(ScheduleRetry {
                        payment_id,
                        reason: error.to_string(),
                    })
                    .await?;
                tracing::warn!(
                    %payment_id,
                    attempt = payment.attempts(),
                    error = %error,
                    "payment returned to pending"
                );
                Err(error)
            }
        }
    }

    /// Parks a captured payment that could not be verified and hands it
    /// to payment operations. It is never failed or superseded while the
    /// gateway may hold the funds; a later ProcessPayment verifies it
    /// without capturing again.
    async fn hold(
        &self,
        payment: &Payment,
        reason: &str,
    ) -> Result<PaymentOutcome, FulfillmentError> {
        let payment_id = self.id_of(payment)?;
        let payment = if payment.status() == PaymentStatus::Processing {
            self.payments
                .schedule_retry(ScheduleRetry {
                    payment_id,
                    reason: reason.to_string(),
                })
                .await?
                .aggregate
        } else {
            payment.clone()
        };

        metrics::counter!("payments_held_total").increment(1);
        tracing::error!(
            %payment_id,
            transaction_id = payment.transaction_id().unwrap_or_default(),
            attempts = payment.attempts(),
            reason,
            "captured payment held for reconciliation"
        );
        self.collaborators.notifier.payment_held(&payment, reason).await;

        Ok(PaymentOutcome::Held)
    }

    async fn complete(&self, payment_id: AggregateId) -> Result<PaymentOutcome, FulfillmentError> {
        let result = self
            .payments
            .complete(CompletePayment { payment_id })
            .await?;
        if result.is_noop() {
            return Ok(PaymentOutcome::AlreadySettled);
        }
        let payment = result.aggregate;

        metrics::counter!("payments_completed_total").increment(1);
        tracing::info!(
            %payment_id,
            transaction_id = payment.transaction_id().unwrap_or_default(),
            "payment completed"
        );

        self.collaborators.notifier.payment_succeeded(&payment).await;

        // The payment is settled; follow-ups are best effort from here.
        if let Err(e) = self
            .collaborators
            .scheduler
            .schedule(Job::GenerateInvoice { payment_id }, None)
            .await
        {
            tracing::error!(%payment_id, error = %e, "invoice not scheduled");
        }
        if let Some(order_id) = payment.order_id() {
            self.retrigger_order(order_id, payment_id).await;
        }

        Ok(PaymentOutcome::Completed)
    }

    async fn retrigger_order(&self, order_id: AggregateId, payment_id: AggregateId) {
        if let Err(e) = self
            .orders
            .mark_paid(MarkPaid::new(order_id, payment_id))
            .await
        {
            tracing::warn!(%order_id, %payment_id, error = %e, "order not marked paid");
        }
        if let Err(e) = self
            .collaborators
            .scheduler
            .schedule(Job::AdvanceOrder { order_id }, None)
            .await
        {
            tracing::error!(%order_id, error = %e, "order advance not scheduled");
        }
    }

    async fn fail(
        &self,
        payment: &Payment,
        error: &FulfillmentError,
    ) -> Result<PaymentOutcome, FulfillmentError> {
        self.fail_as(payment, error.kind(), &error.to_string()).await
    }

    async fn fail_as(
        &self,
        payment: &Payment,
        kind: FailureKind,
        reason: &str,
    ) -> Result<PaymentOutcome, FulfillmentError> {
        let payment_id = self.id_of(payment)?;
        let result = self
            .payments
            .fail(FailPayment {
                payment_id,
                reason: reason.to_string(),
                category: kind,
            })
            .await?;

        if !result.is_noop() {
            metrics::counter!("payment_failures_total", "kind" => kind.as_str()).increment(1);
            tracing::warn!(%payment_id, %kind, reason, "payment failed");
            self.collaborators
                .notifier
                .payment_failed(&result.aggregate, kind, reason)
                .await;
        }

        Ok(PaymentOutcome::Failed(kind))
    }

    fn id_of(&self, payment: &Payment) -> Result<AggregateId, FulfillmentError> {
        payment.id().ok_or_else(|| {
            DomainError::IncompleteEnvelope {
                aggregate_type: Payment::aggregate_type(),
            }
            .into()
        })
    }
}
