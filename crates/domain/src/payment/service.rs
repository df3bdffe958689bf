//! Payment service providing a simplified API for payment operations.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    CompletePayment, FailPayment, InitiatePayment, Payment, RecordCapture, RefundPayment,
    ResolveMethod, ScheduleConfirmation, ScheduleRetry, StartPaymentProcessing, SupersedePayment,
};

/// Service for managing payment attempts.
pub struct PaymentService<S: EventStore> {
    handler: CommandHandler<S, Payment>,
}

impl<S: EventStore> PaymentService<S> {
    /// Creates a new payment service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Payment> {
        &self.handler
    }

    /// Creates a payment attempt.
    #[tracing::instrument(skip(self, cmd), fields(payment_id = %cmd.payment_id, order_id = %cmd.order_id))]
    pub async fn initiate(
        &self,
        cmd: InitiatePayment,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(cmd.payment_id, |payment| {
                payment.initiate(
                    cmd.payment_id,
                    cmd.order_id,
                    cmd.customer_id,
                    cmd.amount,
                    cmd.method_id,
                )
            })
            .await
    }

    /// Claims a pending attempt for dispatch.
    #[tracing::instrument(skip(self))]
    pub async fn start_processing(
        &self,
        cmd: StartPaymentProcessing,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(cmd.payment_id, |payment| payment.start_processing())
            .await
    }

    /// Records the resolved method.
    #[tracing::instrument(skip(self, cmd), fields(payment_id = %cmd.payment_id, kind = %cmd.method.kind))]
    pub async fn resolve_method(
        &self,
        cmd: ResolveMethod,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(cmd.payment_id, |payment| payment.resolve_method(&cmd.method))
            .await
    }

    /// Parks an attempt until its confirmation job runs.
    #[tracing::instrument(skip(self))]
    pub async fn schedule_confirmation(
        &self,
        cmd: ScheduleConfirmation,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(cmd.payment_id, |payment| {
                payment.schedule_confirmation(cmd.due_at)
            })
            .await
    }

    /// Records a gateway capture.
    #[tracing::instrument(skip(self))]
    pub async fn record_capture(
        &self,
        cmd: RecordCapture,
    ) -> Result<CommandResult<Payment>, DomainError> {
        let RecordCapture {
            payment_id,
            transaction_id,
        } = cmd;

        self.handler
            .execute(payment_id, |payment| payment.record_capture(transaction_id))
            .await
    }

    /// Verifies and completes a captured payment.
    #[tracing::instrument(skip(self))]
    pub async fn complete(
        &self,
        cmd: CompletePayment,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(cmd.payment_id, |payment| payment.complete())
            .await
    }

    /// Returns an in-flight attempt to pending.
    #[tracing::instrument(skip(self))]
    pub async fn schedule_retry(
        &self,
        cmd: ScheduleRetry,
    ) -> Result<CommandResult<Payment>, DomainError> {
        let ScheduleRetry { payment_id, reason } = cmd;

        self.handler
            .execute(payment_id, |payment| payment.schedule_retry(reason))
            .await
    }

    /// Fails an attempt.
    #[tracing::instrument(skip(self))]
    pub async fn fail(&self, cmd: FailPayment) -> Result<CommandResult<Payment>, DomainError> {
        let FailPayment {
            payment_id,
            reason,
            category,
        } = cmd;

        self.handler
            .execute(payment_id, |payment| payment.fail(reason, category))
            .await
    }

    /// Supersedes an attempt.
    #[tracing::instrument(skip(self))]
    pub async fn supersede(
        &self,
        cmd: SupersedePayment,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(cmd.payment_id, |payment| payment.supersede(cmd.superseded_by))
            .await
    }

    /// Refunds a completed payment.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, cmd: RefundPayment) -> Result<CommandResult<Payment>, DomainError> {
        let RefundPayment { payment_id, reason } = cmd;

        self.handler
            .execute(payment_id, |payment| payment.refund(reason))
            .await
    }

    /// Loads a payment by ID.
    #[tracing::instrument(skip(self))]
    pub async fn get_payment(
        &self,
        payment_id: AggregateId,
    ) -> Result<Option<Payment>, DomainError> {
        self.handler.load_existing(payment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::CustomerId;
    use crate::payment::PaymentStatus;
    use common::Money;
    use event_store::InMemoryEventStore;

    #[tokio::test]
    async fn test_initiate_and_claim() {
        let service = PaymentService::new(InMemoryEventStore::new());
        let cmd = InitiatePayment::new(AggregateId::new(), CustomerId::new(), Money::from_cents(900));
        let payment_id = cmd.payment_id;

        service.initiate(cmd).await.unwrap();
        let result = service
            .start_processing(StartPaymentProcessing { payment_id })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), PaymentStatus::Processing);

        let second = service
            .start_processing(StartPaymentProcessing { payment_id })
            .await;
        assert!(matches!(second, Err(DomainError::Payment(_))));
    }

    #[tokio::test]
    async fn test_get_missing_payment_is_none() {
        let service = PaymentService::new(InMemoryEventStore::new());
        assert!(service.get_payment(AggregateId::new()).await.unwrap().is_none());
    }
}
