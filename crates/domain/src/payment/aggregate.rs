//! Payment aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::failure::FailureKind;
use crate::order::CustomerId;

use super::{PaymentError, PaymentEvent, PaymentMethod, PaymentMethodId, PaymentMethodKind, PaymentStatus};

/// A single payment attempt for an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    order_id: Option<AggregateId>,
    customer_id: Option<CustomerId>,
    amount: Option<Money>,
    status: PaymentStatus,

    /// Requested method; resolved into `method_kind` on first dispatch.
    method_id: Option<PaymentMethodId>,
    method_kind: Option<PaymentMethodKind>,

    transaction_id: Option<String>,
    verified: bool,

    /// Number of dispatch attempts started.
    attempts: u32,

    confirmation_due_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    failure_category: Option<FailureKind>,
    superseded_by: Option<AggregateId>,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "Payment"
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
            PaymentEvent::PaymentInitiated(data) => {
                self.id = Some(data.payment_id);
                self.order_id = Some(data.order_id);
                self.customer_id = Some(data.customer_id);
                self.amount = Some(data.amount);
                self.method_id = data.method_id;
                self.status = PaymentStatus::Pending;
            }
            PaymentEvent::ProcessingStarted(data) => {
                self.attempts = data.attempt;
                self.status = PaymentStatus::Processing;
            }
            PaymentEvent::MethodResolved(data) => {
                self.method_id = Some(data.method_id);
                self.method_kind = Some(data.kind);
            }
            PaymentEvent::ConfirmationScheduled(data) => {
                self.confirmation_due_at = Some(data.due_at);
                self.status = PaymentStatus::PendingConfirmation;
            }
            PaymentEvent::PaymentCaptured(data) => {
                self.transaction_id = Some(data.transaction_id);
            }
            PaymentEvent::PaymentVerified(_) => {
                self.verified = true;
            }
            PaymentEvent::PaymentCompleted(_) => {
                self.status = PaymentStatus::Completed;
            }
            PaymentEvent::RetryScheduled(_) => {
                self.status = PaymentStatus::Pending;
            }
            PaymentEvent::PaymentFailed(data) => {
                self.failure_reason = Some(data.reason);
                self.failure_category = Some(data.category);
                self.status = PaymentStatus::Failed;
            }
            PaymentEvent::PaymentSuperseded(data) => {
                self.failure_reason = Some(format!("superseded by {}", data.superseded_by));
                self.superseded_by = Some(data.superseded_by);
                self.status = PaymentStatus::Failed;
            }
            PaymentEvent::PaymentRefunded(_) => {
                self.status = PaymentStatus::Refunded;
            }
        }
    }
}

// Query methods
impl Payment {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn amount(&self) -> Option<Money> {
        self.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// The requested or resolved method.
    pub fn method_id(&self) -> Option<PaymentMethodId> {
        self.method_id
    }

    /// The resolved method type, once dispatch began.
    pub fn method_kind(&self) -> Option<PaymentMethodKind> {
        self.method_kind
    }

    /// Gateway transaction reference, once captured.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Returns true if the gateway took the money, whether or not the
    /// payment settled.
    pub fn is_captured(&self) -> bool {
        self.transaction_id.is_some()
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Number of dispatch attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn confirmation_due_at(&self) -> Option<DateTime<Utc>> {
        self.confirmation_due_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn failure_category(&self) -> Option<FailureKind> {
        self.failure_category
    }

    pub fn superseded_by(&self) -> Option<AggregateId> {
        self.superseded_by
    }
}

// Command methods (return events)
impl Payment {
    /// Creates a payment attempt for an order.
    pub fn initiate(
        &self,
        payment_id: AggregateId,
        order_id: AggregateId,
        customer_id: CustomerId,
        amount: Money,
        method_id: Option<PaymentMethodId>,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.id.is_some() {
            return Err(PaymentError::AlreadyInitiated);
        }
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount { amount });
        }

        Ok(vec![PaymentEvent::payment_initiated(
            payment_id,
            order_id,
            customer_id,
            amount,
            method_id,
        )])
    }

    /// Claims a pending attempt for dispatch.
    pub fn start_processing(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;
        self.ensure_status(PaymentStatus::Pending, "start processing")?;

        Ok(vec![PaymentEvent::processing_started(self.attempts + 1)])
    }

    /// Records the resolved payment method.
    pub fn resolve_method(&self, method: &PaymentMethod) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;
        self.ensure_status(PaymentStatus::Processing, "resolve method")?;

        if self.method_kind == Some(method.kind) && self.method_id == Some(method.id) {
            return Ok(vec![]);
        }

        Ok(vec![PaymentEvent::method_resolved(method.id, method.kind)])
    }

    /// Parks the attempt until the confirmation job runs.
    pub fn schedule_confirmation(
        &self,
        due_at: DateTime<Utc>,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;
        self.ensure_status(PaymentStatus::Processing, "schedule confirmation")?;

        Ok(vec![PaymentEvent::confirmation_scheduled(due_at)])
    }

    /// Records the gateway transaction reference.
    ///
    /// Recording the same reference again is a no-op.
    pub fn record_capture(
        &self,
        transaction_id: impl Into<String>,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;
        self.ensure_dispatched("record capture")?;

        let transaction_id = transaction_id.into();
        match &self.transaction_id {
            Some(recorded) if *recorded == transaction_id => Ok(vec![]),
            Some(recorded) => Err(PaymentError::TransactionMismatch {
                recorded: recorded.clone(),
                received: transaction_id,
            }),
            None => Ok(vec![PaymentEvent::payment_captured(transaction_id)]),
        }
    }

    /// Marks a captured payment verified and completed.
    pub fn complete(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;
        if self.status == PaymentStatus::Completed {
            return Ok(vec![]);
        }
        self.ensure_dispatched("complete")?;
        if self.transaction_id.is_none() {
            return Err(PaymentError::MissingTransaction);
        }

        let mut events = Vec::with_capacity(2);
        if !self.verified {
            events.push(PaymentEvent::payment_verified());
        }
        events.push(PaymentEvent::payment_completed());
        Ok(events)
    }

    /// Returns an in-flight attempt to pending after a transient failure.
    pub fn schedule_retry(&self, reason: impl Into<String>) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;
        self.ensure_status(PaymentStatus::Processing, "schedule retry")?;

        Ok(vec![PaymentEvent::retry_scheduled(reason, self.attempts)])
    }

    /// Fails the attempt.
    ///
    /// Failing an already failed attempt is a no-op.
    pub fn fail(
        &self,
        reason: impl Into<String>,
        category: FailureKind,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;

        match self.status {
            PaymentStatus::Failed => Ok(vec![]),
            status if status.is_open() => Ok(vec![PaymentEvent::payment_failed(reason, category)]),
            status => Err(PaymentError::InvalidStateTransition {
                current_state: status,
                action: "fail",
            }),
        }
    }

    /// Replaces this attempt with a newer one.
    ///
    /// Refused while a capture may be in flight, once funds were captured
    /// or once the payment completed. Settled attempts need no superseding.
    pub fn supersede(&self, by: AggregateId) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;

        match self.status {
            status if status.is_open() && self.is_captured() => {
                Err(PaymentError::AttemptInProgress)
            }
            PaymentStatus::Pending | PaymentStatus::PendingConfirmation => {
                Ok(vec![PaymentEvent::payment_superseded(by)])
            }
            PaymentStatus::Processing => Err(PaymentError::AttemptInProgress),
            PaymentStatus::Completed | PaymentStatus::Refunded => Err(PaymentError::AlreadyPaid),
            PaymentStatus::Failed => Ok(vec![]),
        }
    }

    /// Refunds a completed payment.
    pub fn refund(&self, reason: impl Into<String>) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_initiated()?;

        match self.status {
            PaymentStatus::Refunded => Ok(vec![]),
            PaymentStatus::Completed => Ok(vec![PaymentEvent::payment_refunded(reason)]),
            status => Err(PaymentError::InvalidStateTransition {
                current_state: status,
                action: "refund",
            }),
        }
    }

    fn ensure_initiated(&self) -> Result<(), PaymentError> {
        match self.id {
            Some(_) => Ok(()),
            None => Err(PaymentError::NotInitiated),
        }
    }

    fn ensure_status(&self, expected: PaymentStatus, action: &'static str) -> Result<(), PaymentError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(PaymentError::InvalidStateTransition {
                current_state: self.status,
                action,
            })
        }
    }

    fn ensure_dispatched(&self, action: &'static str) -> Result<(), PaymentError> {
        match self.status {
            PaymentStatus::Processing | PaymentStatus::PendingConfirmation => Ok(()),
            status => Err(PaymentError::InvalidStateTransition {
                current_state: status,
                action,
            }),
        }
    }
}
