//! Payment domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::failure::FailureKind;
use crate::order::CustomerId;

use super::{PaymentMethodId, PaymentMethodKind};

/// Events that can occur on a payment aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    /// A payment attempt was created for an order.
    PaymentInitiated(PaymentInitiatedData),

    /// A processor claimed the attempt.
    ProcessingStarted(PaymentProcessingStartedData),

    /// The payment method was resolved.
    MethodResolved(MethodResolvedData),

    /// The method settles later; a confirmation job was scheduled.
    ConfirmationScheduled(ConfirmationScheduledData),

    /// The gateway captured the funds.
    PaymentCaptured(PaymentCapturedData),

    /// The gateway corroborated the capture.
    PaymentVerified(PaymentVerifiedData),

    /// The payment completed.
    PaymentCompleted(PaymentCompletedData),

    /// A transient gateway failure; the attempt returns to pending.
    RetryScheduled(RetryScheduledData),

    /// The payment failed.
    PaymentFailed(PaymentFailedData),

    /// A newer attempt replaced this one.
    PaymentSuperseded(PaymentSupersededData),

    /// The payment was refunded.
    PaymentRefunded(PaymentRefundedData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentInitiated(_) => "PaymentInitiated",
            PaymentEvent::ProcessingStarted(_) => "PaymentProcessingStarted",
            PaymentEvent::MethodResolved(_) => "PaymentMethodResolved",
            PaymentEvent::ConfirmationScheduled(_) => "PaymentConfirmationScheduled",
            PaymentEvent::PaymentCaptured(_) => "PaymentCaptured",
            PaymentEvent::PaymentVerified(_) => "PaymentVerified",
            PaymentEvent::PaymentCompleted(_) => "PaymentCompleted",
            PaymentEvent::RetryScheduled(_) => "PaymentRetryScheduled",
            PaymentEvent::PaymentFailed(_) => "PaymentFailed",
            PaymentEvent::PaymentSuperseded(_) => "PaymentSuperseded",
            PaymentEvent::PaymentRefunded(_) => "PaymentRefunded",
        }
    }
}

/// Data for PaymentInitiated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitiatedData {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,

    /// Amount to capture, in the order's currency.
    pub amount: Money,

    /// Explicitly chosen method; the customer default is used when absent.
    pub method_id: Option<PaymentMethodId>,

    pub initiated_at: DateTime<Utc>,
}

/// Data for ProcessingStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProcessingStartedData {
    /// 1-based attempt number.
    pub attempt: u32,

    pub started_at: DateTime<Utc>,
}

/// Data for MethodResolved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodResolvedData {
    pub method_id: PaymentMethodId,
    pub kind: PaymentMethodKind,
}

/// Data for ConfirmationScheduled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationScheduledData {
    /// When the confirmation job is due.
    pub due_at: DateTime<Utc>,
}

/// Data for PaymentCaptured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCapturedData {
    /// Gateway transaction reference.
    pub transaction_id: String,

    pub captured_at: DateTime<Utc>,
}

/// Data for PaymentVerified event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerifiedData {
    pub verified_at: DateTime<Utc>,
}

/// Data for PaymentCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCompletedData {
    pub completed_at: DateTime<Utc>,
}

/// Data for RetryScheduled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryScheduledData {
    /// What went wrong on this attempt.
    pub reason: String,

    /// The attempt that failed.
    pub attempt: u32,
}

/// Data for PaymentFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub reason: String,
    pub category: FailureKind,
    pub failed_at: DateTime<Utc>,
}

/// Data for PaymentSuperseded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSupersededData {
    /// The attempt that replaced this one.
    pub superseded_by: AggregateId,

    pub superseded_at: DateTime<Utc>,
}

/// Data for PaymentRefunded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundedData {
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}

// Convenience constructors for events
impl PaymentEvent {
    /// Creates a PaymentInitiated event.
    pub fn payment_initiated(
        payment_id: AggregateId,
        order_id: AggregateId,
        customer_id: CustomerId,
        amount: Money,
        method_id: Option<PaymentMethodId>,
    ) -> Self {
        PaymentEvent::PaymentInitiated(PaymentInitiatedData {
            payment_id,
            order_id,
            customer_id,
            amount,
            method_id,
            initiated_at: Utc::now(),
        })
    }

    /// Creates a ProcessingStarted event.
    pub fn processing_started(attempt: u32) -> Self {
        PaymentEvent::ProcessingStarted(PaymentProcessingStartedData {
            attempt,
            started_at: Utc::now(),
        })
    }

    /// Creates a MethodResolved event.
    pub fn method_resolved(method_id: PaymentMethodId, kind: PaymentMethodKind) -> Self {
        PaymentEvent::MethodResolved(MethodResolvedData { method_id, kind })
    }

    /// Creates a ConfirmationScheduled event.
    pub fn confirmation_scheduled(due_at: DateTime<Utc>) -> Self {
        PaymentEvent::ConfirmationScheduled(ConfirmationScheduledData { due_at })
    }

    /// Creates a PaymentCaptured event.
    pub fn payment_captured(transaction_id: impl Into<String>) -> Self {
        PaymentEvent::PaymentCaptured(PaymentCapturedData {
            transaction_id: transaction_id.into(),
            captured_at: Utc::now(),
        })
    }

    /// Creates a PaymentVerified event.
    pub fn payment_verified() -> Self {
        PaymentEvent::PaymentVerified(PaymentVerifiedData {
            verified_at: Utc::now(),
        })
    }

    /// Creates a PaymentCompleted event.
    pub fn payment_completed() -> Self {
        PaymentEvent::PaymentCompleted(PaymentCompletedData {
            completed_at: Utc::now(),
        })
    }

    /// Creates a RetryScheduled event.
    pub fn retry_scheduled(reason: impl Into<String>, attempt: u32) -> Self {
        PaymentEvent::RetryScheduled(RetryScheduledData {
            reason: reason.into(),
            attempt,
        })
    }

    /// Creates a PaymentFailed event.
    pub fn payment_failed(reason: impl Into<String>, category: FailureKind) -> Self {
        PaymentEvent::PaymentFailed(PaymentFailedData {
            reason: reason.into(),
            category,
            failed_at: Utc::now(),
        })
    }

    /// Creates a PaymentSuperseded event.
    pub fn payment_superseded(superseded_by: AggregateId) -> Self {
        PaymentEvent::PaymentSuperseded(PaymentSupersededData {
            superseded_by,
            superseded_at: Utc::now(),
        })
    }

    /// Creates a PaymentRefunded event.
    pub fn payment_refunded(reason: impl Into<String>) -> Self {
        PaymentEvent::PaymentRefunded(PaymentRefundedData {
            reason: reason.into(),
            refunded_at: Utc::now(),
        })
    }
}
