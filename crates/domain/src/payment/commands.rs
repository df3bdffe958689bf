//! Payment commands.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money};

use crate::command::Command;
use crate::failure::FailureKind;
use crate::order::CustomerId;

use super::{Payment, PaymentMethod, PaymentMethodId};

/// Command to create a payment attempt.
#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub amount: Money,

    /// Explicit method; the customer default is used when absent.
    pub method_id: Option<PaymentMethodId>,
}

impl InitiatePayment {
    /// Creates a new InitiatePayment command with a generated payment ID.
    pub fn new(order_id: AggregateId, customer_id: CustomerId, amount: Money) -> Self {
        Self {
            payment_id: AggregateId::new(),
            order_id,
            customer_id,
            amount,
            method_id: None,
        }
    }

    /// Selects an explicit payment method.
    pub fn with_method(mut self, method_id: PaymentMethodId) -> Self {
        self.method_id = Some(method_id);
        self
    }
}

impl Command for InitiatePayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to claim a pending attempt for dispatch.
#[derive(Debug, Clone)]
pub struct StartPaymentProcessing {
    pub payment_id: AggregateId,
}

impl Command for StartPaymentProcessing {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to record the resolved payment method.
#[derive(Debug, Clone)]
pub struct ResolveMethod {
    pub payment_id: AggregateId,
    pub method: PaymentMethod,
}

impl Command for ResolveMethod {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to park an attempt until its confirmation job runs.
#[derive(Debug, Clone)]
pub struct ScheduleConfirmation {
    pub payment_id: AggregateId,
    pub due_at: DateTime<Utc>,
}

impl Command for ScheduleConfirmation {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to record a gateway capture.
#[derive(Debug, Clone)]
pub struct RecordCapture {
    pub payment_id: AggregateId,
    pub transaction_id: String,
}

impl Command for RecordCapture {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to verify and complete a captured payment.
#[derive(Debug, Clone)]
pub struct CompletePayment {
    pub payment_id: AggregateId,
}

impl Command for CompletePayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to return an in-flight attempt to pending.
#[derive(Debug, Clone)]
pub struct ScheduleRetry {
    pub payment_id: AggregateId,
    pub reason: String,
}

impl Command for ScheduleRetry {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to fail an attempt.
#[derive(Debug, Clone)]
pub struct FailPayment {
    pub payment_id: AggregateId,
    pub reason: String,
    pub category: FailureKind,
}

impl Command for FailPayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to supersede an attempt with a newer one.
#[derive(Debug, Clone)]
pub struct SupersedePayment {
    pub payment_id: AggregateId,
    pub superseded_by: AggregateId,
}

impl Command for SupersedePayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}

/// Command to refund a completed payment.
#[derive(Debug, Clone)]
pub struct RefundPayment {
    pub payment_id: AggregateId,
    pub reason: String,
}

impl Command for RefundPayment {
    type Aggregate = Payment;

    fn aggregate_id(&self) -> AggregateId {
        self.payment_id
    }
}
