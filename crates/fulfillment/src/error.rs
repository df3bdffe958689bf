//! Fulfillment error types.

use common::AggregateId;
use domain::{
    DomainError, FailureKind, InventoryError, OrderError, PaymentError, PaymentMethodKind,
    StockShortage,
};
use event_store::EventStoreError;
use thiserror::Error;

use crate::services::gateway::GatewayError;

/// Errors that can occur while advancing orders and payments.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// A line could not be satisfied from stock on hand.
    #[error("Insufficient stock for {0}")]
    InsufficientStock(StockShortage),

    /// No inventory record exists for a line.
    #[error("No inventory record for {key}")]
    InventoryRecordNotFound { key: String },

    /// The gateway rejected the payment.
    #[error("Payment failed: {reason}")]
    PaymentFailed { reason: String },

    /// The gateway did not corroborate a recorded transaction.
    #[error("Payment verification failed for transaction {transaction_id}")]
    PaymentVerificationFailed { transaction_id: String },

    /// Neither an explicit nor a default payment method resolved.
    #[error("No payment method found for payment {payment_id}")]
    PaymentMethodNotFound { payment_id: AggregateId },

    /// No gateway client handles the method kind.
    #[error("No payment gateway configured for {kind}")]
    GatewayNotConfigured { kind: PaymentMethodKind },

    /// A collaborator was unavailable or timed out.
    #[error("External service '{service}' unavailable: {message}")]
    ExternalService { service: String, message: String },

    /// A follow-up job could not be enqueued.
    #[error("Failed to schedule job: {0}")]
    Scheduling(String),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// Payment not found.
    #[error("Payment not found: {0}")]
    PaymentNotFound(AggregateId),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FulfillmentError {
    /// Creates an external service error.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        FulfillmentError::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Classifies the error for routing and retry decisions.
    pub fn kind(&self) -> FailureKind {
        match self {
            FulfillmentError::InsufficientStock(_) => FailureKind::StockShortage,
            FulfillmentError::PaymentFailed { .. }
            | FulfillmentError::PaymentVerificationFailed { .. } => FailureKind::PaymentDeclined,
            FulfillmentError::InventoryRecordNotFound { .. }
            | FulfillmentError::PaymentMethodNotFound { .. }
            | FulfillmentError::GatewayNotConfigured { .. } => FailureKind::Configuration,
            FulfillmentError::ExternalService { .. } | FulfillmentError::Scheduling(_) => {
                FailureKind::Transient
            }
            FulfillmentError::Domain(e) => domain_kind(e),
            FulfillmentError::EventStore(e) => store_kind(e),
            FulfillmentError::OrderNotFound(_)
            | FulfillmentError::PaymentNotFound(_)
            | FulfillmentError::Serialization(_) => FailureKind::Internal,
        }
    }

    /// Returns true if the job runner should redeliver.
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Returns true if another delivery wrote the aggregate first.
    pub fn is_conflict(&self) -> bool {
        match self {
            FulfillmentError::Domain(e) => e.is_conflict(),
            FulfillmentError::EventStore(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// Returns true if the order or payment moved on since it was loaded.
    ///
    /// Covers both a lost append and a command re-decided against state
    /// another delivery already advanced.
    pub fn is_stale(&self) -> bool {
        self.is_conflict()
            || matches!(
                self,
                FulfillmentError::Domain(
                    DomainError::Order(OrderError::InvalidStateTransition { .. })
                        | DomainError::Payment(PaymentError::InvalidStateTransition { .. })
                )
            )
    }
}

impl From<GatewayError> for FulfillmentError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Rejected { reason } => FulfillmentError::PaymentFailed { reason },
            GatewayError::NotConfigured { kind } => FulfillmentError::GatewayNotConfigured { kind },
            other => FulfillmentError::external("payment gateway", other.to_string()),
        }
    }
}

fn domain_kind(error: &DomainError) -> FailureKind {
    match error {
        DomainError::Inventory(InventoryError::RecordNotFound { .. }) => FailureKind::Configuration,
        DomainError::Inventory(InventoryError::InsufficientStock { .. }) => {
            FailureKind::StockShortage
        }
        DomainError::ContentionExhausted { .. } => FailureKind::Transient,
        DomainError::EventStore(e) => store_kind(e),
        _ => FailureKind::Internal,
    }
}

fn store_kind(error: &EventStoreError) -> FailureKind {
    match error {
        EventStoreError::Database(_) => FailureKind::Transient,
        _ => FailureKind::Internal,
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
