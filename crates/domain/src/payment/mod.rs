//! Payment aggregate, payment methods and related types.

mod aggregate;
mod commands;
mod events;
mod method;
mod service;
mod state;

pub use aggregate::Payment;
pub use commands::*;
pub use events::{
    ConfirmationScheduledData, MethodResolvedData, PaymentCapturedData, PaymentCompletedData,
    PaymentEvent, PaymentFailedData, PaymentInitiatedData, PaymentProcessingStartedData,
    PaymentRefundedData, PaymentSupersededData, PaymentVerifiedData, RetryScheduledData,
};
pub use method::{
    InMemoryPaymentMethodStore, PaymentMethod, PaymentMethodId, PaymentMethodKind,
    PaymentMethodStore,
};
pub use service::PaymentService;
pub use state::PaymentStatus;

use common::Money;
use thiserror::Error;

/// Errors that can occur during payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The payment was already initiated.
    #[error("Payment already initiated")]
    AlreadyInitiated,

    /// The payment does not exist.
    #[error("Payment has not been initiated")]
    NotInitiated,

    /// Amount must be positive.
    #[error("Invalid payment amount: {amount}")]
    InvalidAmount { amount: Money },

    /// Payment is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: PaymentStatus,
        action: &'static str,
    },

    /// The current attempt may have a capture in flight.
    #[error("Current payment attempt is still processing")]
    AttemptInProgress,

    /// The order is already paid.
    #[error("Payment already completed")]
    AlreadyPaid,

    /// A different transaction reference was already recorded.
    #[error("Transaction {received} does not match recorded {recorded}")]
    TransactionMismatch { recorded: String, received: String },

    /// Completion requires a captured transaction.
    #[error("Payment has no captured transaction")]
    MissingTransaction,
}
