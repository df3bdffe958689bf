//! Payment state machine.

use serde::{Deserialize, Serialize};

/// The status of a payment attempt.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──┬──► Completed ──► Refunded
///    ▲            │        ├──► Failed
///    └────────────┘        └──► PendingConfirmation ──► Completed | Failed
///   (transient retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, not yet dispatched.
    #[default]
    Pending,

    /// Claimed by a processor; a capture may be in flight.
    Processing,

    /// Dispatched to a deferred method; waiting for the confirmation job.
    PendingConfirmation,

    /// Captured and verified.
    Completed,

    /// Rejected, unverifiable, or superseded (terminal).
    Failed,

    /// Refunded after completion (terminal).
    Refunded,
}

impl PaymentStatus {
    /// Returns true if the payment may still change outcome.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::PendingConfirmation
        )
    }

    /// Returns true if ProcessPayment has nothing to do.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::PendingConfirmation => "pending_confirmation",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
