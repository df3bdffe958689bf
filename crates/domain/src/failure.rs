//! Failure classification shared by orders and payments.

use serde::{Deserialize, Serialize};

/// The class of a saga failure.
///
/// Recorded on failed orders and payments and used to pick notification
/// recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Not enough stock on hand for a line.
    StockShortage,

    /// The gateway rejected the payment or did not corroborate it.
    PaymentDeclined,

    /// Missing setup, such as no usable payment method or stock record.
    Configuration,

    /// An external service stayed unavailable after every retry.
    Transient,

    /// Anything else.
    Internal,
}

impl FailureKind {
    /// Returns the kind as a snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::StockShortage => "stock_shortage",
            FailureKind::PaymentDeclined => "payment_declined",
            FailureKind::Configuration => "configuration",
            FailureKind::Transient => "transient",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
