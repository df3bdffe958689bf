//! Order state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► InventoryChecked ──► Paid ──► Completed
///    │            │                 │               │
///    └────────────┴─────────────────┴───────────────┴──► Error
///
/// any status except Completed/Cancelled ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed at checkout, not yet claimed by a processor.
    #[default]
    Pending,

    /// Claimed; the inventory check is running.
    Processing,

    /// Stock reserved, awaiting payment.
    InventoryChecked,

    /// Payment completed, completion tasks outstanding.
    Paid,

    /// Fulfilled (terminal).
    Completed,

    /// Cancelled by an operator (terminal).
    Cancelled,

    /// A step failed (terminal for the saga).
    Error,
}

impl OrderStatus {
    /// Returns true if a processor may claim the order.
    pub fn can_start_processing(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the inventory check may be recorded.
    pub fn can_mark_inventory_checked(&self) -> bool {
        matches!(self, OrderStatus::Processing)
    }

    /// Returns true if the order may be marked paid.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::InventoryChecked)
    }

    /// Returns true if the order may be completed.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// Returns true if an operator may cancel the order.
    pub fn can_cancel(&self) -> bool {
        !matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns true if a payment attempt may still be attached.
    pub fn accepts_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Processing | OrderStatus::InventoryChecked
        )
    }

    /// Returns true if the saga must not touch the order any more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Error
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::InventoryChecked => "inventory_checked",
            OrderStatus::Paid => "paid",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted resumption point of the fulfillment saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStep {
    /// Claim the order and reserve stock.
    #[default]
    CheckInventory,

    /// Run the attached payment.
    CapturePayment,

    /// Wait for a deferred payment to be confirmed.
    AwaitPaymentConfirmation,

    /// Run the completion tasks.
    Finalize,

    /// Nothing left to do.
    None,
}

impl FulfillmentStep {
    /// Returns the step name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStep::CheckInventory => "check_inventory",
            FulfillmentStep::CapturePayment => "capture_payment",
            FulfillmentStep::AwaitPaymentConfirmation => "await_payment_confirmation",
            FulfillmentStep::Finalize => "finalize",
            FulfillmentStep::None => "none",
        }
    }
}

impl std::fmt::Display for FulfillmentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Jobs an order schedules once, after it is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    Shipment,
    Confirmation,
    Analytics,
}

impl FollowUp {
    /// Every follow-up, in scheduling order.
    pub const ALL: [FollowUp; 3] = [
        FollowUp::Shipment,
        FollowUp::Confirmation,
        FollowUp::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUp::Shipment => "shipment",
            FollowUp::Confirmation => "confirmation",
            FollowUp::Analytics => "analytics",
        }
    }
}

impl std::fmt::Display for FollowUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
