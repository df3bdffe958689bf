//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::*;
pub use events::{
    FollowUpScheduledData, InventoryCheckedData, OrderCancelledData, OrderCompletedData,
    OrderEvent, OrderFailedData, OrderPaidData, OrderPlacedData, PaymentAttachedData,
    PaymentDeferredData, ProcessingStartedData,
};
pub use service::OrderService;
pub use state::{FollowUp, FulfillmentStep, OrderStatus};
pub use value_objects::{CustomerId, OrderLine, ProductId, VariantId};

use common::{AggregateId, Currency, Money};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order was already placed.
    #[error("Order already placed")]
    AlreadyPlaced,

    /// The order does not exist.
    #[error("Order has not been placed")]
    NotPlaced,

    /// Order has no lines.
    #[error("Order has no lines")]
    NoLines,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price} (must be greater than 0)")]
    InvalidPrice { product_id: String, price: Money },

    /// Two lines name the same product and variant.
    #[error("Duplicate line for {product_id}")]
    DuplicateLine { product_id: String },

    /// Lines priced in different currencies.
    #[error("Currency mismatch: order is in {expected}, line is in {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    /// The order total does not fit.
    #[error("Order total overflows")]
    TotalOverflow,

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// The payment is not the one attached to the order.
    #[error("Payment {received} is not attached to the order (attached: {attached:?})")]
    PaymentMismatch {
        attached: Option<AggregateId>,
        received: AggregateId,
    },

    /// The order is already paid.
    #[error("Order already paid")]
    AlreadyPaid,
}
