//! Inventory records and the ledger that reserves stock for orders.

mod aggregate;
mod events;
mod ledger;
mod value_objects;

pub use aggregate::InventoryRecord;
pub use events::{InventoryEvent, RecordOpenedData};
pub use ledger::{
    DEFAULT_RETRY_LIMIT, InventoryLedger, LowStockAlert, ReservationOutcome, ReservedLine,
    StockShortage,
};
pub use value_objects::{MovementReason, StockKey, StockMovement, StockRequest, WarehouseId};

use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// A record already exists for the key.
    #[error("Inventory record {key} already opened")]
    AlreadyOpened { key: String },

    /// The record has not been opened.
    #[error("Inventory record has not been opened")]
    NotOpened,

    /// No record exists for the key.
    #[error("No inventory record for {key}")]
    RecordNotFound { key: String },

    /// Quantities must be non-zero.
    #[error("Quantity must be greater than 0")]
    InvalidQuantity,

    /// Not enough stock on hand.
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: String,
        requested: u64,
        available: u32,
    },

    /// On-hand quantity would not fit.
    #[error("Quantity overflow for {key}")]
    QuantityOverflow { key: String },
}
