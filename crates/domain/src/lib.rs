//! Domain layer for the order fulfillment saga.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits plus the CommandHandler load-decide-append cycle
//! - The Order aggregate with its fulfillment state machine
//! - The Payment aggregate and payment method lookup
//! - Inventory records and the InventoryLedger that reserves stock

pub mod aggregate;
pub mod command;
pub mod error;
pub mod failure;
pub mod inventory;
pub mod order;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use failure::FailureKind;
pub use inventory::{
    InventoryError, InventoryLedger, InventoryRecord, LowStockAlert, MovementReason,
    ReservationOutcome, StockKey, StockMovement, StockRequest, StockShortage, WarehouseId,
};
pub use order::{
    AttachPayment, CancelOrder, CompleteOrder, CustomerId, DeferPayment, FailOrder, FollowUp,
    FulfillmentStep, MarkInventoryChecked, MarkPaid, Order, OrderError, OrderLine, OrderService,
    OrderStatus, PlaceOrder, ProductId, RecordFollowUp, StartProcessing, VariantId,
};
pub use payment::{
    CompletePayment, FailPayment, InMemoryPaymentMethodStore, InitiatePayment, Payment,
    PaymentError, PaymentMethod, PaymentMethodId, PaymentMethodKind, PaymentMethodStore,
    PaymentService, PaymentStatus, RecordCapture, RefundPayment, ResolveMethod,
    ScheduleConfirmation, ScheduleRetry, StartPaymentProcessing, SupersedePayment,
};

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
