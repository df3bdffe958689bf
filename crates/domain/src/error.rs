//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::inventory::InventoryError;
use crate::order::OrderError;
use crate::payment::PaymentError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// An order command was rejected.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A payment command was rejected.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// An inventory command was rejected.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// The optimistic-retry loop gave up.
    #[error("Gave up on {aggregate_type} {aggregate_id} after {attempts} conflicting attempts")]
    ContentionExhausted {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
        attempts: u32,
    },

    /// An event envelope was missing a required field.
    #[error("Incomplete event envelope for {aggregate_type}")]
    IncompleteEnvelope { aggregate_type: &'static str },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if another writer got to the aggregate first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}
