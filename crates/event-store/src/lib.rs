//! Event store for the fulfillment aggregates.
//!
//! Every order, payment and stock record change is an event appended with an
//! expected version. A version mismatch is reported as
//! [`EventStoreError::ConcurrencyConflict`], which is how callers get an atomic
//! conditional update without database-level locks.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{CAUSATION_ID_KEY, EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};
