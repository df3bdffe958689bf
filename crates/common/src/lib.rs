//! Shared types used across the fulfillment workspace.

pub mod money;
pub mod types;

pub use money::{Currency, Money, ParseCurrencyError};
pub use types::AggregateId;
