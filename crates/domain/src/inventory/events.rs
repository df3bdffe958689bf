//! Inventory record events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{StockKey, StockMovement};

/// Events that can occur on an inventory record.
///
/// `StockMoved` is the stock movement audit entry: a quantity change and its
/// movement record are one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    /// The record was opened with an initial quantity.
    RecordOpened(RecordOpenedData),

    /// On-hand quantity changed.
    StockMoved(StockMovement),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::RecordOpened(_) => "InventoryRecordOpened",
            InventoryEvent::StockMoved(_) => "StockMoved",
        }
    }
}

/// Data for RecordOpened event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOpenedData {
    pub key: StockKey,
    pub on_hand: u32,

    /// Alert when on-hand drops to or below this.
    pub reorder_threshold: u32,

    pub opened_at: DateTime<Utc>,
}

impl InventoryEvent {
    /// Creates a RecordOpened event.
    pub fn record_opened(key: StockKey, on_hand: u32, reorder_threshold: u32) -> Self {
        InventoryEvent::RecordOpened(RecordOpenedData {
            key,
            on_hand,
            reorder_threshold,
            opened_at: Utc::now(),
        })
    }
}
