//! Inventory record aggregate.

use std::collections::HashSet;

use chrono::Utc;
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{InventoryError, InventoryEvent, MovementReason, StockKey, StockMovement};

/// On-hand quantity for one (product, variant, warehouse).
///
/// Quantity never goes below zero: every decrement is decided against the
/// loaded quantity and appended conditionally on the loaded version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryRecord {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    key: Option<StockKey>,
    on_hand: u32,
    reorder_threshold: u32,

    /// Orders that already hold a reservation movement on this record.
    reserved_for: HashSet<AggregateId>,

    movements: Vec<StockMovement>,
}

impl Aggregate for InventoryRecord {
    type Event = InventoryEvent;
    type Error = InventoryError;

    fn aggregate_type() -> &'static str {
        "InventoryRecord"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            InventoryEvent::RecordOpened(data) => {
                self.id = Some(data.key.record_id());
                self.key = Some(data.key);
                self.on_hand = data.on_hand;
                self.reorder_threshold = data.reorder_threshold;
            }
            InventoryEvent::StockMoved(movement) => {
                self.on_hand = movement.quantity_after;
                if movement.reason == MovementReason::Reservation
                    && let Some(order_id) = movement.reference
                {
                    self.reserved_for.insert(order_id);
                }
                self.movements.push(movement);
            }
        }
    }
}

// Query methods
impl InventoryRecord {
    pub fn key(&self) -> Option<&StockKey> {
        self.key.as_ref()
    }

    pub fn on_hand(&self) -> u32 {
        self.on_hand
    }

    pub fn reorder_threshold(&self) -> u32 {
        self.reorder_threshold
    }

    /// Returns true if on-hand is at or below the reorder threshold.
    pub fn is_low(&self) -> bool {
        self.on_hand <= self.reorder_threshold
    }

    /// Returns true if the order already reserved stock here.
    pub fn has_reservation_for(&self, order_id: AggregateId) -> bool {
        self.reserved_for.contains(&order_id)
    }

    /// Movement history, oldest first.
    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }
}

// Command methods (return events)
impl InventoryRecord {
    /// Opens the record named by `key`.
    pub fn open(
        &self,
        key: StockKey,
        on_hand: u32,
        reorder_threshold: u32,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        if self.id.is_some() {
            return Err(InventoryError::AlreadyOpened {
                key: key.to_string(),
            });
        }

        Ok(vec![InventoryEvent::record_opened(
            key,
            on_hand,
            reorder_threshold,
        )])
    }

    /// Takes `quantity` units for an order.
    ///
    /// An order that already holds a reservation here gets no second one.
    pub fn reserve(
        &self,
        order_id: AggregateId,
        quantity: u32,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_opened()?;

        if self.has_reservation_for(order_id) {
            return Ok(vec![]);
        }
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        self.record_movement(-i64::from(quantity), MovementReason::Reservation, Some(order_id))
    }

    /// Adds received stock.
    pub fn restock(
        &self,
        quantity: u32,
        reference: Option<AggregateId>,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        self.record_movement(i64::from(quantity), MovementReason::Restock, reference)
    }

    /// Applies a signed quantity change and its audit entry.
    pub fn record_movement(
        &self,
        delta: i64,
        reason: MovementReason,
        reference: Option<AggregateId>,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        let key = self.ensure_opened()?;

        if delta == 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        let after = i64::from(self.on_hand) + delta;
        if after < 0 {
            return Err(InventoryError::InsufficientStock {
                key: key.to_string(),
                requested: delta.unsigned_abs(),
                available: self.on_hand,
            });
        }
        let quantity_after = u32::try_from(after).map_err(|_| InventoryError::QuantityOverflow {
            key: key.to_string(),
        })?;

        Ok(vec![InventoryEvent::StockMoved(StockMovement {
            delta,
            reason,
            reference,
            quantity_after,
            moved_at: Utc::now(),
        })])
    }

    fn ensure_opened(&self) -> Result<&StockKey, InventoryError> {
        self.key.as_ref().ok_or(InventoryError::NotOpened)
    }
}
