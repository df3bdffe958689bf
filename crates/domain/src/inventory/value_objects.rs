//! Value objects for the inventory ledger.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::order::{OrderLine, ProductId, VariantId};

/// Warehouse identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(String);

impl WarehouseId {
    /// Creates a new warehouse ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the warehouse ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WarehouseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WarehouseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies one inventory record: a (product, variant, warehouse) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    /// Creates a key for a product without variants.
    pub fn new(product_id: impl Into<ProductId>, warehouse_id: impl Into<WarehouseId>) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id: None,
            warehouse_id: warehouse_id.into(),
        }
    }

    /// Sets the variant.
    pub fn with_variant(mut self, variant_id: impl Into<VariantId>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    /// Returns the key for an order line stocked in the given warehouse.
    pub fn for_line(line: &OrderLine, warehouse_id: &WarehouseId) -> Self {
        Self {
            product_id: line.product_id.clone(),
            variant_id: line.variant_id.clone(),
            warehouse_id: warehouse_id.clone(),
        }
    }

    /// Returns the stable aggregate ID of the record this key names.
    pub fn record_id(&self) -> AggregateId {
        AggregateId::from_name("inventory-record", &self.to_string())
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant_id {
            Some(variant) => write!(f, "{}/{}@{}", self.product_id, variant, self.warehouse_id),
            None => write!(f, "{}@{}", self.product_id, self.warehouse_id),
        }
    }
}

/// Why a quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    /// Stock taken for an order.
    Reservation,

    /// Stock received.
    Restock,

    /// Manual correction.
    Adjustment,
}

impl MovementReason {
    /// Returns the reason as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Reservation => "reservation",
            MovementReason::Restock => "restock",
            MovementReason::Adjustment => "adjustment",
        }
    }
}

/// Audit record of one quantity change. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Signed change in on-hand quantity.
    pub delta: i64,

    pub reason: MovementReason,

    /// The causing order, or other source.
    pub reference: Option<AggregateId>,

    /// On-hand quantity after the change.
    pub quantity_after: u32,

    pub moved_at: DateTime<Utc>,
}

/// A quantity wanted from one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRequest {
    pub key: StockKey,
    pub quantity: u32,
}

impl StockRequest {
    /// Creates a new request.
    pub fn new(key: StockKey, quantity: u32) -> Self {
        Self { key, quantity }
    }

    /// Builds one request per order line, in entry order.
    pub fn for_lines(lines: &[OrderLine], warehouse_id: &WarehouseId) -> Vec<Self> {
        lines
            .iter()
            .map(|line| Self::new(StockKey::for_line(line, warehouse_id), line.quantity))
            .collect()
    }
}
