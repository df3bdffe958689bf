//! The inventory ledger: reservations, restocks and the movement audit trail.

use common::AggregateId;
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    InventoryError, InventoryEvent, InventoryRecord, MovementReason, StockKey, StockMovement,
    StockRequest,
};

/// Default bound on optimistic retries per record.
pub const DEFAULT_RETRY_LIMIT: u32 = 8;

/// A line that was reserved by this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedLine {
    pub key: StockKey,
    pub quantity: u32,
    pub quantity_after: u32,
}

/// A record that dropped to or below its reorder threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowStockAlert {
    pub key: StockKey,
    pub on_hand: u32,
    pub reorder_threshold: u32,
}

/// The line that stopped a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockShortage {
    pub key: StockKey,
    pub requested: u64,
    pub available: u32,
}

impl std::fmt::Display for StockShortage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: requested {}, available {}",
            self.key, self.requested, self.available
        )
    }
}

/// Result of [`InventoryLedger::check_and_reserve`].
///
/// A shortage does not undo the lines reserved before it.
#[derive(Debug, Clone, Default)]
pub struct ReservationOutcome {
    /// Lines decremented by this call, in request order.
    pub reserved: Vec<ReservedLine>,

    /// Lines the order had already reserved on an earlier delivery.
    pub already_reserved: Vec<StockKey>,

    /// Records now at or below their reorder threshold.
    pub low_stock: Vec<LowStockAlert>,

    /// The first line that could not be satisfied.
    pub shortage: Option<StockShortage>,
}

impl ReservationOutcome {
    /// Returns true if every line is reserved.
    pub fn is_ok(&self) -> bool {
        self.shortage.is_none()
    }
}

/// Single source of truth for on-hand quantities.
pub struct InventoryLedger<S: EventStore> {
    handler: CommandHandler<S, InventoryRecord>,
    retry_limit: u32,
}

impl<S: EventStore> InventoryLedger<S> {
    /// Creates a ledger with the default retry bound.
    pub fn new(store: S) -> Self {
        Self::with_retry_limit(store, DEFAULT_RETRY_LIMIT)
    }

    /// Creates a ledger that retries each record at most `retry_limit` times.
    pub fn with_retry_limit(store: S, retry_limit: u32) -> Self {
        Self {
            handler: CommandHandler::new(store),
            retry_limit: retry_limit.max(1),
        }
    }

    /// Opens a record.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn open_record(
        &self,
        key: StockKey,
        on_hand: u32,
        reorder_threshold: u32,
    ) -> Result<CommandResult<InventoryRecord>, DomainError> {
        let record_id = key.record_id();
        self.handler
            .execute(record_id, |record| record.open(key, on_hand, reorder_threshold))
            .await
    }

    /// Reserves every request for an order, in order.
    ///
    /// Stops at the first shortage. Lines reserved before the shortage stay
    /// reserved. A line this order already reserved is skipped, so a
    /// redelivered call never decrements twice.
    #[tracing::instrument(skip(self, requests), fields(lines = requests.len()))]
    pub async fn check_and_reserve(
        &self,
        order_id: AggregateId,
        requests: &[StockRequest],
    ) -> Result<ReservationOutcome, DomainError> {
        let mut outcome = ReservationOutcome::default();

        for request in requests {
            let quantity = request.quantity;
            let result = self
                .handler
                .execute_with_retry(
                    request.key.record_id(),
                    Some(order_id),
                    self.retry_limit,
                    |record| record.reserve(order_id, quantity),
                )
                .await;

            match result {
                Ok(result) if result.is_noop() => {
                    tracing::debug!(key = %request.key, "line already reserved for order");
                    outcome.already_reserved.push(request.key.clone());
                }
                Ok(result) => {
                    let record = &result.aggregate;
                    metrics::counter!("stock_reservations_total").increment(1);
                    outcome.reserved.push(ReservedLine {
                        key: request.key.clone(),
                        quantity,
                        quantity_after: record.on_hand(),
                    });
                    if record.is_low() {
                        outcome.low_stock.push(LowStockAlert {
                            key: request.key.clone(),
                            on_hand: record.on_hand(),
                            reorder_threshold: record.reorder_threshold(),
                        });
                    }
                }
                Err(DomainError::Inventory(InventoryError::InsufficientStock {
                    requested,
                    available,
                    ..
                })) => {
                    let shortage = StockShortage {
                        key: request.key.clone(),
                        requested,
                        available,
                    };
                    tracing::warn!(%shortage, "insufficient stock");
                    outcome.shortage = Some(shortage);
                    break;
                }
                Err(e) => return Err(not_found_for(e, &request.key)),
            }
        }

        Ok(outcome)
    }

    /// Adds received stock.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn restock(
        &self,
        key: &StockKey,
        quantity: u32,
        reference: Option<AggregateId>,
    ) -> Result<CommandResult<InventoryRecord>, DomainError> {
        self.handler
            .execute_with_retry(key.record_id(), reference, self.retry_limit, |record| {
                record.restock(quantity, reference)
            })
            .await
            .map_err(|e| not_found_for(e, key))
    }

    /// Applies a signed change with its audit entry.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn record_movement(
        &self,
        key: &StockKey,
        delta: i64,
        reason: MovementReason,
        reference: Option<AggregateId>,
    ) -> Result<CommandResult<InventoryRecord>, DomainError> {
        self.handler
            .execute_with_retry(key.record_id(), reference, self.retry_limit, |record| {
                record.record_movement(delta, reason, reference)
            })
            .await
            .map_err(|e| not_found_for(e, key))
    }

    /// Loads a record.
    pub async fn record(&self, key: &StockKey) -> Result<Option<InventoryRecord>, DomainError> {
        self.handler.load_existing(key.record_id()).await
    }

    /// Returns on-hand quantity, or None if no record exists.
    pub async fn quantity(&self, key: &StockKey) -> Result<Option<u32>, DomainError> {
        Ok(self.record(key).await?.map(|record| record.on_hand()))
    }

    /// Returns the movement history of a record, oldest first.
    pub async fn movements(&self, key: &StockKey) -> Result<Vec<StockMovement>, DomainError> {
        Ok(self
            .record(key)
            .await?
            .map(|record| record.movements().to_vec())
            .unwrap_or_default())
    }

    /// Returns every movement caused by `reference`, with the record it hit.
    pub async fn movements_for_reference(
        &self,
        reference: AggregateId,
    ) -> Result<Vec<(AggregateId, StockMovement)>, DomainError> {
        let envelopes = self.handler.store().get_events_by_causation(reference).await?;

        let mut movements = Vec::new();
        for envelope in envelopes {
            if envelope.aggregate_type != InventoryRecord::aggregate_type() {
                continue;
            }
            let event: InventoryEvent = serde_json::from_value(envelope.payload)?;
            if let InventoryEvent::StockMoved(movement) = event {
                movements.push((envelope.aggregate_id, movement));
            }
        }
        Ok(movements)
    }
}

fn not_found_for(error: DomainError, key: &StockKey) -> DomainError {
    match error {
        DomainError::Inventory(InventoryError::NotOpened) => {
            InventoryError::RecordNotFound {
                key: key.to_string(),
            }
            .into()
        }
        other => other,
    }
}
