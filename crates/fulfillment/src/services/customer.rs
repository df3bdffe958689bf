//! Customer-facing collaborators touched when an order completes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::CustomerId;
use tokio::sync::Mutex;

use crate::error::FulfillmentError;

/// Shopping cart operations.
#[async_trait]
pub trait CartService: Send + Sync {
    /// Empties the customer's active cart. Clearing an empty cart is fine.
    async fn clear_active_cart(&self, customer_id: CustomerId) -> Result<(), FulfillmentError>;
}

/// Loyalty credit.
#[async_trait]
pub trait LoyaltyService: Send + Sync {
    /// Grants points for an order.
    ///
    /// At most one grant is made per order; returns false if the order was
    /// already credited.
    async fn award(
        &self,
        customer_id: CustomerId,
        order_id: AggregateId,
        points: u64,
    ) -> Result<bool, FulfillmentError>;
}

/// Cart service for deployments without carts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCartService;

#[async_trait]
impl CartService for NoopCartService {
    async fn clear_active_cart(&self, _customer_id: CustomerId) -> Result<(), FulfillmentError> {
        Ok(())
    }
}

/// Loyalty service for deployments without a loyalty program.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoyaltyService;

#[async_trait]
impl LoyaltyService for NoopLoyaltyService {
    async fn award(
        &self,
        _customer_id: CustomerId,
        _order_id: AggregateId,
        _points: u64,
    ) -> Result<bool, FulfillmentError> {
        Ok(false)
    }
}

#[derive(Debug, Default)]
struct CartState {
    carts: HashMap<CustomerId, Vec<String>>,
    unavailable: bool,
}

/// In-memory carts for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartService {
    state: Arc<Mutex<CartState>>,
}

impl InMemoryCartService {
    /// Creates an empty cart service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts an item in the customer's cart.
    pub async fn add_item(&self, customer_id: CustomerId, product_id: impl Into<String>) {
        let mut state = self.state.lock().await;
        state
            .carts
            .entry(customer_id)
            .or_default()
            .push(product_id.into());
    }

    /// Returns the number of items in the customer's cart.
    pub async fn item_count(&self, customer_id: CustomerId) -> usize {
        self.state
            .lock()
            .await
            .carts
            .get(&customer_id)
            .map_or(0, Vec::len)
    }

    /// Makes the service report itself unavailable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }
}

#[async_trait]
impl CartService for InMemoryCartService {
    async fn clear_active_cart(&self, customer_id: CustomerId) -> Result<(), FulfillmentError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(FulfillmentError::external("cart", "cart service unavailable"));
        }
        state.carts.remove(&customer_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LoyaltyState {
    credited_orders: HashSet<AggregateId>,
    balances: HashMap<CustomerId, u64>,
    grants: u32,
}

/// In-memory loyalty ledger for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoyaltyService {
    state: Arc<Mutex<LoyaltyState>>,
}

impl InMemoryLoyaltyService {
    /// Creates an empty loyalty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the customer's point balance.
    pub async fn balance(&self, customer_id: CustomerId) -> u64 {
        self.state
            .lock()
            .await
            .balances
            .get(&customer_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of grants made.
    pub async fn grant_count(&self) -> u32 {
        self.state.lock().await.grants
    }
}

#[async_trait]
impl LoyaltyService for InMemoryLoyaltyService {
    async fn award(
        &self,
        customer_id: CustomerId,
        order_id: AggregateId,
        points: u64,
    ) -> Result<bool, FulfillmentError> {
        let mut state = self.state.lock().await;
        if !state.credited_orders.insert(order_id) {
            return Ok(false);
        }
        let balance = state.balances.entry(customer_id).or_insert(0);
        *balance = balance.saturating_add(points);
        state.grants += 1;
        Ok(true)
    }
}
