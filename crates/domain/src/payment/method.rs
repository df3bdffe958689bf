//! Payment methods and the store that resolves them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::order::CustomerId;

/// Unique identifier for a stored payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethodId(Uuid);

impl PaymentMethodId {
    /// Creates a new random payment method ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PaymentMethodId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PaymentMethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type tag that selects a gateway protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    Card,
    Wallet,
    BankTransfer,
    Other,
}

impl PaymentMethodKind {
    /// Returns true if the gateway answers during the capture call.
    ///
    /// Other kinds settle later and are confirmed by a scheduled job.
    pub fn is_immediate(&self) -> bool {
        matches!(self, PaymentMethodKind::Card | PaymentMethodKind::Wallet)
    }

    /// Returns the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::Card => "card",
            PaymentMethodKind::Wallet => "wallet",
            PaymentMethodKind::BankTransfer => "bank_transfer",
            PaymentMethodKind::Other => "other",
        }
    }
}

impl std::fmt::Display for PaymentMethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored payment method. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub customer_id: CustomerId,
    pub kind: PaymentMethodKind,

    /// Opaque provider credentials (token, account reference).
    pub credentials: String,
}

impl PaymentMethod {
    /// Creates a payment method with a fresh ID.
    pub fn new(
        customer_id: CustomerId,
        kind: PaymentMethodKind,
        credentials: impl Into<String>,
    ) -> Self {
        Self {
            id: PaymentMethodId::new(),
            customer_id,
            kind,
            credentials: credentials.into(),
        }
    }
}

/// Lookup of stored payment methods.
#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    /// Returns the method with the given ID.
    async fn get(&self, id: PaymentMethodId) -> Option<PaymentMethod>;

    /// Returns the customer's default method.
    async fn default_for_customer(&self, customer_id: CustomerId) -> Option<PaymentMethod>;
}

#[async_trait]
impl<T: PaymentMethodStore + ?Sized> PaymentMethodStore for Arc<T> {
    async fn get(&self, id: PaymentMethodId) -> Option<PaymentMethod> {
        (**self).get(id).await
    }

    async fn default_for_customer(&self, customer_id: CustomerId) -> Option<PaymentMethod> {
        (**self).default_for_customer(customer_id).await
    }
}

#[derive(Debug, Default)]
struct MethodTables {
    methods: HashMap<PaymentMethodId, PaymentMethod>,
    defaults: HashMap<CustomerId, PaymentMethodId>,
}

/// In-memory payment method store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentMethodStore {
    tables: Arc<RwLock<MethodTables>>,
}

impl InMemoryPaymentMethodStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a method.
    pub async fn insert(&self, method: PaymentMethod) {
        let mut tables = self.tables.write().await;
        tables.methods.insert(method.id, method);
    }

    /// Stores a method and makes it the customer's default.
    pub async fn insert_default(&self, method: PaymentMethod) {
        let mut tables = self.tables.write().await;
        tables.defaults.insert(method.customer_id, method.id);
        tables.methods.insert(method.id, method);
    }
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn get(&self, id: PaymentMethodId) -> Option<PaymentMethod> {
        self.tables.read().await.methods.get(&id).cloned()
    }

    async fn default_for_customer(&self, customer_id: CustomerId) -> Option<PaymentMethod> {
        let tables = self.tables.read().await;
        tables
            .defaults
            .get(&customer_id)
            .and_then(|id| tables.methods.get(id))
            .cloned()
    }
}
