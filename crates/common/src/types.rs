use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for name-derived aggregate IDs.
const NAME_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a9e_4d7b_4c1a_9e53_8b0f_2d6a_71c4);

/// Unique identifier for an aggregate instance (order, payment, stock record).
///
/// Wraps a UUID so that aggregate IDs are not mixed up with other
/// UUID-based identifiers such as customer or event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable ID from a natural key.
    ///
    /// The same `kind` and `name` always produce the same ID, which lets an
    /// aggregate keyed by business data (e.g. a SKU in a warehouse) be
    /// addressed without a lookup table.
    pub fn from_name(kind: &str, name: &str) -> Self {
        let key = format!("{kind}/{name}");
        Self(Uuid::new_v5(&NAME_NAMESPACE, key.as_bytes()))
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}
