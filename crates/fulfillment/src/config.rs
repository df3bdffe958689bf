//! Fulfillment settings loaded from environment variables.

use std::time::Duration;

use domain::WarehouseId;

/// Tunables for the order and payment state machines.
///
/// Reads from environment variables:
/// - `PAYMENT_CONFIRMATION_DELAY_SECS`: delay before a deferred payment is confirmed (default: `86400`)
/// - `GATEWAY_TIMEOUT_MS`: bound on every gateway call (default: `10000`)
/// - `PAYMENT_MAX_ATTEMPTS`: processing attempts before a payment fails as transient (default: `3`)
/// - `LOYALTY_POINTS_PER_UNIT`: points per whole currency unit of the order total (default: `1`)
/// - `FULFILLMENT_WAREHOUSE`: warehouse stock is reserved from (default: `"main"`)
/// - `INVENTORY_RETRY_LIMIT`: optimistic retries per inventory record (default: `8`)
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub payment_confirmation_delay: Duration,
    pub gateway_timeout: Duration,
    pub payment_max_attempts: u32,
    pub loyalty_points_per_unit: u64,
    pub warehouse: WarehouseId,
    pub inventory_retry_limit: u32,
}

impl FulfillmentConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            payment_confirmation_delay: env_parse("PAYMENT_CONFIRMATION_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_confirmation_delay),
            gateway_timeout: env_parse("GATEWAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            payment_max_attempts: env_parse("PAYMENT_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.payment_max_attempts),
            loyalty_points_per_unit: env_parse("LOYALTY_POINTS_PER_UNIT")
                .unwrap_or(defaults.loyalty_points_per_unit),
            warehouse: std::env::var("FULFILLMENT_WAREHOUSE")
                .ok()
                .filter(|w| !w.is_empty())
                .map(WarehouseId::new)
                .unwrap_or(defaults.warehouse),
            inventory_retry_limit: env_parse("INVENTORY_RETRY_LIMIT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.inventory_retry_limit),
        }
    }

    /// Returns the confirmation delay as a chrono duration for due-date math.
    pub fn confirmation_delay(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.payment_confirmation_delay)
            .unwrap_or_else(|_| chrono::Duration::days(1))
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            payment_confirmation_delay: Duration::from_secs(86_400),
            gateway_timeout: Duration::from_millis(10_000),
            payment_max_attempts: 3,
            loyalty_points_per_unit: 1,
            warehouse: WarehouseId::new("main"),
            inventory_retry_limit: domain::inventory::DEFAULT_RETRY_LIMIT,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = FulfillmentConfig::default();
        assert_eq!(config.payment_confirmation_delay, Duration::from_secs(86_400));
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
        assert_eq!(config.payment_max_attempts, 3);
        assert_eq!(config.loyalty_points_per_unit, 1);
        assert_eq!(config.warehouse, WarehouseId::new("main"));
        assert_eq!(config.inventory_retry_limit, 8);
    }

    #[test]
    fn test_confirmation_delay_in_chrono() {
        let config = FulfillmentConfig {
            payment_confirmation_delay: Duration::from_secs(90),
            ..FulfillmentConfig::default()
        };
        assert_eq!(config.confirmation_delay(), chrono::Duration::seconds(90));
    }
}
