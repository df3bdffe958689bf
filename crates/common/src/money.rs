//! Currency-aware money amounts.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ISO 4217 currencies accepted at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
    Chf,
    Jpy,
    Krw,
    Vnd,
    Clp,
}

impl Currency {
    /// Number of digits after the decimal separator in the currency's minor unit.
    ///
    /// Zero for currencies without a minor unit in practice (JPY, KRW, ...).
    pub fn minor_digits(&self) -> u32 {
        match self {
            Currency::Jpy | Currency::Krw | Currency::Vnd | Currency::Clp => 0,
            _ => 2,
        }
    }

    /// Returns the ISO code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
            Currency::Chf => "CHF",
            Currency::Jpy => "JPY",
            Currency::Krw => "KRW",
            Currency::Vnd => "VND",
            Currency::Clp => "CLP",
        }
    }

    fn symbol(&self) -> Option<&'static str> {
        match self {
            Currency::Usd => Some("$"),
            Currency::Eur => Some("€"),
            Currency::Gbp => Some("£"),
            Currency::Jpy => Some("¥"),
            Currency::Krw => Some("₩"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Returned when a currency code is not supported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported currency code: {0}")]
pub struct ParseCurrencyError(pub String);

impl FromStr for Currency {
    type Err = ParseCurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "CAD" => Ok(Currency::Cad),
            "AUD" => Ok(Currency::Aud),
            "CHF" => Ok(Currency::Chf),
            "JPY" => Ok(Currency::Jpy),
            "KRW" => Ok(Currency::Krw),
            "VND" => Ok(Currency::Vnd),
            "CLP" => Ok(Currency::Clp),
            other => Err(ParseCurrencyError(other.to_string())),
        }
    }
}

/// A money amount in the currency's minor unit, avoiding floating point.
///
/// `Money::new(1234, Currency::Usd)` is $12.34; `Money::new(1234, Currency::Jpy)` is ¥1234.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor_units: i64,
    currency: Currency,
}

impl Money {
    /// Creates an amount from minor units.
    pub fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Creates a USD amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self::new(cents, Currency::Usd)
    }

    /// Returns zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Returns the amount in minor units.
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Returns the currency.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Returns the whole-unit portion, truncated toward zero.
    pub fn whole_units(&self) -> i64 {
        self.minor_units / self.scale()
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Adds another amount of the same currency.
    ///
    /// Returns `None` when the currencies differ or the sum overflows.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        let sum = self.minor_units.checked_add(other.minor_units)?;
        Some(Money::new(sum, self.currency))
    }

    /// Multiplies by a quantity, saturating at the i64 bounds.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money::new(
            self.minor_units.saturating_mul(i64::from(quantity)),
            self.currency,
        )
    }

    fn scale(&self) -> i64 {
        10_i64.pow(self.currency.minor_digits())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.unsigned_abs();
        let scale = self.scale().unsigned_abs();

        let amount = match self.currency.minor_digits() {
            0 => abs.to_string(),
            digits => format!(
                "{}.{:0width$}",
                abs / scale,
                abs % scale,
                width = digits as usize
            ),
        };

        match self.currency.symbol() {
            Some(symbol) => write!(f, "{sign}{symbol}{amount}"),
            None => write!(f, "{sign}{amount} {}", self.currency.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_decimal_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
        assert_eq!(Money::new(990, Currency::Eur).to_string(), "€9.90");
        assert_eq!(Money::new(1050, Currency::Chf).to_string(), "10.50 CHF");
    }

    #[test]
    fn test_zero_decimal_display() {
        assert_eq!(Money::new(1234, Currency::Jpy).to_string(), "¥1234");
        assert_eq!(Money::new(50000, Currency::Krw).to_string(), "₩50000");
        assert_eq!(Money::new(700, Currency::Clp).to_string(), "700 CLP");
    }

    #[test]
    fn test_whole_units() {
        assert_eq!(Money::from_cents(12_99).whole_units(), 12);
        assert_eq!(Money::new(1234, Currency::Jpy).whole_units(), 1234);
    }

    #[test]
    fn test_checked_add_requires_same_currency() {
        let usd = Money::from_cents(100);
        assert_eq!(usd.checked_add(Money::from_cents(50)), Some(Money::from_cents(150)));
        assert_eq!(usd.checked_add(Money::new(50, Currency::Eur)), None);
    }

    #[test]
    fn test_multiply() {
        assert_eq!(Money::from_cents(1000).multiply(3).minor_units(), 3000);
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("jpy".parse::<Currency>(), Ok(Currency::Jpy));
        assert!("XYZ".parse::<Currency>().is_err());
    }

    #[test]
    fn test_currency_serializes_as_code() {
        let json = serde_json::to_string(&Money::new(100, Currency::Gbp)).unwrap();
        assert_eq!(json, r#"{"minor_units":100,"currency":"GBP"}"#);
    }
}
